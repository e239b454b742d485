use clap::Parser;

/// Collector - background job-driven scrape/sync/expiry scheduler for the
/// quota/usage manager's per-project resource state.
///
/// This process runs all configured jobs by default:
/// - discovery: reconcile domains/projects against the authoritative tenancy source
/// - scrape: per-(project, service) usage/quota/rate scrape
/// - quota-sync: push desynced quotas to backends
/// - commitment-expiry: expire and hard-delete past-grace commitments
/// - commitment-notify: notify projects of commitments expiring soon
/// - overrides: apply the quota-override config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log formatter to use
    #[arg(long, value_enum, default_value_t = default_tracing_format())]
    pub tracing: TracingFormat,

    /// Restrict this process to a subset of jobs (default: all of them).
    #[arg(long, value_enum, value_delimiter = ',')]
    pub jobs: Vec<JobName>,
}

#[derive(clap::ValueEnum, Clone, Debug)]
pub enum TracingFormat {
    /// Use pretty formatter (default in debug mode)
    Pretty,
    /// Use JSON formatter (default in release mode)
    Json,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobName {
    /// Discovery sync (C4)
    Discovery,
    /// Scrape engine (C5)
    Scrape,
    /// Quota sync engine (C6)
    QuotaSync,
    /// Commitment expiry/cleanup (C7)
    CommitmentExpiry,
    /// Commitment expiring-soon notification (C7)
    CommitmentNotify,
    /// Quota-override application (C8)
    Overrides,
}

impl JobName {
    /// All jobs, the default when `--jobs` is not given.
    pub fn all() -> Vec<JobName> {
        vec![
            JobName::Discovery,
            JobName::Scrape,
            JobName::QuotaSync,
            JobName::CommitmentExpiry,
            JobName::CommitmentNotify,
            JobName::Overrides,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobName::Discovery => "discovery",
            JobName::Scrape => "scrape",
            JobName::QuotaSync => "quota_sync",
            JobName::CommitmentExpiry => "commitment_expiry",
            JobName::CommitmentNotify => "commitment_notify",
            JobName::Overrides => "overrides",
        }
    }
}

#[cfg(debug_assertions)]
const DEFAULT_TRACING_FORMAT: TracingFormat = TracingFormat::Pretty;
#[cfg(not(debug_assertions))]
const DEFAULT_TRACING_FORMAT: TracingFormat = TracingFormat::Json;

fn default_tracing_format() -> TracingFormat {
    DEFAULT_TRACING_FORMAT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_name_as_str() {
        assert_eq!(JobName::Discovery.as_str(), "discovery");
        assert_eq!(JobName::QuotaSync.as_str(), "quota_sync");
    }

    #[test]
    fn test_job_name_all() {
        let all = JobName::all();
        assert_eq!(all.len(), 6);
    }
}
