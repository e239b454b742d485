//! Metric reporters (C9, §4.6/§6): the process exposes aggregate counters
//! via the `metrics` facade; wiring an exporter (Prometheus, StatsD, ...) is
//! out of scope (spec.md §1/§2), so this module only registers descriptions
//! for the counters the job runtime emits.

/// The counter `jobs::cron::CronJob` and `jobs::queue::Worker` increment on
/// every tick, labeled by `(job, outcome)`.
pub const JOB_TICK_TOTAL: &str = "collector_job_tick_total";

/// Registers human-readable descriptions for this process's counters with
/// whatever `metrics::Recorder` the embedding binary installs. A no-op if no
/// recorder is installed, matching the `metrics` crate's documented
/// behavior for calls made before `metrics::set_global_recorder`.
pub fn describe() {
    metrics::describe_counter!(
        JOB_TICK_TOTAL,
        metrics::Unit::Count,
        "Number of job ticks, labeled by (job, outcome)."
    );
}
