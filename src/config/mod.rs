//! Configuration module for the Collector.
//!
//! Loads and parses configuration from environment variables using the
//! figment crate. Supports flexible duration parsing that accepts both
//! numeric values (interpreted as seconds) and duration strings with units.

use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Main application configuration containing all sub-configurations
#[derive(Deserialize)]
pub struct Config {
    /// Log level for the application
    ///
    /// This value is used to set the log level for this application's target specifically.
    /// e.g. "debug" would be similar to "warn,collector=debug,..."
    ///
    /// Valid values are: "trace", "debug", "info", "warn", "error"
    /// Defaults to "info" if not specified
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Database connection URL
    pub database_url: String,

    /// Graceful shutdown timeout duration
    ///
    /// Accepts both numeric values (seconds) and duration strings.
    /// Defaults to 8 seconds if not specified
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,

    /// Comma-separated list of availability zone names this deployment
    /// reports resources for (§3's AZ sentinels `any`/`unknown` are implicit
    /// and never listed here).
    #[serde(default, deserialize_with = "deserialize_csv")]
    pub availability_zones: Vec<String>,

    /// Comma-separated list of LIQUID service types this process's C5/C6
    /// jobs are responsible for (§4.7's sharding-by-service-type contract).
    #[serde(deserialize_with = "deserialize_csv")]
    pub service_types: Vec<String>,

    /// Base URL of the discovery (tenancy source) backend.
    pub discovery_base_url: String,

    /// Base URL template for LIQUID backends, with `{service_type}`
    /// substituted per configured service type.
    pub liquid_base_url_template: String,

    /// Path to the quota-override JSON file (§4.5, C8).
    #[serde(default = "default_override_file_path")]
    pub override_file_path: String,

    /// Interval between scrapes of an up-to-date `ProjectService` (§4.2).
    #[serde(default = "default_scrape_interval", deserialize_with = "deserialize_duration")]
    pub scrape_interval: Duration,

    /// Interval before rechecking a `ProjectService` whose last scrape
    /// failed (§4.2).
    #[serde(default = "default_recheck_interval", deserialize_with = "deserialize_duration")]
    pub recheck_interval: Duration,

    /// Interval for the cron-shaped jobs: discovery sync (C4), commitment
    /// expiry (C7), and quota overrides (C8) (§4.6).
    #[serde(default = "default_cron_interval", deserialize_with = "deserialize_duration")]
    pub cron_interval: Duration,

    /// Bounded retention window for historical usage time series (§9).
    #[serde(default = "default_history_retention", deserialize_with = "deserialize_duration")]
    pub history_retention: Duration,
}

impl Config {
    /// Loads configuration from the environment, ahead of DB/logging setup
    /// so the log level it carries can configure the subscriber before
    /// anything else runs.
    pub fn load() -> Result<Self, figment::Error> {
        use figment::{Figment, providers::Env};
        Figment::new().merge(Env::raw()).extract()
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(8)
}

fn default_override_file_path() -> String {
    "overrides.json".to_string()
}

/// 30 minutes, per spec.md §4.2.
fn default_scrape_interval() -> Duration {
    Duration::from_secs(30 * 60)
}

/// 5 minutes, per spec.md §4.2.
fn default_recheck_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

/// ~3 minutes, per spec.md §4.6.
fn default_cron_interval() -> Duration {
    Duration::from_secs(3 * 60)
}

/// 90 days; the spec leaves the exact retention window as an operator
/// decision (see DESIGN.md Open Questions).
fn default_history_retention() -> Duration {
    Duration::from_secs(90 * 24 * 60 * 60)
}

/// Duration parser configured to handle various time units with seconds as default
///
/// Supports:
/// - Seconds (s) - default unit
/// - Milliseconds (ms)
/// - Minutes (m)
///
/// Does not support fractions, exponents, or infinity values
/// Allows for whitespace between the number and the time unit
/// Allows for multiple time units to be specified (summed together, e.g "10s 2m" = 120 + 10 = 130 seconds)
const DURATION_PARSER: DurationParser<'static> = DurationParser::builder()
    .time_units(&[TimeUnit::Second, TimeUnit::MilliSecond, TimeUnit::Minute])
    .parse_multiple(None)
    .allow_time_unit_delimiter()
    .disable_infinity()
    .disable_fraction()
    .disable_exponent()
    .default_unit(TimeUnit::Second)
    .build();

/// Custom deserializer for duration fields that accepts both numeric and string values
///
/// This deserializer handles the flexible duration parsing by accepting:
/// - Unsigned integers (interpreted as seconds)
/// - Signed integers (interpreted as seconds, must be non-negative)
/// - Strings (parsed using the fundu duration parser)
///
/// # Examples
///
/// - `1` -> 1 second
/// - `"30s"` -> 30 seconds
/// - `"2 m"` -> 2 minutes
/// - `"1500ms"` -> 15 seconds
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Visitor;

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a duration string or number")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            DURATION_PARSER
                .parse(value)
                .map_err(|e| {
                    serde::de::Error::custom(format!(
                        "Invalid duration format '{}': {}. Examples: '5' (5 seconds), '3500ms', '30s', '2m'",
                        value, e
                    ))
                })?
                .try_into()
                .map_err(|e| serde::de::Error::custom(format!("Duration conversion error: {}", e)))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if value < 0 {
                return Err(serde::de::Error::custom("Duration cannot be negative"));
            }
            Ok(Duration::from_secs(value as u64))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}

/// Deserializer for comma-separated string lists (availability zones,
/// service types), trimming whitespace and dropping empty entries.
fn deserialize_csv<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect())
}
