//! Job runtime (C3) and the five scheduled jobs it drives (C4-C8).

pub mod commitment;
pub mod cron;
pub mod discovery;
pub mod overrides;
pub mod quota_sync;
pub mod queue;
pub mod scrape;
