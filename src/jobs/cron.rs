//! The cron job shape (§4.6): fire on a fixed interval with a small
//! randomized initial delay, cancellable mid-tick. Grounded on the teacher's
//! `scraper::scheduler::Scheduler` (`examples/Xevion-banner/src/scraper/scheduler.rs`):
//! a `tokio::select!` interval loop around a `CancellationToken`-wrapped
//! unit of work.

use std::future::Future;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::initial_delay;

/// Runs `work` every `interval`, starting after a small random delay, until
/// `shutdown_rx` fires. `work` receives a [`CancellationToken`] that is
/// cancelled when shutdown is requested mid-tick.
pub struct CronJob {
    pub name: &'static str,
    pub interval: Duration,
    pub max_initial_delay: Duration,
}

impl CronJob {
    pub async fn run<F, Fut>(
        &self,
        mut shutdown_rx: broadcast::Receiver<()>,
        mut work: F,
    ) -> Result<(), anyhow::Error>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), anyhow::Error>>,
    {
        let delay = initial_delay(self.max_initial_delay);
        debug!(job = self.name, delay = ?delay, "cron job starting after initial delay");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.recv() => {
                info!(job = self.name, "cron job cancelled during initial delay");
                return Ok(());
            }
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let cancel = CancellationToken::new();
                    let outcome = tokio::select! {
                        result = work(cancel.clone()) => result,
                        _ = shutdown_rx.recv() => {
                            cancel.cancel();
                            info!(job = self.name, "cron job shutting down mid-tick");
                            return Ok(());
                        }
                    };
                    match outcome {
                        Ok(()) => {
                            metrics::counter!("collector_job_tick_total", "job" => self.name, "outcome" => "ok").increment(1);
                        }
                        Err(e) => {
                            metrics::counter!("collector_job_tick_total", "job" => self.name, "outcome" => "error").increment(1);
                            warn!(job = self.name, error = %e, "cron job tick failed");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!(job = self.name, "cron job shutting down");
                    return Ok(());
                }
            }
        }
    }
}

