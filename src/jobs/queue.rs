//! The producer/consumer job shape (§4.6): discover one task, process it,
//! sleep briefly on no work. Grounded on the teacher's `scraper::worker::Worker`
//! (`examples/Xevion-banner/src/scraper/worker.rs`).

use std::future::Future;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::warn;

/// An outcome a discover-and-process step can report, so the loop knows
/// whether to sleep the "no work" interval or the "error" interval.
pub enum StepOutcome {
    Processed,
    NoWork,
    Error,
}

pub struct Worker {
    pub name: &'static str,
    pub sleep_on_no_work: Duration,
    pub sleep_on_error: Duration,
}

impl Worker {
    pub async fn run<F, Fut>(
        &self,
        mut shutdown_rx: broadcast::Receiver<()>,
        mut step: F,
    ) -> Result<(), anyhow::Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StepOutcome>,
    {
        loop {
            tokio::select! {
                outcome = step() => {
                    let (sleep_for, label) = match outcome {
                        StepOutcome::Processed => {
                            metrics::counter!("collector_job_tick_total", "job" => self.name, "outcome" => "ok").increment(1);
                            continue;
                        }
                        StepOutcome::NoWork => (self.sleep_on_no_work, "no_work"),
                        StepOutcome::Error => (self.sleep_on_error, "error"),
                    };
                    metrics::counter!("collector_job_tick_total", "job" => self.name, "outcome" => label).increment(1);
                    tokio::select! {
                        _ = tokio::time::sleep(sleep_for) => {}
                        _ = shutdown_rx.recv() => return Ok(()),
                    }
                }
                _ = shutdown_rx.recv() => {
                    warn!(job = self.name, "worker shutting down");
                    return Ok(());
                }
            }
        }
    }
}
