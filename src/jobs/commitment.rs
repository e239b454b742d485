//! Commitment lifecycle (C7, §4.4): two independent jobs sharing the
//! `project_commitments` state machine — a cron expiry/cleanup sweep and a
//! producer/consumer expiring-soon notifier.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::db::DbContext;
use crate::db::models::ProjectCommitmentRow;
use crate::error::Result;
use crate::jobs::cron::CronJob;
use crate::jobs::queue::{StepOutcome, Worker};
use crate::mail::{CommitmentLine, MailContext, MailRenderer};
use crate::services::Service;

/// The end of the calendar month after `now`'s month, exclusive upper bound
/// for the notify job's discovery window (§4.4).
fn end_of_next_calendar_month(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    Utc.with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .single()
        .expect("valid first-of-month timestamp")
}

/// Step A (expire) + Step B (hard-delete past grace) — §4.4 Expiry/cleanup.
pub struct ExpiryEngine {
    ctx: DbContext,
}

impl ExpiryEngine {
    pub fn new(ctx: DbContext) -> Self {
        Self { ctx }
    }

    pub async fn sweep(&self) -> Result<()> {
        let now = Utc::now();
        let expired = self.ctx.commitments().expire_due(now).await?;
        if expired > 0 {
            info!(count = expired, "expired commitments past their expires_at");
        }
        let deleted = self.ctx.commitments().delete_past_grace(now).await?;
        if !deleted.is_empty() {
            info!(count = deleted.len(), "hard-deleted commitments past grace period");
        }
        Ok(())
    }
}

pub struct ExpiryService {
    engine: ExpiryEngine,
    interval: Duration,
    shutdown_rx: Option<broadcast::Receiver<()>>,
}

impl ExpiryService {
    pub fn new(engine: ExpiryEngine, interval: Duration, shutdown_rx: broadcast::Receiver<()>) -> Self {
        Self {
            engine,
            interval,
            shutdown_rx: Some(shutdown_rx),
        }
    }
}

#[async_trait]
impl Service for ExpiryService {
    fn name(&self) -> &'static str {
        "commitment_expiry"
    }

    async fn run(&mut self) -> std::result::Result<(), anyhow::Error> {
        let shutdown_rx = self.shutdown_rx.take().expect("run called twice");
        let cron = CronJob {
            name: "commitment_expiry",
            interval: self.interval,
            max_initial_delay: Duration::from_secs(10),
        };
        let engine = &self.engine;
        cron.run(shutdown_rx, move |_cancel: CancellationToken| async move {
            engine.sweep().await.map_err(anyhow::Error::from)
        })
        .await
    }

    async fn shutdown(&mut self) -> std::result::Result<(), anyhow::Error> {
        Ok(())
    }
}

/// Expiring-soon notification — §4.4 producer/consumer job.
pub struct NotifyEngine {
    ctx: DbContext,
    renderer: Arc<dyn MailRenderer>,
}

impl NotifyEngine {
    pub fn new(ctx: DbContext, renderer: Arc<dyn MailRenderer>) -> Self {
        Self { ctx, renderer }
    }

    pub async fn notify_one(&self) -> Result<StepOutcome> {
        let now = Utc::now();
        let until = end_of_next_calendar_month(now);
        let rows = self.ctx.commitments().find_expiring_soon(now, until).await?;
        let Some(first) = rows.first() else {
            return Ok(StepOutcome::NoWork);
        };

        let project_id = first.project_id;
        let group: Vec<&ProjectCommitmentRow> = rows.iter().take_while(|r| r.project_id == project_id).collect();

        let Some(project) = self.ctx.projects().get_by_id(project_id).await? else {
            // Project vanished between discovery and processing; skip this
            // group rather than fail the whole tick, it will be picked up
            // again if it reappears (it won't, since deletion is one-way).
            return Ok(StepOutcome::NoWork);
        };
        let Some(domain) = self.ctx.domains().get_by_id(project.domain_id).await? else {
            return Ok(StepOutcome::NoWork);
        };

        let mut lines = Vec::with_capacity(group.len());
        for commitment in &group {
            let resource_name = self
                .ctx
                .services()
                .resource_name_for_az_resource(commitment.az_resource_id)
                .await?
                .unwrap_or_else(|| "unknown resource".to_string());
            lines.push(CommitmentLine {
                commitment_uuid: commitment.uuid.to_string(),
                resource_name,
                date_string: commitment.expires_at.to_rfc3339(),
            });
        }

        let ctx = MailContext {
            domain_name: domain.name,
            project_name: project.name,
            commitments: lines,
        };

        let (subject, body) = match self.renderer.render(&ctx).await {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!(project = %project.uuid, error = %e, "mail rendering failed, retrying next tick");
                return Ok(StepOutcome::Error);
            }
        };

        let ids: Vec<i64> = group.iter().map(|c| c.id).collect();
        self.ctx
            .commitments()
            .notify_group(project_id, &subject, &body, &ids)
            .await?;

        info!(project = %project.uuid, count = ids.len(), "notified expiring commitments");
        Ok(StepOutcome::Processed)
    }
}

pub struct NotifyService {
    engine: Arc<NotifyEngine>,
    shutdown_rx: Option<broadcast::Receiver<()>>,
}

impl NotifyService {
    pub fn new(engine: Arc<NotifyEngine>, shutdown_rx: broadcast::Receiver<()>) -> Self {
        Self {
            engine,
            shutdown_rx: Some(shutdown_rx),
        }
    }
}

#[async_trait]
impl Service for NotifyService {
    fn name(&self) -> &'static str {
        "commitment_notify"
    }

    async fn run(&mut self) -> std::result::Result<(), anyhow::Error> {
        let shutdown_rx = self.shutdown_rx.take().expect("run called twice");
        let worker = Worker {
            name: "commitment_notify",
            sleep_on_no_work: Duration::from_secs(15),
            sleep_on_error: Duration::from_secs(15),
        };
        let engine = self.engine.clone();
        worker
            .run(shutdown_rx, move || {
                let engine = engine.clone();
                async move {
                    match engine.notify_one().await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            warn!(error = %e, "commitment notify step failed");
                            StepOutcome::Error
                        }
                    }
                }
            })
            .await
    }

    async fn shutdown(&mut self) -> std::result::Result<(), anyhow::Error> {
        Ok(())
    }
}
