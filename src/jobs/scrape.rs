//! Scrape engine (C5, §4.2): per-(project,service) usage/quota/rate scrape,
//! transactional write of `project_resources`/`project_az_resources`, and
//! dummy-record fallback on first-scrape failure. Driven by a
//! producer/consumer `jobs::queue::Worker` loop, grounded in the teacher's
//! `scraper::worker::Worker`.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clock::jitter;
use crate::db::DbContext;
use crate::db::project_service::ScrapeSuccessInput;
use crate::error::{CollectorError, Result};
use crate::jobs::queue::{StepOutcome, Worker};
use crate::liquid::LiquidRegistry;
use crate::services::Service;

pub struct ScrapeEngine {
    ctx: DbContext,
    liquid: LiquidRegistry,
    availability_zones: Vec<String>,
    scrape_interval: Duration,
    recheck_interval: Duration,
    history_retention: ChronoDuration,
}

impl ScrapeEngine {
    pub fn new(
        ctx: DbContext,
        liquid: LiquidRegistry,
        availability_zones: Vec<String>,
        scrape_interval: Duration,
        recheck_interval: Duration,
        history_retention: ChronoDuration,
    ) -> Self {
        Self {
            ctx,
            liquid,
            availability_zones,
            scrape_interval,
            recheck_interval,
            history_retention,
        }
    }

    /// `ScrapeOne(serviceType)` — pick and process exactly one row (§4.2).
    pub async fn scrape_one(&self, service_type: &str, cancel: &CancellationToken) -> Result<StepOutcome> {
        let Some(service) = self.ctx.services().get_by_type(service_type).await? else {
            return Err(CollectorError::Config(format!(
                "unknown service type '{service_type}' requested by this process's configuration"
            )));
        };

        let Some(conn) = self.liquid.get(service_type) else {
            return Err(CollectorError::Config(format!(
                "no LIQUID connection configured for service type '{service_type}'"
            )));
        };

        let Some(target) = self.ctx.project_services().find_next_to_scrape(service.id).await? else {
            return Ok(StepOutcome::NoWork);
        };

        let started_at = Instant::now();
        let now = Utc::now();

        // §4.2 step 2: backend-schema evolution.
        let info = conn.service_info(cancel).await?;
        if info.version != service.liquid_version {
            info!(
                service_type,
                old_version = service.liquid_version,
                new_version = info.version,
                "LIQUID schema version changed, re-materializing schema"
            );
            self.ctx
                .services()
                .materialize_schema(service.id, &self.availability_zones, &info)
                .await?;
        }

        let resources = self.ctx.services().resources_for(service.id).await?;
        let project_uuid = target.project.uuid.to_string();

        // §4.2 step 3: GetUsageReport, with first-scrape dummy fallback.
        let usage_report = match conn
            .get_usage_report(&project_uuid, &self.availability_zones, cancel)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                return self
                    .handle_scrape_failure(&target, &resources, e.to_string())
                    .await;
            }
        };

        // §4.2 step 4: validate against ServiceInfo.
        if let Err(msg) = self.validate_report(&info, &resources, &usage_report) {
            return self.handle_scrape_failure(&target, &resources, msg).await;
        }

        // §4.2 step 5: GetRates, same failure handling.
        let prior_state = target.project_service.serialized_scrape_state.clone();
        let rates_report = match conn
            .get_rates(&project_uuid, &self.availability_zones, prior_state.as_deref(), cancel)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                return self
                    .handle_scrape_failure(&target, &resources, e.to_string())
                    .await;
            }
        };

        let scrape_duration_secs = started_at.elapsed().as_secs_f64();
        if scrape_duration_secs > 300.0 {
            warn!(
                service_type,
                project = %target.project.uuid,
                elapsed = scrape_duration_secs,
                "scrape transaction exceeded 5 minute soft warning threshold"
            );
        }

        let next_scrape_at = now + jitter(self.scrape_interval);
        let any_desynced = self
            .ctx
            .project_services()
            .write_scrape_success(ScrapeSuccessInput {
                project_id: target.project.id,
                service_id: service.id,
                project_service_id: target.project_service.id,
                resources: &resources,
                usage_report: &usage_report,
                rates_report: &rates_report,
                now,
                next_scrape_at,
                scrape_duration_secs,
                history_retention: self.history_retention,
            })
            .await?;

        info!(
            service_type,
            project = %target.project.uuid,
            desynced = any_desynced,
            "scrape completed"
        );
        Ok(StepOutcome::Processed)
    }

    fn validate_report(
        &self,
        info: &crate::liquid::ServiceInfo,
        resources: &[crate::db::models::ResourceRow],
        report: &crate::liquid::UsageReport,
    ) -> std::result::Result<(), String> {
        for resource in resources {
            let Some(reported) = report.resources.get(&resource.name) else {
                return Err(format!(
                    "backend did not report declared resource '{}'",
                    resource.name
                ));
            };
            let reported_azs: Vec<String> = reported.per_az.keys().cloned().collect();
            resource
                .topology
                .validate_reported_azs(&self.availability_zones, &reported_azs)?;

            // §4.2 step 4: "`any`/`unknown` must not carry quota in az-separated".
            for (az, per_az) in &reported.per_az {
                if per_az.quota.is_some() && !resource.topology.az_may_carry_quota(az) {
                    return Err(format!(
                        "resource '{}' reported quota on AZ '{}', which may not carry quota under this topology",
                        resource.name, az
                    ));
                }
            }
        }
        let _ = info;
        Ok(())
    }

    /// §4.2 step 3 failure handling, shared between usage-report and
    /// rates failures (and validation failures, per §7's "treat as
    /// transient backend" rule): write dummy resources on first scrape,
    /// record the error, schedule a recheck, never set `quota_desynced_at`.
    async fn handle_scrape_failure(
        &self,
        target: &crate::db::project_service::ScrapeTarget,
        resources: &[crate::db::models::ResourceRow],
        message: String,
    ) -> Result<StepOutcome> {
        if target.project_service.scraped_at.is_none() {
            self.ctx
                .project_services()
                .write_dummy_resources(target.project.id, target.project_service.id, resources)
                .await?;
        }

        let next_scrape_at = Utc::now() + jitter(self.recheck_interval);
        self.ctx
            .project_services()
            .write_scrape_error(target.project_service.id, &message, next_scrape_at)
            .await?;

        warn!(
            project = %target.project.uuid,
            error = message,
            "scrape failed"
        );
        Ok(StepOutcome::Error)
    }
}

/// Wraps [`ScrapeEngine`] as a [`Service`] over one service type, looping via
/// `jobs::queue::Worker` (discover one task -> process -> sleep on no work).
pub struct ScrapeService {
    engine: Arc<ScrapeEngine>,
    service_type: String,
    shutdown_rx: Option<broadcast::Receiver<()>>,
}

impl ScrapeService {
    pub fn new(engine: Arc<ScrapeEngine>, service_type: String, shutdown_rx: broadcast::Receiver<()>) -> Self {
        Self {
            engine,
            service_type,
            shutdown_rx: Some(shutdown_rx),
        }
    }
}

#[async_trait]
impl Service for ScrapeService {
    fn name(&self) -> &'static str {
        "scrape"
    }

    async fn run(&mut self) -> std::result::Result<(), anyhow::Error> {
        let shutdown_rx = self.shutdown_rx.take().expect("run called twice");
        let worker = Worker {
            name: "scrape",
            sleep_on_no_work: Duration::from_secs(5),
            sleep_on_error: Duration::from_secs(5),
        };
        let engine = self.engine.clone();
        let service_type = self.service_type.clone();
        worker
            .run(shutdown_rx, move || {
                let engine = engine.clone();
                let service_type = service_type.clone();
                async move {
                    let cancel = CancellationToken::new();
                    match engine.scrape_one(&service_type, &cancel).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            warn!(service_type, error = %e, "scrape step failed");
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
