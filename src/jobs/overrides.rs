//! Quota-override application (C8, §4.5): applies a nested config-file
//! mapping onto `project_resources.override_quota_from_config`, then clears
//! any override no longer present in the map. Cron, ~3 min, 5 s initial
//! delay.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::db::DbContext;
use crate::error::Result;
use crate::jobs::cron::CronJob;
use crate::overrides::OverrideSource;
use crate::services::Service;

pub struct OverrideEngine {
    ctx: DbContext,
    source: Arc<dyn OverrideSource>,
}

impl OverrideEngine {
    pub fn new(ctx: DbContext, source: Arc<dyn OverrideSource>) -> Self {
        Self { ctx, source }
    }

    pub async fn apply(&self) -> Result<()> {
        let map = self.source.load().await?;

        let mut keep_ids: Vec<(i64, i64)> = Vec::new();
        let mut applied = 0usize;
        let mut ignored = 0usize;

        for (domain_name, projects) in &map {
            let Some(domain) = self.ctx.domains().get_by_name(domain_name).await? else {
                ignored += projects.values().map(|p| p.values().map(|r| r.len()).sum::<usize>()).sum::<usize>();
                continue;
            };

            for (project_name, service_types) in projects {
                let Some(project) = self.ctx.projects().get_by_name(domain.id, project_name).await? else {
                    ignored += service_types.values().map(|r| r.len()).sum::<usize>();
                    continue;
                };

                for (service_type, resources) in service_types {
                    let Some(service) = self.ctx.services().get_by_type(service_type).await? else {
                        ignored += resources.len();
                        continue;
                    };

                    for (resource_name, quota) in resources {
                        let Some(resource) = self.ctx.services().resource_by_name(service.id, resource_name).await?
                        else {
                            ignored += 1;
                            continue;
                        };

                        self.ctx
                            .project_services()
                            .apply_override(project.id, resource.id, *quota)
                            .await?;
                        keep_ids.push((project.id, resource.id));
                        applied += 1;
                    }
                }
            }
        }

        let cleared = self.ctx.project_services().clear_stale_overrides(&keep_ids).await?;

        if ignored > 0 {
            warn!(ignored, "ignored override entries for undiscovered domains/projects/services/resources");
        }
        info!(applied, cleared, "applied quota overrides");
        Ok(())
    }
}

pub struct OverrideService {
    engine: OverrideEngine,
    interval: Duration,
    shutdown_rx: Option<broadcast::Receiver<()>>,
}

impl OverrideService {
    pub fn new(engine: OverrideEngine, interval: Duration, shutdown_rx: broadcast::Receiver<()>) -> Self {
        Self {
            engine,
            interval,
            shutdown_rx: Some(shutdown_rx),
        }
    }
}

#[async_trait]
impl Service for OverrideService {
    fn name(&self) -> &'static str {
        "overrides"
    }

    async fn run(&mut self) -> std::result::Result<(), anyhow::Error> {
        let shutdown_rx = self.shutdown_rx.take().expect("run called twice");
        let cron = CronJob {
            name: "overrides",
            interval: self.interval,
            max_initial_delay: Duration::from_secs(5),
        };
        let engine = &self.engine;
        cron.run(shutdown_rx, move |_cancel: CancellationToken| async move {
            engine.apply().await.map_err(anyhow::Error::from)
        })
        .await
    }

    async fn shutdown(&mut self) -> std::result::Result<(), anyhow::Error> {
        Ok(())
    }
}
