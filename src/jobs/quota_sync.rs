//! Quota sync engine (C6, §4.3): computes effective backend quota per
//! resource (topology-aware), invokes `SetQuota`, marks applied. Same
//! producer/consumer shape as the scrape engine, ordered by oldest
//! `quota_desynced_at` first.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::db::DbContext;
use crate::db::project_service::{sum_az_quotas, AppliedQuota};
use crate::error::{CollectorError, Result};
use crate::jobs::queue::{StepOutcome, Worker};
use crate::liquid::{LiquidRegistry, QuotaRequest};
use crate::services::Service;
use crate::topology::Topology;

pub struct QuotaSyncEngine {
    ctx: DbContext,
    liquid: LiquidRegistry,
}

impl QuotaSyncEngine {
    pub fn new(ctx: DbContext, liquid: LiquidRegistry) -> Self {
        Self { ctx, liquid }
    }

    /// `SyncOne(serviceType)` — §4.3.
    pub async fn sync_one(&self, service_type: &str, cancel: &CancellationToken) -> Result<StepOutcome> {
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

        let Some(project_service) = self.ctx.project_services().find_next_desynced(service.id).await? else {
            return Ok(StepOutcome::NoWork);
        };

        let Some(project) = self.ctx.projects().get_by_id(project_service.project_id).await? else {
            return Ok(StepOutcome::NoWork);
        };

        let resources = self.ctx.services().resources_for(service.id).await?;
        let project_resources = self
            .ctx
            .project_services()
            .project_resources_for(project.id)
            .await?;
        let by_resource_id: HashMap<i64, &crate::db::models::ProjectResourceRow> =
            project_resources.iter().map(|r| (r.resource_id, r)).collect();

        // §4.3 step 1: per-resource target quota + needs-apply detection.
        let mut applied = Vec::new();
        let mut request: HashMap<String, QuotaRequest> = HashMap::new();
        let mut needs_apply = false;
        // Resources deliberately skipped at step 1 (forbidden with a
        // nonzero backend quota) must stay un-pushed, not be swept into the
        // step 2 "missing from the DB map" 0-fill below.
        let mut skipped_forbidden: std::collections::HashSet<&str> = std::collections::HashSet::new();

        // Defense against stale DB rows referencing removed resources
        // (§4.3 step 2): restrict the request to resources the *current*
        // backend service info still declares.
        let info = conn.service_info(cancel).await?;

        for resource in resources.iter().filter(|r| r.has_quota) {
            let Some(project_resource) = by_resource_id.get(&resource.id) else {
                continue;
            };

            if project_resource.forbidden && project_resource.backend_quota.unwrap_or(0) != 0 {
                skipped_forbidden.insert(resource.name.as_str());
                continue;
            }

            let in_current_info = info.resources.contains_key(&resource.name);

            if resource.topology == Topology::AzSeparated {
                let az_rows = self
                    .ctx
                    .project_services()
                    .project_az_resources_for_resource(project.id, resource.id)
                    .await?;
                let total = sum_az_quotas(&az_rows);
                let per_az: Vec<(i64, i64)> = az_rows
                    .iter()
                    .filter(|(_, az)| {
                        az.as_str() != crate::topology::AZ_ANY && az.as_str() != crate::topology::AZ_UNKNOWN
                    })
                    .map(|(row, _)| (row.az_resource_id, row.quota.unwrap_or(0)))
                    .collect();

                let current_backend_total: i64 = az_rows
                    .iter()
                    .map(|(row, _)| row.backend_quota.unwrap_or(0))
                    .sum();
                if total != current_backend_total {
                    needs_apply = true;
                }

                if in_current_info {
                    request.insert(
                        resource.name.clone(),
                        QuotaRequest {
                            total,
                            per_az: per_az
                                .iter()
                                .filter_map(|(az_resource_id, q)| {
                                    az_rows
                                        .iter()
                                        .find(|(row, _)| row.az_resource_id == *az_resource_id)
                                        .map(|(_, az)| (az.clone(), *q))
                                })
                                .collect(),
                        },
                    );
                }
                applied.push(AppliedQuota {
                    resource_id: resource.id,
                    total,
                    per_az,
                });
            } else {
                let quota = project_resource.quota.unwrap_or(0);
                if quota != project_resource.backend_quota.unwrap_or(0) {
                    needs_apply = true;
                }
                if in_current_info {
                    request.insert(
                        resource.name.clone(),
                        QuotaRequest {
                            total: quota,
                            per_az: HashMap::new(),
                        },
                    );
                }
                applied.push(AppliedQuota {
                    resource_id: resource.id,
                    total: quota,
                    per_az: Vec::new(),
                });
            }
        }

        // Resources missing from the DB's view of the current info still
        // need a push so the backend doesn't keep stale quota (§4.3 step 2:
        // "resources missing from the DB map push 0").
        for (name, _) in &info.resources {
            if !request.contains_key(name) && !skipped_forbidden.contains(name.as_str()) {
                request.insert(
                    name.clone(),
                    QuotaRequest {
                        total: 0,
                        per_az: HashMap::new(),
                    },
                );
            }
        }

        if !needs_apply {
            // Nothing actually diverges; clear the marker so this row
            // doesn't spin forever if it was set defensively.
            self.ctx
                .project_services()
                .mark_quota_sync_success(project_service.id, project.id, &[], 0.0)
                .await?;
            return Ok(StepOutcome::Processed);
        }

        let started_at = Instant::now();
        match conn.set_quota(&project.uuid.to_string(), &request, cancel).await {
            Ok(()) => {
                let duration = started_at.elapsed().as_secs_f64();
                self.ctx
                    .project_services()
                    .mark_quota_sync_success(project_service.id, project.id, &applied, duration)
                    .await?;
                info!(service_type, project = %project.uuid, "quota sync succeeded");
                Ok(StepOutcome::Processed)
            }
            Err(e) => {
                let duration = started_at.elapsed().as_secs_f64();
                // §4.3 step 3 / P4: delay this row past others with an older
                // `quota_desynced_at` so one bad backend can't starve the rest.
                let retry_at = Utc::now() + chrono::Duration::seconds(30);
                self.ctx
                    .project_services()
                    .mark_quota_sync_failure(project_service.id, retry_at, duration)
                    .await?;
                warn!(service_type, project = %project.uuid, error = %e, "quota sync failed, backing off 30s");
                Ok(StepOutcome::Error)
            }
        }
    }
}

/// Wraps [`QuotaSyncEngine`] as a [`Service`] over one service type.
pub struct QuotaSyncService {
    engine: Arc<QuotaSyncEngine>,
    service_type: String,
    shutdown_rx: Option<broadcast::Receiver<()>>,
}

impl QuotaSyncService {
    pub fn new(engine: Arc<QuotaSyncEngine>, service_type: String, shutdown_rx: broadcast::Receiver<()>) -> Self {
        Self {
            engine,
            service_type,
            shutdown_rx: Some(shutdown_rx),
        }
    }
}

#[async_trait]
impl Service for QuotaSyncService {
    fn name(&self) -> &'static str {
        "quota_sync"
    }

    async fn run(&mut self) -> std::result::Result<(), anyhow::Error> {
        let shutdown_rx = self.shutdown_rx.take().expect("run called twice");
        let worker = Worker {
            name: "quota_sync",
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
                    match engine.sync_one(&service_type, &cancel).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            warn!(service_type, error = %e, "quota sync step failed");
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
