//! Discovery sync (C4, §4.1): reconciles domains/projects into the DB and
//! seeds a `ProjectService` row per configured service type for every newly
//! discovered project. Runs as a cron job (`jobs::cron::CronJob`) every ~3
//! minutes, grounded on the teacher's `scraper::scheduler::Scheduler` shape.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::db::DbContext;
use crate::db::domains::DiscoveredDomain;
use crate::db::projects::DiscoveredProject;
use crate::discovery::DiscoveryProvider;
use crate::error::Result;
use crate::jobs::cron::CronJob;
use crate::services::Service;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub struct DiscoverySync {
    ctx: DbContext,
    provider: Arc<dyn DiscoveryProvider>,
    service_types: Vec<String>,
}

impl DiscoverySync {
    pub fn new(ctx: DbContext, provider: Arc<dyn DiscoveryProvider>, service_types: Vec<String>) -> Self {
        Self {
            ctx,
            provider,
            service_types,
        }
    }

    /// `SyncTenancy(scanAllProjects)` — §4.1. Scanning all projects on every
    /// tick is permitted by spec, so `scan_all_projects` is currently
    /// accepted but not used to narrow the scan; it documents the contract
    /// for callers that may want to restrict it in the future.
    pub async fn sync_tenancy(&self, _scan_all_projects: bool) -> Result<()> {
        let remote_domains = self.provider.list_domains().await?;
        let keep_domain_uuids: Vec<_> = remote_domains.iter().map(|d| d.uuid).collect();

        let mut domain_ids = Vec::with_capacity(remote_domains.len());
        for remote in &remote_domains {
            let id = self
                .ctx
                .domains()
                .upsert(&DiscoveredDomain {
                    uuid: remote.uuid,
                    name: remote.name.clone(),
                })
                .await?;
            domain_ids.push((id, remote.uuid));
        }

        let deleted_domains = self.ctx.domains().delete_absent(&keep_domain_uuids).await?;
        if deleted_domains > 0 {
            info!(count = deleted_domains, "removed domains absent upstream");
        }

        // Make sure a `services` row exists for every configured service
        // type before seeding project_services for new projects.
        let mut service_ids = Vec::with_capacity(self.service_types.len());
        for service_type in &self.service_types {
            service_ids.push(self.ctx.services().ensure(service_type).await?);
        }

        let mut refused_total = Vec::new();
        for (domain_id, domain_uuid) in domain_ids {
            let remote_projects = self.provider.list_projects(domain_uuid).await?;
            let keep_project_uuids: Vec<_> = remote_projects.iter().map(|p| p.uuid).collect();

            for remote in &remote_projects {
                let (project_id, was_new) = self
                    .ctx
                    .projects()
                    .upsert(
                        domain_id,
                        &DiscoveredProject {
                            uuid: remote.uuid,
                            name: remote.name.clone(),
                            parent_uuid: remote.parent_uuid,
                        },
                    )
                    .await?;

                if was_new {
                    for service_id in &service_ids {
                        self.ctx
                            .project_services()
                            .ensure_for_project(project_id, *service_id)
                            .await?;
                    }
                }
            }

            let refused = self
                .ctx
                .projects()
                .delete_absent(domain_id, &keep_project_uuids)
                .await?;
            refused_total.extend(refused);
        }

        if !refused_total.is_empty() {
            warn!(
                refused = ?refused_total,
                "refused to delete {} project(s) with blocking commitments",
                refused_total.len()
            );
            return Err(crate::db::projects::ProjectOps::refusal_error(
                &refused_total,
            ));
        }

        Ok(())
    }
}

/// Wraps [`DiscoverySync`] as a [`Service`], firing every `interval` with a
/// small random initial delay (§4.6's cron shape).
pub struct DiscoverySyncService {
    sync: DiscoverySync,
    interval: Duration,
    shutdown_rx: Option<broadcast::Receiver<()>>,
}

impl DiscoverySyncService {
    pub fn new(sync: DiscoverySync, interval: Duration, shutdown_rx: broadcast::Receiver<()>) -> Self {
        Self {
            sync,
            interval,
            shutdown_rx: Some(shutdown_rx),
        }
    }
}

#[async_trait]
impl Service for DiscoverySyncService {
    fn name(&self) -> &'static str {
        "discovery_sync"
    }

    async fn run(&mut self) -> std::result::Result<(), anyhow::Error> {
        let shutdown_rx = self.shutdown_rx.take().expect("run called twice");
        let cron = CronJob {
            name: "discovery_sync",
            interval: self.interval,
            max_initial_delay: Duration::from_secs(10),
        };
        let sync = &self.sync;
        cron.run(shutdown_rx, move |_cancel: CancellationToken| async move {
            sync.sync_tenancy(true).await.map_err(anyhow::Error::from)
        })
        .await
    }

    async fn shutdown(&mut self) -> std::result::Result<(), anyhow::Error> {
        Ok(())
    }
}
