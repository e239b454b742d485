#![allow(dead_code)]

//! Shared fixtures for the Collector's integration tests: seed a
//! domain/project/service/resource shape directly through [`DbContext`] the
//! way `jobs::discovery`/`jobs::services` would, then hand back fake
//! backends the job engines can be pointed at.

use std::collections::HashMap;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use collector::db::DbContext;
use collector::db::domains::DiscoveredDomain;
use collector::db::projects::DiscoveredProject;
use collector::liquid::{PerAzUsage, ResourceInfo, ResourceUsage, ServiceInfo, UsageReport};
use collector::topology::Topology;

/// One seeded (domain, project, service) triple, with the service's
/// `ServiceInfo` already materialized into `resources`/`az_resources`.
pub struct Fixture {
    pub ctx: DbContext,
    pub domain_id: i64,
    pub domain_name: String,
    pub project_id: i64,
    pub project_uuid: Uuid,
    pub service_id: i64,
    pub service_type: String,
}

pub async fn seed_domain_and_project(pool: &PgPool) -> (DbContext, i64, String, i64, Uuid) {
    let ctx = DbContext::new(pool.clone());
    let domain_uuid = Uuid::new_v4();
    let domain_name = format!("domain-{domain_uuid}");
    let domain_id = ctx
        .domains()
        .upsert(&DiscoveredDomain {
            uuid: domain_uuid,
            name: domain_name.clone(),
        })
        .await
        .expect("domain upsert");

    let project_uuid = Uuid::new_v4();
    let (project_id, was_new) = ctx
        .projects()
        .upsert(
            domain_id,
            &DiscoveredProject {
                uuid: project_uuid,
                name: format!("project-{project_uuid}"),
                parent_uuid: None,
            },
        )
        .await
        .expect("project upsert");
    assert!(was_new);

    (ctx, domain_id, domain_name, project_id, project_uuid)
}

/// Seeds a domain/project plus a `services` row for `service_type`,
/// materializes `info`'s resources/az_resources against it, and creates the
/// `project_services` row the scrape/sync engines discover work through.
pub async fn seed_fixture(pool: &PgPool, service_type: &str, azs: &[String], info: &ServiceInfo) -> Fixture {
    let (ctx, domain_id, domain_name, project_id, project_uuid) = seed_domain_and_project(pool).await;

    let service_id = ctx.services().ensure(service_type).await.expect("ensure service");
    ctx.services()
        .materialize_schema(service_id, azs, info)
        .await
        .expect("materialize schema");
    ctx.project_services()
        .ensure_for_project(project_id, service_id)
        .await
        .expect("ensure project_service");

    Fixture {
        ctx,
        domain_id,
        domain_name,
        project_id,
        project_uuid,
        service_id,
        service_type: service_type.to_string(),
    }
}

pub fn resource_info(topology: Topology, has_quota: bool) -> ResourceInfo {
    ResourceInfo {
        unit: "B".to_string(),
        topology,
        has_quota,
        has_capacity: true,
        needs_resource_demand: false,
        autogrow: false,
    }
}

/// Same as [`resource_info`] but flagged `autogrow`, so historical usage is
/// expected to be maintained (spec.md §3).
pub fn resource_info_autogrow(topology: Topology, has_quota: bool) -> ResourceInfo {
    ResourceInfo {
        autogrow: true,
        ..resource_info(topology, has_quota)
    }
}

pub fn service_info(version: &str, resources: Vec<(&str, ResourceInfo)>) -> ServiceInfo {
    ServiceInfo {
        version: version.to_string(),
        resources: resources.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        rates: HashMap::new(),
        usage_metric_families: HashMap::new(),
    }
}

/// Builds a `UsageReport` from `(resource_name, quota, {az: usage})` triples,
/// with `forbidden` left unset and no subresources, the common case for the
/// scrape-engine tests.
pub fn usage_report(info_version: &str, resources: Vec<(&str, Option<i64>, Vec<(&str, i64)>)>) -> UsageReport {
    let mut map = HashMap::new();
    for (name, quota, per_az) in resources {
        let per_az_map = per_az
            .into_iter()
            .map(|(az, usage)| {
                (
                    az.to_string(),
                    PerAzUsage {
                        usage,
                        physical_usage: None,
                        subresources: None,
                        quota: None,
                    },
                )
            })
            .collect();
        map.insert(
            name.to_string(),
            ResourceUsage {
                quota,
                forbidden: None,
                per_az: per_az_map,
            },
        );
    }
    UsageReport {
        info_version: info_version.to_string(),
        resources: map,
        metrics: HashMap::new(),
        serialized_state: None,
    }
}

/// An az-separated `ResourceUsage` with an explicit per-AZ quota for each
/// `(az, usage, quota)` triple, used by S6.
pub fn az_separated_usage(per_az: Vec<(&str, i64, i64)>) -> ResourceUsage {
    ResourceUsage {
        quota: None,
        forbidden: None,
        per_az: per_az
            .into_iter()
            .map(|(az, usage, quota)| {
                (
                    az.to_string(),
                    PerAzUsage {
                        usage,
                        physical_usage: None,
                        subresources: None,
                        quota: Some(quota),
                    },
                )
            })
            .collect(),
    }
}

pub fn now() -> chrono::DateTime<Utc> {
    Utc::now()
}
