#[allow(dead_code)]
mod helpers;

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use collector::db::DbContext;
use collector::discovery::fake::FakeDiscoveryProvider;
use collector::discovery::{RemoteDomain, RemoteProject};
use collector::jobs::discovery::DiscoverySync;

/// §4.1: newly discovered projects get one ProjectService row per
/// configured service type, seeded stale so the scrape engine picks them
/// up immediately.
#[sqlx::test]
async fn new_project_seeds_a_project_service_row_per_configured_type(pool: PgPool) {
    let ctx = DbContext::new(pool.clone());
    let provider = Arc::new(FakeDiscoveryProvider::new());

    let domain_uuid = Uuid::new_v4();
    provider.set_domains(vec![RemoteDomain {
        uuid: domain_uuid,
        name: "acme".to_string(),
    }]);
    let project_uuid = Uuid::new_v4();
    provider.set_projects(
        domain_uuid,
        vec![RemoteProject {
            uuid: project_uuid,
            name: "acme-project".to_string(),
            parent_uuid: None,
        }],
    );

    let sync = DiscoverySync::new(
        ctx.clone(),
        provider.clone(),
        vec!["compute".to_string(), "storage".to_string()],
    );
    sync.sync_tenancy(true).await.unwrap();

    let project = ctx.projects().get_by_uuid(project_uuid).await.unwrap().unwrap();
    let compute = ctx.services().get_by_type("compute").await.unwrap().unwrap();
    let storage = ctx.services().get_by_type("storage").await.unwrap().unwrap();

    let (compute_stale, compute_next): (bool, chrono::DateTime<chrono::Utc>) = sqlx::query_as(
        "SELECT stale, next_scrape_at FROM project_services WHERE project_id = $1 AND service_id = $2",
    )
    .bind(project.id)
    .bind(compute.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!(compute_stale);
    assert!(compute_next <= chrono::Utc::now() + chrono::Duration::seconds(1));

    let storage_row: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM project_services WHERE project_id = $1 AND service_id = $2",
    )
    .bind(project.id)
    .bind(storage.id)
    .fetch_optional(&pool)
    .await
    .unwrap();
    assert!(storage_row.is_some());
}

/// §4.1 step 4: renamed domains/projects propagate over existing rows.
#[sqlx::test]
async fn rename_propagates_to_existing_rows(pool: PgPool) {
    let ctx = DbContext::new(pool.clone());
    let provider = Arc::new(FakeDiscoveryProvider::new());

    let domain_uuid = Uuid::new_v4();
    let project_uuid = Uuid::new_v4();
    provider.set_domains(vec![RemoteDomain {
        uuid: domain_uuid,
        name: "old-domain-name".to_string(),
    }]);
    provider.set_projects(
        domain_uuid,
        vec![RemoteProject {
            uuid: project_uuid,
            name: "old-project-name".to_string(),
            parent_uuid: None,
        }],
    );

    let sync = DiscoverySync::new(ctx.clone(), provider.clone(), vec!["compute".to_string()]);
    sync.sync_tenancy(true).await.unwrap();

    provider.set_domains(vec![RemoteDomain {
        uuid: domain_uuid,
        name: "new-domain-name".to_string(),
    }]);
    provider.set_projects(
        domain_uuid,
        vec![RemoteProject {
            uuid: project_uuid,
            name: "new-project-name".to_string(),
            parent_uuid: None,
        }],
    );
    sync.sync_tenancy(true).await.unwrap();

    let domain = ctx.domains().get_by_uuid(domain_uuid).await.unwrap().unwrap();
    let project = ctx.projects().get_by_uuid(project_uuid).await.unwrap().unwrap();
    assert_eq!(domain.name, "new-domain-name");
    assert_eq!(project.name, "new-project-name");
}

/// §4.1 step 2 / §7 Constraint: a project absent upstream with a blocking
/// commitment is refused, not deleted, and the sync surfaces an error while
/// still applying the rest of the reconciliation.
#[sqlx::test]
async fn project_with_blocking_commitment_is_not_deleted(pool: PgPool) {
    let ctx = DbContext::new(pool.clone());
    let provider = Arc::new(FakeDiscoveryProvider::new());

    let domain_uuid = Uuid::new_v4();
    let project_uuid = Uuid::new_v4();
    provider.set_domains(vec![RemoteDomain {
        uuid: domain_uuid,
        name: "acme".to_string(),
    }]);
    provider.set_projects(
        domain_uuid,
        vec![RemoteProject {
            uuid: project_uuid,
            name: "acme-project".to_string(),
            parent_uuid: None,
        }],
    );

    let sync = DiscoverySync::new(ctx.clone(), provider.clone(), vec!["compute".to_string()]);
    sync.sync_tenancy(true).await.unwrap();

    let project = ctx.projects().get_by_uuid(project_uuid).await.unwrap().unwrap();
    let service = ctx.services().get_by_type("compute").await.unwrap().unwrap();
    let resource_id: i64 = sqlx::query_scalar(
        "INSERT INTO resources (service_id, name, topology, has_quota) VALUES ($1, 'capacity', 'flat', true) RETURNING id",
    )
    .bind(service.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    let az_resource_id: i64 = sqlx::query_scalar(
        "INSERT INTO az_resources (resource_id, az) VALUES ($1, 'any') RETURNING id",
    )
    .bind(resource_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO project_commitments
            (uuid, project_id, az_resource_id, amount, duration, expires_at, status, creation_context_json)
         VALUES ($1, $2, $3, 10, 'P1Y', now() + INTERVAL '30 days', 'confirmed', '{}'::jsonb)",
    )
    .bind(Uuid::new_v4())
    .bind(project.id)
    .bind(az_resource_id)
    .execute(&pool)
    .await
    .unwrap();

    // Project now absent upstream.
    provider.set_projects(domain_uuid, vec![]);
    let result = sync.sync_tenancy(true).await;
    assert!(result.is_err(), "refused deletion should surface as an error");

    let still_present = ctx.projects().get_by_uuid(project_uuid).await.unwrap();
    assert!(still_present.is_some());
}
