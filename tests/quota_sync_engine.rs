#[allow(dead_code)]
mod helpers;

use std::sync::Arc;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use collector::jobs::quota_sync::QuotaSyncEngine;
use collector::jobs::queue::StepOutcome;
use collector::liquid::LiquidRegistry;
use collector::liquid::fake::FakeLiquidConnection;
use collector::topology::Topology;

fn azs() -> Vec<String> {
    vec!["az-one".to_string(), "az-two".to_string()]
}

async fn set_quota(pool: &PgPool, project_id: i64, resource_id: i64, quota: i64) {
    sqlx::query(
        "UPDATE project_resources SET quota = $1 WHERE project_id = $2 AND resource_id = $3",
    )
    .bind(quota)
    .bind(project_id)
    .bind(resource_id)
    .execute(pool)
    .await
    .unwrap();
}

async fn set_forbidden(pool: &PgPool, project_id: i64, resource_id: i64, backend_quota: i64) {
    sqlx::query(
        "UPDATE project_resources SET forbidden = true, backend_quota = $1
         WHERE project_id = $2 AND resource_id = $3",
    )
    .bind(backend_quota)
    .bind(project_id)
    .bind(resource_id)
    .execute(pool)
    .await
    .unwrap();
}

async fn mark_desynced(pool: &PgPool, project_id: i64) {
    sqlx::query("UPDATE project_services SET quota_desynced_at = now() WHERE project_id = $1")
        .bind(project_id)
        .execute(pool)
        .await
        .unwrap();
}

async fn ensure_project_resource(pool: &PgPool, project_id: i64, resource_id: i64) {
    sqlx::query(
        "INSERT INTO project_resources (project_id, resource_id) VALUES ($1, $2)
         ON CONFLICT (project_id, resource_id) DO NOTHING",
    )
    .bind(project_id)
    .bind(resource_id)
    .execute(pool)
    .await
    .unwrap();
}

/// P3 / S2: pushing `project_resources.quota` applies cleanly and clears
/// the desync marker.
#[sqlx::test]
async fn quota_round_trip_clears_desync_marker(pool: PgPool) {
    let info = helpers::service_info(
        "v1",
        vec![("capacity", helpers::resource_info(Topology::Flat, true))],
    );
    let fixture = helpers::seed_fixture(&pool, "unittest", &azs(), &info).await;
    let resource = fixture.ctx.services().resources_for(fixture.service_id).await.unwrap()[0].clone();

    ensure_project_resource(&pool, fixture.project_id, resource.id).await;
    set_quota(&pool, fixture.project_id, resource.id, 20).await;
    mark_desynced(&pool, fixture.project_id).await;

    let conn = Arc::new(FakeLiquidConnection::new(info));
    let mut liquid = LiquidRegistry::new();
    liquid.register("unittest", conn.clone());
    let engine = QuotaSyncEngine::new(fixture.ctx.clone(), liquid);
    let cancel = CancellationToken::new();

    let outcome = engine.sync_one("unittest", &cancel).await.unwrap();
    assert!(matches!(outcome, StepOutcome::Processed));

    let calls = conn.set_quota_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1.get("capacity").unwrap().total, 20);
    drop(calls);

    let project_resources = fixture
        .ctx
        .project_services()
        .project_resources_for(fixture.project_id)
        .await
        .unwrap();
    assert_eq!(project_resources[0].backend_quota, Some(20));

    let quota_desynced_at: Option<chrono::DateTime<chrono::Utc>> =
        sqlx::query_scalar("SELECT quota_desynced_at FROM project_services WHERE project_id = $1")
            .bind(fixture.project_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(quota_desynced_at.is_none());
}

/// P4 / S3: `SetQuota` failure backs the row off 30s so failure isolation
/// lets an older-desynced project proceed first.
#[sqlx::test]
async fn set_quota_failure_backs_off_and_isolates_other_projects(pool: PgPool) {
    let info = helpers::service_info(
        "v1",
        vec![("capacity", helpers::resource_info(Topology::Flat, true))],
    );

    let fixture_a = helpers::seed_fixture(&pool, "unittest", &azs(), &info).await;
    let resource = fixture_a
        .ctx
        .services()
        .resources_for(fixture_a.service_id)
        .await
        .unwrap()[0]
        .clone();
    ensure_project_resource(&pool, fixture_a.project_id, resource.id).await;
    set_quota(&pool, fixture_a.project_id, resource.id, 5).await;

    // Project A desynced first (older timestamp).
    sqlx::query("UPDATE project_services SET quota_desynced_at = now() - INTERVAL '1 minute' WHERE project_id = $1")
        .bind(fixture_a.project_id)
        .execute(&pool)
        .await
        .unwrap();

    let (_, _, _, project_b_id, _) = helpers::seed_domain_and_project(&pool).await;
    sqlx::query(
        "INSERT INTO project_services (project_id, service_id, next_scrape_at, stale)
         VALUES ($1, $2, now(), false)",
    )
    .bind(project_b_id)
    .bind(fixture_a.service_id)
    .execute(&pool)
    .await
    .unwrap();
    ensure_project_resource(&pool, project_b_id, resource.id).await;
    set_quota(&pool, project_b_id, resource.id, 9).await;
    mark_desynced(&pool, project_b_id).await;

    let conn = Arc::new(FakeLiquidConnection::new(info));
    conn.fail_set_quota(true);
    let mut liquid = LiquidRegistry::new();
    liquid.register("unittest", conn.clone());
    let engine = QuotaSyncEngine::new(fixture_a.ctx.clone(), liquid);
    let cancel = CancellationToken::new();

    // First sync_one picks A (older desync timestamp), fails, and backs off.
    let outcome = engine.sync_one("unittest", &cancel).await.unwrap();
    assert!(matches!(outcome, StepOutcome::Error));

    let a_desynced_at: chrono::DateTime<chrono::Utc> =
        sqlx::query_scalar("SELECT quota_desynced_at FROM project_services WHERE project_id = $1")
            .bind(fixture_a.project_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(a_desynced_at > chrono::Utc::now() + chrono::Duration::seconds(25));

    // Second sync_one should now pick B instead of retrying A immediately.
    conn.fail_set_quota(false);
    let outcome2 = engine.sync_one("unittest", &cancel).await.unwrap();
    assert!(matches!(outcome2, StepOutcome::Processed));

    let calls = conn.set_quota_calls.lock().unwrap();
    assert_eq!(calls.len(), 2, "first failed call plus the successful retry on B");
    let (project_uuid_str, request) = &calls[1];
    assert_eq!(request.get("capacity").unwrap().total, 9);
    let _ = project_uuid_str;
}

/// §4.3 step 1: a forbidden resource with a nonzero backend quota is
/// skipped (not pushed at all), not re-added as a 0-fill by step 2's
/// "missing from the DB map" rule.
#[sqlx::test]
async fn forbidden_resource_with_nonzero_backend_quota_is_not_pushed(pool: PgPool) {
    let info = helpers::service_info(
        "v1",
        vec![
            ("capacity", helpers::resource_info(Topology::Flat, true)),
            ("things", helpers::resource_info(Topology::Flat, true)),
        ],
    );
    let fixture = helpers::seed_fixture(&pool, "unittest", &azs(), &info).await;
    let resources = fixture.ctx.services().resources_for(fixture.service_id).await.unwrap();
    let capacity = resources.iter().find(|r| r.name == "capacity").unwrap().clone();
    let things = resources.iter().find(|r| r.name == "things").unwrap().clone();

    // `capacity` is forbidden with a nonzero backend quota: must be skipped.
    ensure_project_resource(&pool, fixture.project_id, capacity.id).await;
    set_forbidden(&pool, fixture.project_id, capacity.id, 7).await;

    // `things` genuinely needs apply, which triggers the sync at all.
    ensure_project_resource(&pool, fixture.project_id, things.id).await;
    set_quota(&pool, fixture.project_id, things.id, 20).await;
    mark_desynced(&pool, fixture.project_id).await;

    let conn = Arc::new(FakeLiquidConnection::new(info));
    let mut liquid = LiquidRegistry::new();
    liquid.register("unittest", conn.clone());
    let engine = QuotaSyncEngine::new(fixture.ctx.clone(), liquid);
    let cancel = CancellationToken::new();

    let outcome = engine.sync_one("unittest", &cancel).await.unwrap();
    assert!(matches!(outcome, StepOutcome::Processed));

    let calls = conn.set_quota_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let request = &calls[0].1;
    assert_eq!(request.get("things").unwrap().total, 20);
    assert!(
        !request.contains_key("capacity"),
        "forbidden resource must not be pushed, not even as a 0-fill"
    );
}

/// P9 / S6: az-separated resources push a per-AZ map summing to the
/// aggregate, ignoring `project_resources.quota` entirely.
#[sqlx::test]
async fn az_separated_resource_pushes_per_az_map_summing_to_total(pool: PgPool) {
    let info = helpers::service_info(
        "v1",
        vec![("capacity", helpers::resource_info(Topology::AzSeparated, true))],
    );
    let fixture = helpers::seed_fixture(&pool, "unittest", &azs(), &info).await;
    let resource = fixture.ctx.services().resources_for(fixture.service_id).await.unwrap()[0].clone();

    let az_rows = fixture.ctx.services().az_resources_for(resource.id).await.unwrap();
    ensure_project_resource(&pool, fixture.project_id, resource.id).await;
    // project_resources.quota stays at 0 for az-separated resources (§3).
    set_quota(&pool, fixture.project_id, resource.id, 0).await;

    for az_row in &az_rows {
        let quota = match az_row.az.as_str() {
            "az-one" => 50,
            "az-two" => 50,
            _ => 0,
        };
        sqlx::query(
            "INSERT INTO project_az_resources (project_id, az_resource_id, usage, quota)
             VALUES ($1, $2, 0, $3)
             ON CONFLICT (project_id, az_resource_id) DO UPDATE SET quota = EXCLUDED.quota",
        )
        .bind(fixture.project_id)
        .bind(az_row.id)
        .bind(quota)
        .execute(&pool)
        .await
        .unwrap();
    }
    mark_desynced(&pool, fixture.project_id).await;

    let conn = Arc::new(FakeLiquidConnection::new(info));
    let mut liquid = LiquidRegistry::new();
    liquid.register("unittest", conn.clone());
    let engine = QuotaSyncEngine::new(fixture.ctx.clone(), liquid);
    let cancel = CancellationToken::new();

    let outcome = engine.sync_one("unittest", &cancel).await.unwrap();
    assert!(matches!(outcome, StepOutcome::Processed));

    let calls = conn.set_quota_calls.lock().unwrap();
    let request = &calls[0].1;
    let capacity_request = request.get("capacity").unwrap();
    assert_eq!(capacity_request.total, 100);
    assert!(!capacity_request.per_az.contains_key("any"));
    assert!(!capacity_request.per_az.contains_key("unknown"));
    assert_eq!(capacity_request.per_az.get("az-one"), Some(&50));
    assert_eq!(capacity_request.per_az.get("az-two"), Some(&50));
    drop(calls);

    let project_resources = fixture
        .ctx
        .project_services()
        .project_resources_for(fixture.project_id)
        .await
        .unwrap();
    assert_eq!(project_resources[0].quota, Some(0));
}
