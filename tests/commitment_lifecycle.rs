#[allow(dead_code)]
mod helpers;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use collector::db::models::CommitmentStatus;
use collector::error::Result;
use collector::jobs::commitment::{ExpiryEngine, NotifyEngine};
use collector::jobs::queue::StepOutcome;
use collector::mail::{MailContext, MailRenderer};

async fn seed_az_resource(pool: &PgPool, service_id: i64) -> i64 {
    let resource_id: i64 = sqlx::query_scalar(
        "INSERT INTO resources (service_id, name, topology, has_quota) VALUES ($1, 'capacity', 'flat', true) RETURNING id",
    )
    .bind(service_id)
    .fetch_one(pool)
    .await
    .unwrap();
    sqlx::query_scalar("INSERT INTO az_resources (resource_id, az) VALUES ($1, 'any') RETURNING id")
        .bind(resource_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

struct Commitment {
    uuid: Uuid,
    id: i64,
}

async fn insert_commitment(
    pool: &PgPool,
    project_id: i64,
    az_resource_id: i64,
    status: CommitmentStatus,
    expires_at: chrono::DateTime<Utc>,
    supersede_context: Option<serde_json::Value>,
) -> Commitment {
    let uuid = Uuid::new_v4();
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO project_commitments
            (uuid, project_id, az_resource_id, amount, duration, expires_at, status,
             creation_context_json, supersede_context_json)
         VALUES ($1, $2, $3, 10, 'P1Y', $4, $5, '{}'::jsonb, $6)
         RETURNING id",
    )
    .bind(uuid)
    .bind(project_id)
    .bind(az_resource_id)
    .bind(expires_at)
    .bind(status)
    .bind(supersede_context)
    .fetch_one(pool)
    .await
    .unwrap();
    Commitment { uuid, id }
}

async fn status_of(pool: &PgPool, id: i64) -> CommitmentStatus {
    sqlx::query_scalar("SELECT status FROM project_commitments WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn exists(pool: &PgPool, id: i64) -> bool {
    sqlx::query_scalar::<_, i64>("SELECT id FROM project_commitments WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .unwrap()
        .is_some()
}

/// P5 / S4: confirmed -> expired at t+ε, untouched at t+10d, deleted at t+31d.
#[sqlx::test]
async fn commitment_expiry_ladder(pool: PgPool) {
    let (ctx, _domain_id, _domain_name, project_id, _project_uuid) = helpers::seed_domain_and_project(&pool).await;
    let service_id = ctx.services().ensure("unittest").await.unwrap();
    let az_resource_id = seed_az_resource(&pool, service_id).await;

    let t = Utc::now();
    let c = insert_commitment(&pool, project_id, az_resource_id, CommitmentStatus::Confirmed, t, None).await;

    let engine = ExpiryEngine::new(ctx.clone());

    // Simulate the tick at t + ε by forcing expires_at slightly in the past
    // relative to "now" (the engine always compares against real now()).
    sqlx::query("UPDATE project_commitments SET expires_at = now() - INTERVAL '1 second' WHERE id = $1")
        .bind(c.id)
        .execute(&pool)
        .await
        .unwrap();
    engine.sweep().await.unwrap();
    assert_eq!(status_of(&pool, c.id).await, CommitmentStatus::Expired);

    // t + 10 days: still within grace, left alone.
    sqlx::query("UPDATE project_commitments SET expires_at = now() - INTERVAL '10 days' WHERE id = $1")
        .bind(c.id)
        .execute(&pool)
        .await
        .unwrap();
    engine.sweep().await.unwrap();
    assert!(exists(&pool, c.id).await);
    assert_eq!(status_of(&pool, c.id).await, CommitmentStatus::Expired);

    // t + 31 days: past the one-month grace, hard-deleted.
    sqlx::query("UPDATE project_commitments SET expires_at = now() - INTERVAL '31 days' WHERE id = $1")
        .bind(c.id)
        .execute(&pool)
        .await
        .unwrap();
    engine.sweep().await.unwrap();
    assert!(!exists(&pool, c.id).await);
}

/// P6: the expiry tick never changes a row with status=superseded.
#[sqlx::test]
async fn expiry_tick_never_touches_superseded(pool: PgPool) {
    let (ctx, _domain_id, _domain_name, project_id, _project_uuid) = helpers::seed_domain_and_project(&pool).await;
    let service_id = ctx.services().ensure("unittest").await.unwrap();
    let az_resource_id = seed_az_resource(&pool, service_id).await;

    let c = insert_commitment(
        &pool,
        project_id,
        az_resource_id,
        CommitmentStatus::Superseded,
        Utc::now() - ChronoDuration::seconds(5),
        None,
    )
    .await;

    let engine = ExpiryEngine::new(ctx.clone());
    engine.sweep().await.unwrap();
    assert_eq!(status_of(&pool, c.id).await, CommitmentStatus::Superseded);
}

/// P7 / S5: a convert/supersede pair crossing the grace threshold together
/// is deleted atomically in one sweep; only `confirmed -> expired` happens
/// at t+1m, both rows vanish at t+41d.
#[sqlx::test]
async fn convert_pair_deleted_atomically_past_grace(pool: PgPool) {
    let (ctx, _domain_id, _domain_name, project_id, _project_uuid) = helpers::seed_domain_and_project(&pool).await;
    let service_id = ctx.services().ensure("unittest").await.unwrap();
    let az_resource_id = seed_az_resource(&pool, service_id).await;

    let t = Utc::now();
    let successor = insert_commitment(&pool, project_id, az_resource_id, CommitmentStatus::Confirmed, t, None).await;
    let predecessor = insert_commitment(
        &pool,
        project_id,
        az_resource_id,
        CommitmentStatus::Superseded,
        t,
        Some(serde_json::json!({"related_uuids": [successor.uuid]})),
    )
    .await;

    let engine = ExpiryEngine::new(ctx.clone());

    sqlx::query("UPDATE project_commitments SET expires_at = now() WHERE id = ANY($1)")
        .bind(vec![successor.id, predecessor.id])
        .execute(&pool)
        .await
        .unwrap();
    engine.sweep().await.unwrap();
    assert_eq!(status_of(&pool, successor.id).await, CommitmentStatus::Expired);
    assert_eq!(status_of(&pool, predecessor.id).await, CommitmentStatus::Superseded);

    sqlx::query("UPDATE project_commitments SET expires_at = now() - INTERVAL '41 days' WHERE id = ANY($1)")
        .bind(vec![successor.id, predecessor.id])
        .execute(&pool)
        .await
        .unwrap();
    engine.sweep().await.unwrap();
    assert!(!exists(&pool, successor.id).await);
    assert!(!exists(&pool, predecessor.id).await);
}

struct RecordingRenderer {
    should_fail: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl MailRenderer for RecordingRenderer {
    async fn render(&self, ctx: &MailContext) -> Result<(String, String)> {
        if self.should_fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(collector::error::CollectorError::Transient("render failed".into()));
        }
        Ok((
            format!("expiring in {}", ctx.project_name),
            format!("{} commitments", ctx.commitments.len()),
        ))
    }
}

/// P8: `notified_for_expiration` flips false->true at most once, and never
/// without a mail row inserted in the same transaction.
#[sqlx::test]
async fn notify_flips_flag_exactly_once_with_mail_row(pool: PgPool) {
    let (ctx, _domain_id, _domain_name, project_id, _project_uuid) = helpers::seed_domain_and_project(&pool).await;
    let service_id = ctx.services().ensure("unittest").await.unwrap();
    let az_resource_id = seed_az_resource(&pool, service_id).await;

    let soon = Utc::now() + ChronoDuration::days(5);
    let c1 = insert_commitment(&pool, project_id, az_resource_id, CommitmentStatus::Confirmed, soon, None).await;
    let c2 = insert_commitment(&pool, project_id, az_resource_id, CommitmentStatus::Confirmed, soon, None).await;

    let renderer = Arc::new(RecordingRenderer {
        should_fail: std::sync::atomic::AtomicBool::new(false),
    });
    let engine = NotifyEngine::new(ctx.clone(), renderer.clone());

    let outcome = engine.notify_one().await.unwrap();
    assert!(matches!(outcome, StepOutcome::Processed));

    let notified1: bool = sqlx::query_scalar("SELECT notified_for_expiration FROM project_commitments WHERE id = $1")
        .bind(c1.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    let notified2: bool = sqlx::query_scalar("SELECT notified_for_expiration FROM project_commitments WHERE id = $1")
        .bind(c2.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(notified1 && notified2);

    let mail_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM project_mail_notifications WHERE project_id = $1")
        .bind(project_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(mail_count, 1, "one mail per group, not per commitment");

    // A second tick finds nothing left to notify (already-notified commitments excluded).
    let outcome2 = engine.notify_one().await.unwrap();
    assert!(matches!(outcome2, StepOutcome::NoWork));
}

/// §4.4 notify job: a rendering failure aborts the transaction, so no mail
/// is inserted and the flag is not flipped, leaving the group to retry next
/// tick.
#[sqlx::test]
async fn notify_render_failure_leaves_flag_and_mail_untouched(pool: PgPool) {
    let (ctx, _domain_id, _domain_name, project_id, _project_uuid) = helpers::seed_domain_and_project(&pool).await;
    let service_id = ctx.services().ensure("unittest").await.unwrap();
    let az_resource_id = seed_az_resource(&pool, service_id).await;

    let soon = Utc::now() + ChronoDuration::days(5);
    let c1 = insert_commitment(&pool, project_id, az_resource_id, CommitmentStatus::Confirmed, soon, None).await;

    let renderer = Arc::new(RecordingRenderer {
        should_fail: std::sync::atomic::AtomicBool::new(true),
    });
    let engine = NotifyEngine::new(ctx.clone(), renderer.clone());

    let outcome = engine.notify_one().await.unwrap();
    assert!(matches!(outcome, StepOutcome::Error));

    let notified: bool = sqlx::query_scalar("SELECT notified_for_expiration FROM project_commitments WHERE id = $1")
        .bind(c1.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(!notified);

    let mail_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM project_mail_notifications WHERE project_id = $1")
        .bind(project_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(mail_count, 0);
}
