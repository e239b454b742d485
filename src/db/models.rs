//! Row types mirroring the DATA MODEL 1:1. Kept deliberately flat (no
//! nested structs) so `sqlx::FromRow` can derive without manual impls,
//! matching the teacher's `db/scrape_jobs.rs` row types.

use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use uuid::Uuid;

use crate::topology::Topology;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DomainRow {
    pub id: i64,
    pub uuid: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProjectRow {
    pub id: i64,
    pub uuid: Uuid,
    pub domain_id: i64,
    pub name: String,
    pub parent_uuid: Option<Uuid>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ServiceRow {
    pub id: i64,
    pub r#type: String,
    pub liquid_version: String,
    pub next_scrape_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ResourceRow {
    pub id: i64,
    pub service_id: i64,
    pub name: String,
    pub topology: Topology,
    pub has_quota: bool,
    pub unit: String,
    /// Distribution model, per spec.md §3/§9: only `autogrow` resources
    /// maintain `historical_usage_json`; others keep it cleared.
    pub autogrow: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AzResourceRow {
    pub id: i64,
    pub resource_id: i64,
    pub az: String,
    pub raw_capacity: Option<i64>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RateRow {
    pub id: i64,
    pub service_id: i64,
    pub name: String,
    pub unit: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProjectServiceRow {
    pub id: i64,
    pub project_id: i64,
    pub service_id: i64,
    pub scraped_at: Option<DateTime<Utc>>,
    pub checked_at: Option<DateTime<Utc>>,
    pub next_scrape_at: DateTime<Utc>,
    pub stale: bool,
    pub quota_desynced_at: Option<DateTime<Utc>>,
    pub scrape_error_message: String,
    pub serialized_metrics: Option<Json>,
    pub serialized_scrape_state: Option<String>,
    pub scrape_duration_secs: Option<f64>,
    pub quota_sync_duration_secs: Option<f64>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProjectResourceRow {
    pub id: i64,
    pub project_id: i64,
    pub resource_id: i64,
    pub quota: Option<i64>,
    pub backend_quota: Option<i64>,
    pub forbidden: bool,
    pub override_quota_from_config: Option<i64>,
    pub min_quota_from_backend: Option<i64>,
    pub max_quota_from_backend: Option<i64>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProjectAzResourceRow {
    pub id: i64,
    pub project_id: i64,
    pub az_resource_id: i64,
    pub usage: i64,
    pub physical_usage: Option<i64>,
    pub subresources_json: Option<Json>,
    pub historical_usage_json: Option<Json>,
    pub quota: Option<i64>,
    pub backend_quota: Option<i64>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProjectRateRow {
    pub id: i64,
    pub project_id: i64,
    pub rate_id: i64,
    pub usage_as_bigint: String,
    pub limit: Option<i64>,
    pub window: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, serde::Serialize, serde::Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CommitmentStatus {
    Planned,
    Pending,
    Confirmed,
    Expired,
    Superseded,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProjectCommitmentRow {
    pub id: i64,
    pub uuid: Uuid,
    pub project_id: i64,
    pub az_resource_id: i64,
    pub amount: i64,
    pub duration: String,
    pub created_at: DateTime<Utc>,
    pub confirm_by: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub superseded_at: Option<DateTime<Utc>>,
    pub status: CommitmentStatus,
    pub creation_context_json: Json,
    pub supersede_context_json: Option<Json>,
    pub notified_for_expiration: bool,
    pub transfer_token: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProjectMailNotificationRow {
    pub id: i64,
    pub project_id: i64,
    pub subject: String,
    pub body: String,
    pub next_submission_at: DateTime<Utc>,
}
