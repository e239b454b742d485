use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value as Json;
use std::collections::HashMap;

use crate::db::context::DbContext;
use crate::db::models::{
    AzResourceRow, DomainRow, ProjectAzResourceRow, ProjectResourceRow, ProjectRow, ProjectServiceRow,
    ResourceRow,
};
use crate::error::Result;
use crate::liquid::{RatesReport, UsageReport};
use crate::topology::{Topology, AZ_ANY, AZ_UNKNOWN};

pub struct ProjectServiceOps<'a> {
    pub(crate) ctx: &'a DbContext,
}

/// Everything the scrape engine needs about one queued unit of work (the
/// ProjectService row plus its parent Project and Domain, per §4.2 step 1).
pub struct ScrapeTarget {
    pub project_service: ProjectServiceRow,
    pub project: ProjectRow,
    pub domain: DomainRow,
}

impl<'a> ProjectServiceOps<'a> {
    /// Seeds a ProjectService row for a newly discovered project, with
    /// `next_scrape_at = now` and `stale = true` so the scrape engine picks
    /// it up immediately (§4.1 step 3).
    pub async fn ensure_for_project(&self, project_id: i64, service_id: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO project_services (project_id, service_id, next_scrape_at, stale)
             VALUES ($1, $2, now(), true)
             ON CONFLICT (project_id, service_id) DO NOTHING",
        )
        .bind(project_id)
        .bind(service_id)
        .execute(self.ctx.pool())
        .await?;
        Ok(())
    }

    /// The discovery query of §4.2: `stale DESC, next_scrape_at ASC, id ASC`,
    /// restricted to rows due for a scrape. No row lock is taken — per §4.7/
    /// §5 this relies on the operational sharding rule (one worker per
    /// service type), not on the DB, for single-writer safety.
    pub async fn find_next_to_scrape(&self, service_id: i64) -> Result<Option<ScrapeTarget>> {
        let row = sqlx::query_as::<_, ProjectServiceRow>(
            "SELECT id, project_id, service_id, scraped_at, checked_at, next_scrape_at, stale,
                    quota_desynced_at, scrape_error_message, serialized_metrics,
                    serialized_scrape_state, scrape_duration_secs, quota_sync_duration_secs
             FROM project_services
             WHERE service_id = $1 AND (next_scrape_at <= now() OR stale)
             ORDER BY stale DESC, next_scrape_at ASC, id ASC
             LIMIT 1",
        )
        .bind(service_id)
        .fetch_optional(self.ctx.pool())
        .await?;

        let Some(project_service) = row else {
            return Ok(None);
        };

        let project = sqlx::query_as::<_, ProjectRow>(
            "SELECT id, uuid, domain_id, name, parent_uuid FROM projects WHERE id = $1",
        )
        .bind(project_service.project_id)
        .fetch_one(self.ctx.pool())
        .await?;

        let domain = sqlx::query_as::<_, DomainRow>(
            "SELECT id, uuid, name FROM domains WHERE id = $1",
        )
        .bind(project.domain_id)
        .fetch_one(self.ctx.pool())
        .await?;

        Ok(Some(ScrapeTarget {
            project_service,
            project,
            domain,
        }))
    }

    /// The discovery query of §4.3: oldest `quota_desynced_at` first.
    pub async fn find_next_desynced(&self, service_id: i64) -> Result<Option<ProjectServiceRow>> {
        let row = sqlx::query_as::<_, ProjectServiceRow>(
            "SELECT id, project_id, service_id, scraped_at, checked_at, next_scrape_at, stale,
                    quota_desynced_at, scrape_error_message, serialized_metrics,
                    serialized_scrape_state, scrape_duration_secs, quota_sync_duration_secs
             FROM project_services
             WHERE service_id = $1 AND quota_desynced_at IS NOT NULL
             ORDER BY quota_desynced_at ASC, id ASC
             LIMIT 1",
        )
        .bind(service_id)
        .fetch_optional(self.ctx.pool())
        .await?;
        Ok(row)
    }

    /// §4.2 step 3: first-scrape failure. Writes a ProjectResource for every
    /// declared resource with `has_quota` (backend_quota = -1 sentinel if
    /// unknown) and one ProjectAZResource in AZ `any` per resource, so the
    /// read API never observes a project_service with no resource rows.
    /// Run in its own transaction, independent of the caller's.
    pub async fn write_dummy_resources(
        &self,
        project_id: i64,
        project_service_id: i64,
        resources: &[ResourceRow],
    ) -> Result<()> {
        let mut tx = self.ctx.pool().begin().await?;

        for resource in resources.iter().filter(|r| r.has_quota) {
            let project_resource_id: i64 = sqlx::query_scalar(
                "INSERT INTO project_resources (project_id, resource_id, backend_quota)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (project_id, resource_id) DO NOTHING
                 RETURNING id",
            )
            .bind(project_id)
            .bind(resource.id)
            .bind(-1_i64)
            .fetch_optional(&mut *tx)
            .await?
            .unwrap_or(0);

            if project_resource_id == 0 {
                continue;
            }

            let any_az_id: i64 = sqlx::query_scalar(
                "INSERT INTO az_resources (resource_id, az) VALUES ($1, $2)
                 ON CONFLICT (resource_id, az) DO UPDATE SET az = EXCLUDED.az
                 RETURNING id",
            )
            .bind(resource.id)
            .bind(AZ_ANY)
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO project_az_resources (project_id, az_resource_id, usage)
                 VALUES ($1, $2, 0)
                 ON CONFLICT (project_id, az_resource_id) DO NOTHING",
            )
            .bind(project_id)
            .bind(any_az_id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "UPDATE project_services
             SET scraped_at = to_timestamp(0), stale = false, quota_desynced_at = NULL,
                 next_scrape_at = now()
             WHERE id = $1",
        )
        .bind(project_service_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// §4.2 step 3 failure path (not the first scrape): record the error,
    /// clear `stale`, schedule the recheck. Never sets `quota_desynced_at`.
    pub async fn write_scrape_error(
        &self,
        id: i64,
        message: &str,
        next_scrape_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE project_services
             SET scrape_error_message = $1, stale = false, next_scrape_at = $2, checked_at = now()
             WHERE id = $3",
        )
        .bind(message)
        .bind(next_scrape_at)
        .bind(id)
        .execute(self.ctx.pool())
        .await?;
        Ok(())
    }

    /// §4.2 step 7: the transactional success write. Writes resources, AZ
    /// resources, and rates, then the ProjectService success fields, and
    /// finally performs quota-drift detection (§4.2, final paragraph).
    pub async fn write_scrape_success(&self, input: ScrapeSuccessInput<'_>) -> Result<bool> {
        let mut tx = self.ctx.pool().begin().await?;
        sqlx::query("SET LOCAL idle_in_transaction_session_timeout = '5s'")
            .execute(&mut *tx)
            .await?;

        let mut any_desynced = false;

        for resource in input.resources {
            let Some(reported) = input.usage_report.resources.get(&resource.name) else {
                // ServiceInfo validation (performed by the caller before this
                // write) guarantees every declared resource appears; this is
                // defensive only.
                continue;
            };

            let backend_quota_for_resource_row = if resource.topology == Topology::AzSeparated {
                None
            } else {
                reported.quota
            };
            let forbidden = reported.forbidden.unwrap_or(false);

            let project_resource_id: i64 = sqlx::query_scalar(
                "INSERT INTO project_resources
                    (project_id, resource_id, backend_quota, forbidden)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (project_id, resource_id) DO UPDATE
                   SET backend_quota = EXCLUDED.backend_quota, forbidden = EXCLUDED.forbidden
                 RETURNING id",
            )
            .bind(input.project_id)
            .bind(resource.id)
            .bind(backend_quota_for_resource_row)
            .bind(forbidden)
            .fetch_one(&mut *tx)
            .await?;

            let az_rows = sqlx::query_as::<_, AzResourceRow>(
                "SELECT id, resource_id, az, raw_capacity FROM az_resources WHERE resource_id = $1",
            )
            .bind(resource.id)
            .fetch_all(&mut *tx)
            .await?;
            let az_row_by_name: HashMap<&str, i64> =
                az_rows.iter().map(|r| (r.az.as_str(), r.id)).collect();

            let mut backend_quota_sum: i64 = 0;
            let mut desired_quota_sum: i64 = 0;

            for (az_name, per_az) in &reported.per_az {
                let az_resource_id = match az_row_by_name.get(az_name.as_str()) {
                    Some(id) => *id,
                    None => {
                        sqlx::query(
                            "INSERT INTO az_resources (resource_id, az) VALUES ($1, $2)
                             ON CONFLICT (resource_id, az) DO UPDATE SET az = EXCLUDED.az
                             RETURNING id",
                        )
                        .bind(resource.id)
                        .bind(az_name)
                        .fetch_one(&mut *tx)
                        .await?
                    }
                };

                let az_backend_quota = if resource.topology == Topology::AzSeparated {
                    per_az.quota
                } else {
                    None
                };
                if let Some(q) = az_backend_quota {
                    backend_quota_sum += q;
                }

                let existing_az: Option<ProjectAzResourceRow> = sqlx::query_as(
                    "SELECT id, project_id, az_resource_id, usage, physical_usage,
                            subresources_json, historical_usage_json, quota, backend_quota
                     FROM project_az_resources WHERE project_id = $1 AND az_resource_id = $2",
                )
                .bind(input.project_id)
                .bind(az_resource_id)
                .fetch_optional(&mut *tx)
                .await?;

                // §3/§9: historical_usage_json is only maintained for
                // `autogrow` resources; otherwise the series stays cleared.
                let historical = if resource.autogrow {
                    prune_and_append_history(
                        existing_az.as_ref().and_then(|r| r.historical_usage_json.clone()),
                        input.now,
                        per_az.usage,
                        input.history_retention,
                    )
                } else {
                    Json::Array(Vec::new())
                };

                if let Some(existing) = &existing_az {
                    desired_quota_sum += existing.quota.unwrap_or(0);
                }

                sqlx::query(
                    "INSERT INTO project_az_resources
                        (project_id, az_resource_id, usage, physical_usage, subresources_json,
                         historical_usage_json, backend_quota)
                     VALUES ($1, $2, $3, $4, $5, $6, $7)
                     ON CONFLICT (project_id, az_resource_id) DO UPDATE
                       SET usage = EXCLUDED.usage,
                           physical_usage = EXCLUDED.physical_usage,
                           subresources_json = EXCLUDED.subresources_json,
                           historical_usage_json = EXCLUDED.historical_usage_json,
                           backend_quota = EXCLUDED.backend_quota",
                )
                .bind(input.project_id)
                .bind(az_resource_id)
                .bind(per_az.usage)
                .bind(per_az.physical_usage)
                .bind(per_az.subresources.clone())
                .bind(historical)
                .bind(az_backend_quota)
                .execute(&mut *tx)
                .await?;
            }

            if resource.topology == Topology::AzSeparated {
                if backend_quota_sum != desired_quota_sum {
                    any_desynced = true;
                }
            } else {
                let desired: ProjectResourceRow = sqlx::query_as(
                    "SELECT id, project_id, resource_id, quota, backend_quota, forbidden,
                            override_quota_from_config, min_quota_from_backend, max_quota_from_backend
                     FROM project_resources WHERE id = $1",
                )
                .bind(project_resource_id)
                .fetch_one(&mut *tx)
                .await?;
                if desired.quota.unwrap_or(0) != reported.quota.unwrap_or(0) {
                    any_desynced = true;
                }
            }
        }

        for (rate_name, usage) in &input.rates_report.rates {
            let rate_id: i64 = sqlx::query_scalar(
                "INSERT INTO rates (service_id, name) VALUES ($1, $2)
                 ON CONFLICT (service_id, name) DO NOTHING
                 RETURNING id",
            )
            .bind(input.service_id)
            .bind(rate_name)
            .fetch_optional(&mut *tx)
            .await?
            .unwrap_or(0);
            let rate_id = if rate_id == 0 {
                sqlx::query_scalar("SELECT id FROM rates WHERE service_id = $1 AND name = $2")
                    .bind(input.service_id)
                    .bind(rate_name)
                    .fetch_one(&mut *tx)
                    .await?
            } else {
                rate_id
            };

            let total_usage: i128 = usage
                .per_az
                .values()
                .filter_map(|v| v.parse::<i128>().ok())
                .sum();

            sqlx::query(
                "INSERT INTO project_rates (project_id, rate_id, usage_as_bigint)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (project_id, rate_id) DO UPDATE SET usage_as_bigint = EXCLUDED.usage_as_bigint",
            )
            .bind(input.project_id)
            .bind(rate_id)
            .bind(total_usage.to_string())
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "UPDATE project_services
             SET scraped_at = $1, checked_at = $1, next_scrape_at = $2, stale = false,
                 scrape_error_message = '', serialized_metrics = $3, serialized_scrape_state = $4,
                 scrape_duration_secs = $5,
                 quota_desynced_at = CASE WHEN $6 THEN $1 ELSE quota_desynced_at END
             WHERE id = $7",
        )
        .bind(input.now)
        .bind(input.next_scrape_at)
        .bind(Json::Object(
            input
                .usage_report
                .metrics
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ))
        .bind(input.rates_report.serialized_state.clone())
        .bind(input.scrape_duration_secs)
        .bind(any_desynced)
        .bind(input.project_service_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(any_desynced)
    }

    /// §4.3 step 3 failure: 30s retry backoff, duration recorded, error surfaced.
    pub async fn mark_quota_sync_failure(
        &self,
        id: i64,
        retry_at: DateTime<Utc>,
        duration_secs: f64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE project_services SET quota_desynced_at = $1, quota_sync_duration_secs = $2 WHERE id = $3",
        )
        .bind(retry_at)
        .bind(duration_secs)
        .bind(id)
        .execute(self.ctx.pool())
        .await?;
        Ok(())
    }

    /// §4.3 step 4 success: write `backend_quota` for all affected resources
    /// and AZ resources, clear `quota_desynced_at`.
    pub async fn mark_quota_sync_success(
        &self,
        project_service_id: i64,
        project_id: i64,
        applied: &[AppliedQuota],
        duration_secs: f64,
    ) -> Result<()> {
        let mut tx = self.ctx.pool().begin().await?;

        for a in applied {
            sqlx::query(
                "UPDATE project_resources SET backend_quota = $1 WHERE project_id = $2 AND resource_id = $3",
            )
            .bind(a.total)
            .bind(project_id)
            .bind(a.resource_id)
            .execute(&mut *tx)
            .await?;

            for (az_resource_id, quota) in &a.per_az {
                sqlx::query(
                    "UPDATE project_az_resources SET backend_quota = $1 WHERE project_id = $2 AND az_resource_id = $3",
                )
                .bind(quota)
                .bind(project_id)
                .bind(az_resource_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        sqlx::query(
            "UPDATE project_services SET quota_desynced_at = NULL, quota_sync_duration_secs = $1 WHERE id = $2",
        )
        .bind(duration_secs)
        .bind(project_service_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn project_resources_for(&self, project_id: i64) -> Result<Vec<ProjectResourceRow>> {
        let rows = sqlx::query_as(
            "SELECT id, project_id, resource_id, quota, backend_quota, forbidden,
                    override_quota_from_config, min_quota_from_backend, max_quota_from_backend
             FROM project_resources WHERE project_id = $1",
        )
        .bind(project_id)
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(rows)
    }

    pub async fn project_az_resources_for_resource(
        &self,
        project_id: i64,
        resource_id: i64,
    ) -> Result<Vec<(ProjectAzResourceRow, String)>> {
        let rows: Vec<(ProjectAzResourceRow, String)> = sqlx::query_as(
            "SELECT par.id, par.project_id, par.az_resource_id, par.usage, par.physical_usage,
                    par.subresources_json, par.historical_usage_json, par.quota, par.backend_quota,
                    az.az
             FROM project_az_resources par
             JOIN az_resources az ON az.id = par.az_resource_id
             WHERE par.project_id = $1 AND az.resource_id = $2",
        )
        .bind(project_id)
        .bind(resource_id)
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(rows)
    }

    /// §8 C8: apply override values onto matching ProjectResource rows.
    pub async fn apply_override(
        &self,
        project_id: i64,
        resource_id: i64,
        quota: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE project_resources SET override_quota_from_config = $1
             WHERE project_id = $2 AND resource_id = $3",
        )
        .bind(quota)
        .bind(project_id)
        .bind(resource_id)
        .execute(self.ctx.pool())
        .await?;
        Ok(())
    }

    /// §8 C8 / P10: clear overrides for project_resources no longer present
    /// in the override map (`keep_ids` are the (project_id, resource_id)
    /// pairs still present).
    pub async fn clear_stale_overrides(&self, keep_ids: &[(i64, i64)]) -> Result<u64> {
        let project_ids: Vec<i64> = keep_ids.iter().map(|(p, _)| *p).collect();
        let resource_ids: Vec<i64> = keep_ids.iter().map(|(_, r)| *r).collect();
        let result = sqlx::query(
            "UPDATE project_resources
             SET override_quota_from_config = NULL
             WHERE override_quota_from_config IS NOT NULL
               AND NOT (project_id, resource_id) IN (SELECT * FROM UNNEST($1::bigint[], $2::bigint[]))",
        )
        .bind(&project_ids)
        .bind(&resource_ids)
        .execute(self.ctx.pool())
        .await?;
        Ok(result.rows_affected())
    }
}

pub struct ScrapeSuccessInput<'a> {
    pub project_id: i64,
    pub service_id: i64,
    pub project_service_id: i64,
    pub resources: &'a [ResourceRow],
    pub usage_report: &'a UsageReport,
    pub rates_report: &'a RatesReport,
    pub now: DateTime<Utc>,
    pub next_scrape_at: DateTime<Utc>,
    pub scrape_duration_secs: f64,
    pub history_retention: ChronoDuration,
}

pub struct AppliedQuota {
    pub resource_id: i64,
    pub total: i64,
    /// `(az_resource_id, quota)`, populated for az-separated resources.
    pub per_az: Vec<(i64, i64)>,
}

/// Appends `(now, usage)` to a JSON-encoded history series and prunes
/// entries older than `retention`, per spec.md §9 ("append-only within the
/// retention window; prune during writes, not reads") and the treat-empty-
/// string-as-empty-series rule.
fn prune_and_append_history(
    existing: Option<Json>,
    now: DateTime<Utc>,
    usage: i64,
    retention: ChronoDuration,
) -> Json {
    let mut series: Vec<(DateTime<Utc>, i64)> = match existing {
        Some(Json::Array(items)) => items
            .into_iter()
            .filter_map(|item| {
                let pair = item.as_array()?;
                let ts = pair.first()?.as_str()?;
                let value = pair.get(1)?.as_i64()?;
                DateTime::parse_from_rfc3339(ts)
                    .ok()
                    .map(|dt| (dt.with_timezone(&Utc), value))
            })
            .collect(),
        _ => Vec::new(),
    };

    let cutoff = now - retention;
    series.retain(|(ts, _)| *ts >= cutoff);
    series.push((now, usage));

    Json::Array(
        series
            .into_iter()
            .map(|(ts, v)| Json::Array(vec![Json::String(ts.to_rfc3339()), Json::from(v)]))
            .collect(),
    )
}

/// Computes the effective total quota to push for an az-separated resource:
/// the sum of its per-AZ quotas, excluding `any`/`unknown` (§4.3 step 1, P9).
pub fn sum_az_quotas(az_rows: &[(ProjectAzResourceRow, String)]) -> i64 {
    az_rows
        .iter()
        .filter(|(_, az)| az.as_str() != AZ_ANY && az.as_str() != AZ_UNKNOWN)
        .map(|(row, _)| row.quota.unwrap_or(0))
        .sum()
}
