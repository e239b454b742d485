use std::collections::HashMap;

use crate::db::context::DbContext;
use crate::db::models::{AzResourceRow, RateRow, ResourceRow, ServiceRow};
use crate::error::Result;
use crate::liquid::ServiceInfo;
use crate::topology::AZ_ANY;

pub struct ServiceOps<'a> {
    pub(crate) ctx: &'a DbContext,
}

impl<'a> ServiceOps<'a> {
    pub async fn all(&self) -> Result<Vec<ServiceRow>> {
        let rows = sqlx::query_as::<_, ServiceRow>(
            "SELECT id, type, liquid_version, next_scrape_at FROM services",
        )
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(rows)
    }

    pub async fn get_by_type(&self, service_type: &str) -> Result<Option<ServiceRow>> {
        let row = sqlx::query_as::<_, ServiceRow>(
            "SELECT id, type, liquid_version, next_scrape_at FROM services WHERE type = $1",
        )
        .bind(service_type)
        .fetch_optional(self.ctx.pool())
        .await?;
        Ok(row)
    }

    /// Ensures a `services` row exists for `service_type`, returning its id.
    /// Used by discovery sync, which needs to enumerate configured service
    /// types before it can seed ProjectService rows for new projects.
    pub async fn ensure(&self, service_type: &str) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO services (type) VALUES ($1)
             ON CONFLICT (type) DO UPDATE SET type = EXCLUDED.type
             RETURNING id",
        )
        .bind(service_type)
        .fetch_one(self.ctx.pool())
        .await?;
        Ok(id)
    }

    pub async fn resources_for(&self, service_id: i64) -> Result<Vec<ResourceRow>> {
        let rows = sqlx::query_as::<_, ResourceRow>(
            "SELECT id, service_id, name, topology, has_quota, unit, autogrow FROM resources WHERE service_id = $1",
        )
        .bind(service_id)
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(rows)
    }

    pub async fn az_resources_for(&self, resource_id: i64) -> Result<Vec<AzResourceRow>> {
        let rows = sqlx::query_as::<_, AzResourceRow>(
            "SELECT id, resource_id, az, raw_capacity FROM az_resources WHERE resource_id = $1",
        )
        .bind(resource_id)
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(rows)
    }

    /// Looks a resource up by name within a service, used by the
    /// override-file job (§4.5) which addresses resources by name.
    pub async fn resource_by_name(&self, service_id: i64, name: &str) -> Result<Option<ResourceRow>> {
        let row = sqlx::query_as::<_, ResourceRow>(
            "SELECT id, service_id, name, topology, has_quota, unit, autogrow FROM resources
             WHERE service_id = $1 AND name = $2",
        )
        .bind(service_id)
        .bind(name)
        .fetch_optional(self.ctx.pool())
        .await?;
        Ok(row)
    }

    /// Resolves the resource name backing an az_resource id, used by the
    /// commitment-expiry notification job (§4.4) to describe which
    /// resource a commitment reserves in the rendered mail.
    pub async fn resource_name_for_az_resource(&self, az_resource_id: i64) -> Result<Option<String>> {
        let name: Option<String> = sqlx::query_scalar(
            "SELECT r.name FROM resources r
             JOIN az_resources az ON az.resource_id = r.id
             WHERE az.id = $1",
        )
        .bind(az_resource_id)
        .fetch_optional(self.ctx.pool())
        .await?;
        Ok(name)
    }

    pub async fn rates_for(&self, service_id: i64) -> Result<Vec<RateRow>> {
        let rows = sqlx::query_as::<_, RateRow>(
            "SELECT id, service_id, name, unit FROM rates WHERE service_id = $1",
        )
        .bind(service_id)
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(rows)
    }

    /// Re-materializes Service/Resource/AZResource/Rate rows to match a
    /// freshly observed `ServiceInfo`, in a single transaction (§4.2 step 2,
    /// backend-schema evolution). Additions, deletions, and topology changes
    /// are all reconciled here; called whenever `info.version` differs from
    /// the stored `liquid_version`.
    pub async fn materialize_schema(
        &self,
        service_id: i64,
        az_list: &[String],
        info: &ServiceInfo,
    ) -> Result<()> {
        let mut tx = self.ctx.pool().begin().await?;

        sqlx::query("UPDATE services SET liquid_version = $1 WHERE id = $2")
            .bind(&info.version)
            .bind(service_id)
            .execute(&mut *tx)
            .await?;

        let existing: Vec<ResourceRow> = sqlx::query_as(
            "SELECT id, service_id, name, topology, has_quota, unit, autogrow FROM resources WHERE service_id = $1",
        )
        .bind(service_id)
        .fetch_all(&mut *tx)
        .await?;
        let existing_by_name: HashMap<&str, &ResourceRow> =
            existing.iter().map(|r| (r.name.as_str(), r)).collect();

        for (name, info_res) in &info.resources {
            let topology_str = match info_res.topology {
                crate::topology::Topology::Flat => "flat",
                crate::topology::Topology::AzAware => "az-aware",
                crate::topology::Topology::AzSeparated => "az-separated",
            };
            let resource_id: i64 = sqlx::query_scalar(
                "INSERT INTO resources (service_id, name, topology, has_quota, unit, autogrow)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (service_id, name) DO UPDATE
                   SET topology = EXCLUDED.topology, has_quota = EXCLUDED.has_quota,
                       unit = EXCLUDED.unit, autogrow = EXCLUDED.autogrow
                 RETURNING id",
            )
            .bind(service_id)
            .bind(name)
            .bind(topology_str)
            .bind(info_res.has_quota)
            .bind(&info_res.unit)
            .bind(info_res.autogrow)
            .fetch_one(&mut *tx)
            .await?;

            let azs_for_resource: Vec<&str> = match info_res.topology {
                crate::topology::Topology::Flat => vec![AZ_ANY],
                crate::topology::Topology::AzAware => {
                    let mut v: Vec<&str> = az_list.iter().map(|s| s.as_str()).collect();
                    v.push(AZ_ANY);
                    v
                }
                crate::topology::Topology::AzSeparated => {
                    az_list.iter().map(|s| s.as_str()).collect()
                }
            };
            for az in azs_for_resource {
                sqlx::query(
                    "INSERT INTO az_resources (resource_id, az) VALUES ($1, $2)
                     ON CONFLICT (resource_id, az) DO NOTHING",
                )
                .bind(resource_id)
                .bind(az)
                .execute(&mut *tx)
                .await?;
            }
        }

        // Resources the backend no longer declares are removed (cascades az_resources).
        for name in existing_by_name.keys() {
            if !info.resources.contains_key(*name) {
                sqlx::query("DELETE FROM resources WHERE service_id = $1 AND name = $2")
                    .bind(service_id)
                    .bind(name)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        for (name, _rate_info) in &info.rates {
            sqlx::query(
                "INSERT INTO rates (service_id, name) VALUES ($1, $2)
                 ON CONFLICT (service_id, name) DO NOTHING",
            )
            .bind(service_id)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query(
            "DELETE FROM rates WHERE service_id = $1 AND NOT (name = ANY($2))",
        )
        .bind(service_id)
        .bind(info.rates.keys().cloned().collect::<Vec<_>>())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
