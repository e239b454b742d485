use uuid::Uuid;

use crate::db::context::DbContext;
use crate::db::models::DomainRow;
use crate::error::Result;

pub struct DomainOps<'a> {
    pub(crate) ctx: &'a DbContext,
}

/// One domain as reported by the discovery collaborator.
pub struct DiscoveredDomain {
    pub uuid: Uuid,
    pub name: String,
}

impl<'a> DomainOps<'a> {
    pub async fn all(&self) -> Result<Vec<DomainRow>> {
        let rows = sqlx::query_as::<_, DomainRow>("SELECT id, uuid, name FROM domains")
            .fetch_all(self.ctx.pool())
            .await?;
        Ok(rows)
    }

    pub async fn get_by_uuid(&self, uuid: Uuid) -> Result<Option<DomainRow>> {
        let row = sqlx::query_as::<_, DomainRow>("SELECT id, uuid, name FROM domains WHERE uuid = $1")
            .bind(uuid)
            .fetch_optional(self.ctx.pool())
            .await?;
        Ok(row)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<DomainRow>> {
        let row = sqlx::query_as::<_, DomainRow>("SELECT id, uuid, name FROM domains WHERE id = $1")
            .bind(id)
            .fetch_optional(self.ctx.pool())
            .await?;
        Ok(row)
    }

    /// Used by the override-file job (§4.5), which addresses domains by
    /// name rather than uuid. Unknown names are ignored silently by the
    /// caller, not here.
    pub async fn get_by_name(&self, name: &str) -> Result<Option<DomainRow>> {
        let row = sqlx::query_as::<_, DomainRow>("SELECT id, uuid, name FROM domains WHERE name = $1")
            .bind(name)
            .fetch_optional(self.ctx.pool())
            .await?;
        Ok(row)
    }

    /// Inserts a domain that doesn't exist yet, or updates its name if it
    /// has been renamed upstream. Returns the row's id.
    pub async fn upsert(&self, domain: &DiscoveredDomain) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO domains (uuid, name) VALUES ($1, $2)
             ON CONFLICT (uuid) DO UPDATE SET name = EXCLUDED.name
             RETURNING id",
        )
        .bind(domain.uuid)
        .bind(&domain.name)
        .fetch_one(self.ctx.pool())
        .await?;
        Ok(id)
    }

    /// Deletes every domain whose uuid is not in `keep_uuids`. Cascades to
    /// projects (and everything below) per the DATA MODEL's lifecycle rule.
    pub async fn delete_absent(&self, keep_uuids: &[Uuid]) -> Result<u64> {
        let result = sqlx::query("DELETE FROM domains WHERE NOT (uuid = ANY($1))")
            .bind(keep_uuids)
            .execute(self.ctx.pool())
            .await?;
        Ok(result.rows_affected())
    }
}
