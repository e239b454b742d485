use uuid::Uuid;

use crate::db::context::DbContext;
use crate::db::models::ProjectRow;
use crate::error::{CollectorError, Result};

pub struct ProjectOps<'a> {
    pub(crate) ctx: &'a DbContext,
}

/// One project as reported by the discovery collaborator.
pub struct DiscoveredProject {
    pub uuid: Uuid,
    pub name: String,
    pub parent_uuid: Option<Uuid>,
}

impl<'a> ProjectOps<'a> {
    pub async fn all_for_domain(&self, domain_id: i64) -> Result<Vec<ProjectRow>> {
        let rows = sqlx::query_as::<_, ProjectRow>(
            "SELECT id, uuid, domain_id, name, parent_uuid FROM projects WHERE domain_id = $1",
        )
        .bind(domain_id)
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(rows)
    }

    pub async fn get_by_uuid(&self, uuid: Uuid) -> Result<Option<ProjectRow>> {
        let row = sqlx::query_as::<_, ProjectRow>(
            "SELECT id, uuid, domain_id, name, parent_uuid FROM projects WHERE uuid = $1",
        )
        .bind(uuid)
        .fetch_optional(self.ctx.pool())
        .await?;
        Ok(row)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<ProjectRow>> {
        let row = sqlx::query_as::<_, ProjectRow>(
            "SELECT id, uuid, domain_id, name, parent_uuid FROM projects WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.ctx.pool())
        .await?;
        Ok(row)
    }

    /// Used by the override-file job (§4.5), which addresses projects by
    /// name within a domain rather than by uuid.
    pub async fn get_by_name(&self, domain_id: i64, name: &str) -> Result<Option<ProjectRow>> {
        let row = sqlx::query_as::<_, ProjectRow>(
            "SELECT id, uuid, domain_id, name, parent_uuid FROM projects WHERE domain_id = $1 AND name = $2",
        )
        .bind(domain_id)
        .bind(name)
        .fetch_optional(self.ctx.pool())
        .await?;
        Ok(row)
    }

    /// Inserts a project that doesn't exist yet, or updates name/parent_uuid
    /// if it changed upstream. Returns `(id, was_new)`.
    pub async fn upsert(&self, domain_id: i64, project: &DiscoveredProject) -> Result<(i64, bool)> {
        let existing: Option<i64> =
            sqlx::query_scalar("SELECT id FROM projects WHERE uuid = $1")
                .bind(project.uuid)
                .fetch_optional(self.ctx.pool())
                .await?;

        if let Some(id) = existing {
            sqlx::query("UPDATE projects SET name = $1, parent_uuid = $2 WHERE id = $3")
                .bind(&project.name)
                .bind(project.parent_uuid)
                .bind(id)
                .execute(self.ctx.pool())
                .await?;
            return Ok((id, false));
        }

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO projects (uuid, domain_id, name, parent_uuid) VALUES ($1, $2, $3, $4)
             RETURNING id",
        )
        .bind(project.uuid)
        .bind(domain_id)
        .bind(&project.name)
        .bind(project.parent_uuid)
        .fetch_one(self.ctx.pool())
        .await?;
        Ok((id, true))
    }

    /// Returns true if this project has any commitment in a status that
    /// blocks deletion (anything other than already hard-deleted — i.e.
    /// any row still present at all, since deletion itself removes the row).
    pub async fn has_blocking_commitments(&self, project_id: i64) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM project_commitments WHERE project_id = $1",
        )
        .bind(project_id)
        .fetch_one(self.ctx.pool())
        .await?;
        Ok(count > 0)
    }

    /// Deletes every project under `domain_id` whose uuid is not in
    /// `keep_uuids`, refusing (and reporting) any whose commitments block
    /// deletion rather than failing the whole sync.
    pub async fn delete_absent(&self, domain_id: i64, keep_uuids: &[Uuid]) -> Result<Vec<Uuid>> {
        let candidates = sqlx::query_as::<_, ProjectRow>(
            "SELECT id, uuid, domain_id, name, parent_uuid FROM projects
             WHERE domain_id = $1 AND NOT (uuid = ANY($2))",
        )
        .bind(domain_id)
        .bind(keep_uuids)
        .fetch_all(self.ctx.pool())
        .await?;

        let mut refused = Vec::new();
        for project in candidates {
            if self.has_blocking_commitments(project.id).await? {
                refused.push(project.uuid);
                continue;
            }
            sqlx::query("DELETE FROM projects WHERE id = $1")
                .bind(project.id)
                .execute(self.ctx.pool())
                .await?;
        }
        Ok(refused)
    }

    pub fn refusal_error(project_uuids: &[Uuid]) -> CollectorError {
        CollectorError::Constraint(format!(
            "refused to delete {} project(s) with blocking commitments: {:?}",
            project_uuids.len(),
            project_uuids
        ))
    }
}
