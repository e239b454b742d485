use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::context::DbContext;
use crate::db::models::{CommitmentStatus, ProjectCommitmentRow};
use crate::error::Result;

pub struct CommitmentOps<'a> {
    pub(crate) ctx: &'a DbContext,
}

impl<'a> CommitmentOps<'a> {
    /// §4.4 Step A: every commitment with status != superseded and
    /// `expires_at <= now` becomes expired. Returns the number of rows
    /// touched.
    pub async fn expire_due(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE project_commitments
             SET status = 'expired'
             WHERE status NOT IN ('superseded', 'expired') AND expires_at <= $1",
        )
        .bind(now)
        .execute(self.ctx.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// §4.4 Step B: hard-delete every commitment whose `expires_at + 1 month
    /// <= now`, across *all* eligible rows in one transaction so a set of
    /// related commitments (merge/convert chains) crossing the threshold
    /// together are deleted atomically (P7).
    pub async fn delete_past_grace(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let mut tx = self.ctx.pool().begin().await?;
        let deleted: Vec<Uuid> = sqlx::query_scalar(
            "DELETE FROM project_commitments
             WHERE expires_at + INTERVAL '1 month' <= $1
               AND status IN ('expired', 'superseded')
             RETURNING uuid",
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(deleted)
    }

    /// §4.4 notify job, discover step: commitments expiring within the next
    /// calendar month, not yet notified, grouped by project.
    pub async fn find_expiring_soon(
        &self,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<ProjectCommitmentRow>> {
        let rows = sqlx::query_as::<_, ProjectCommitmentRow>(
            "SELECT id, uuid, project_id, az_resource_id, amount, duration, created_at,
                    confirm_by, confirmed_at, expires_at, superseded_at, status,
                    creation_context_json, supersede_context_json, notified_for_expiration,
                    transfer_token
             FROM project_commitments
             WHERE notified_for_expiration = false
               AND expires_at BETWEEN $1 AND $2
             ORDER BY project_id, id",
        )
        .bind(now)
        .bind(until)
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(rows)
    }

    /// §4.4 notify job, process step: performed in one transaction per
    /// project — flip `notified_for_expiration` for every commitment in the
    /// group, never without the caller also having inserted the mail row in
    /// the same transaction (P8).
    pub async fn mark_notified(&self, ids: &[i64]) -> Result<()> {
        sqlx::query("UPDATE project_commitments SET notified_for_expiration = true WHERE id = ANY($1)")
            .bind(ids)
            .execute(self.ctx.pool())
            .await?;
        Ok(())
    }

    /// §4.4 notify job, process step, performed atomically: insert the
    /// rendered mail and flip `notified_for_expiration` on every commitment
    /// in the group in the same transaction (P8 — no insert without the flag
    /// flip, and vice versa).
    pub async fn notify_group(
        &self,
        project_id: i64,
        subject: &str,
        body: &str,
        commitment_ids: &[i64],
    ) -> Result<()> {
        let mut tx = self.ctx.pool().begin().await?;

        sqlx::query(
            "INSERT INTO project_mail_notifications (project_id, subject, body) VALUES ($1, $2, $3)",
        )
        .bind(project_id)
        .bind(subject)
        .bind(body)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE project_commitments SET notified_for_expiration = true WHERE id = ANY($1)")
            .bind(commitment_ids)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<Option<ProjectCommitmentRow>> {
        let row = sqlx::query_as::<_, ProjectCommitmentRow>(
            "SELECT id, uuid, project_id, az_resource_id, amount, duration, created_at,
                    confirm_by, confirmed_at, expires_at, superseded_at, status,
                    creation_context_json, supersede_context_json, notified_for_expiration,
                    transfer_token
             FROM project_commitments WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.ctx.pool())
        .await?;
        Ok(row)
    }

    /// Used by §4.4's state machine transitions outside the two cron
    /// operations (confirm, supersede via convert/merge). Exposed for
    /// completeness of the state machine table even though the two
    /// garbage-collection jobs are this crate's only scheduled callers.
    pub async fn set_status(&self, id: i64, status: CommitmentStatus) -> Result<()> {
        sqlx::query("UPDATE project_commitments SET status = $1 WHERE id = $2")
            .bind(status)
            .bind(id)
            .execute(self.ctx.pool())
            .await?;
        Ok(())
    }
}
