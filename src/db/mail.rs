use crate::db::context::DbContext;
use crate::error::Result;

pub struct MailOps<'a> {
    pub(crate) ctx: &'a DbContext,
}

impl<'a> MailOps<'a> {
    /// Inserts one queued notification. Callers are responsible for doing
    /// this in the same transaction as the commitment `notified_for_expiration`
    /// flip (P8) — this crate exposes both operations but does not itself
    /// open the transaction, so `jobs::commitment::NotifyJob` controls it.
    pub async fn insert(&self, project_id: i64, subject: &str, body: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO project_mail_notifications (project_id, subject, body) VALUES ($1, $2, $3)",
        )
        .bind(project_id)
        .bind(subject)
        .bind(body)
        .execute(self.ctx.pool())
        .await?;
        Ok(())
    }
}
