use sqlx::PgPool;

use crate::db::commitments::CommitmentOps;
use crate::db::domains::DomainOps;
use crate::db::mail::MailOps;
use crate::db::project_service::ProjectServiceOps;
use crate::db::projects::ProjectOps;
use crate::db::services::ServiceOps;

/// Shared handle to the database, exposing typed per-entity accessors the
/// way the teacher's `db::DbContext` wraps `PgPool` behind `XxxOps` structs.
#[derive(Clone)]
pub struct DbContext {
    pool: PgPool,
}

impl DbContext {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn domains(&self) -> DomainOps<'_> {
        DomainOps { ctx: self }
    }

    pub fn projects(&self) -> ProjectOps<'_> {
        ProjectOps { ctx: self }
    }

    pub fn services(&self) -> ServiceOps<'_> {
        ServiceOps { ctx: self }
    }

    pub fn project_services(&self) -> ProjectServiceOps<'_> {
        ProjectServiceOps { ctx: self }
    }

    pub fn commitments(&self) -> CommitmentOps<'_> {
        CommitmentOps { ctx: self }
    }

    pub fn mail(&self) -> MailOps<'_> {
        MailOps { ctx: self }
    }
}
