//! The identity/tenancy discovery collaborator (§6, consumed).

pub mod fake;
pub mod http;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct RemoteDomain {
    pub uuid: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct RemoteProject {
    pub uuid: Uuid,
    pub name: String,
    pub parent_uuid: Option<Uuid>,
}

#[async_trait]
pub trait DiscoveryProvider: Send + Sync {
    async fn list_domains(&self) -> Result<Vec<RemoteDomain>>;
    async fn list_projects(&self, domain_uuid: Uuid) -> Result<Vec<RemoteProject>>;
}
