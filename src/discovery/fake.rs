use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use super::{DiscoveryProvider, RemoteDomain, RemoteProject};
use crate::error::Result;

/// Scriptable [`DiscoveryProvider`] for integration tests.
#[derive(Default)]
pub struct FakeDiscoveryProvider {
    domains: Mutex<Vec<RemoteDomain>>,
    projects: Mutex<HashMap<Uuid, Vec<RemoteProject>>>,
}

impl FakeDiscoveryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_domains(&self, domains: Vec<RemoteDomain>) {
        *self.domains.lock().unwrap() = domains;
    }

    pub fn set_projects(&self, domain_uuid: Uuid, projects: Vec<RemoteProject>) {
        self.projects.lock().unwrap().insert(domain_uuid, projects);
    }
}

#[async_trait]
impl DiscoveryProvider for FakeDiscoveryProvider {
    async fn list_domains(&self) -> Result<Vec<RemoteDomain>> {
        Ok(self.domains.lock().unwrap().clone())
    }

    async fn list_projects(&self, domain_uuid: Uuid) -> Result<Vec<RemoteProject>> {
        Ok(self
            .projects
            .lock()
            .unwrap()
            .get(&domain_uuid)
            .cloned()
            .unwrap_or_default())
    }
}
