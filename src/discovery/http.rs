use async_trait::async_trait;
use uuid::Uuid;

use super::{DiscoveryProvider, RemoteDomain, RemoteProject};
use crate::error::{CollectorError, Result};

/// Reaches the tenancy service over HTTP. Grounded on the teacher's
/// `BannerApi` client (`examples/Xevion-banner/src/banner/api.rs`):
/// one `reqwest::Client`, one method per list operation.
pub struct HttpDiscoveryProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDiscoveryProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl DiscoveryProvider for HttpDiscoveryProvider {
    async fn list_domains(&self) -> Result<Vec<RemoteDomain>> {
        let url = format!("{}/v3/domains", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CollectorError::Transient(format!("GET {url} failed: {e}")))?;
        #[derive(serde::Deserialize)]
        struct Wire {
            uuid: Uuid,
            name: String,
        }
        let wire: Vec<Wire> = resp
            .json()
            .await
            .map_err(|e| CollectorError::Validation(format!("invalid domains payload: {e}")))?;
        Ok(wire
            .into_iter()
            .map(|w| RemoteDomain {
                uuid: w.uuid,
                name: w.name,
            })
            .collect())
    }

    async fn list_projects(&self, domain_uuid: Uuid) -> Result<Vec<RemoteProject>> {
        let url = format!("{}/v3/domains/{domain_uuid}/projects", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CollectorError::Transient(format!("GET {url} failed: {e}")))?;
        #[derive(serde::Deserialize)]
        struct Wire {
            uuid: Uuid,
            name: String,
            parent_uuid: Option<Uuid>,
        }
        let wire: Vec<Wire> = resp
            .json()
            .await
            .map_err(|e| CollectorError::Validation(format!("invalid projects payload: {e}")))?;
        Ok(wire
            .into_iter()
            .map(|w| RemoteProject {
                uuid: w.uuid,
                name: w.name,
                parent_uuid: w.parent_uuid,
            })
            .collect())
    }
}
