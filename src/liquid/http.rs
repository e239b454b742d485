use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{LiquidConnection, QuotaRequest, RatesReport, ServiceInfo, UsageReport};
use crate::error::{CollectorError, Result};

/// A LIQUID connection reached over HTTP, one per configured service type.
/// Grounded on the teacher's `BannerApi` reqwest client
/// (`examples/Xevion-banner/src/banner/api.rs`): a thin wrapper around a
/// shared `reqwest::Client` and a base URL, one method per RPC.
pub struct HttpLiquidConnection {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLiquidConnection {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CollectorError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CollectorError::Transient(format!("GET {url} failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(CollectorError::Transient(format!(
                "GET {url} returned {}",
                resp.status()
            )));
        }
        resp.json::<T>()
            .await
            .map_err(|e| CollectorError::Validation(format!("invalid JSON from {url}: {e}")))
    }
}

#[async_trait]
impl LiquidConnection for HttpLiquidConnection {
    async fn service_info(&self, _cancel: &CancellationToken) -> Result<ServiceInfo> {
        self.get_json("/v1/info").await
    }

    async fn get_usage_report(
        &self,
        project_uuid: &str,
        all_azs: &[String],
        _cancel: &CancellationToken,
    ) -> Result<UsageReport> {
        let path = format!(
            "/v1/projects/{project_uuid}/report?all_azs={}",
            all_azs.join(",")
        );
        self.get_json(&path).await
    }

    async fn get_rates(
        &self,
        project_uuid: &str,
        _all_azs: &[String],
        _prior_state: Option<&str>,
        _cancel: &CancellationToken,
    ) -> Result<RatesReport> {
        let path = format!("/v1/projects/{project_uuid}/rates");
        self.get_json(&path).await
    }

    async fn set_quota(
        &self,
        project_uuid: &str,
        request: &HashMap<String, QuotaRequest>,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        let url = format!("{}/v1/projects/{project_uuid}/quota", self.base_url);
        let resp = self
            .client
            .put(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| CollectorError::Transient(format!("PUT {url} failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(CollectorError::Transient(format!(
                "PUT {url} returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}
