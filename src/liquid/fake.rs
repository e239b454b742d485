use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{LiquidConnection, QuotaRequest, RatesReport, ServiceInfo, UsageReport};
use crate::error::{CollectorError, Result};

/// In-memory, scriptable [`LiquidConnection`] used by integration tests to
/// drive S1-S6 scenarios without a real backend.
pub struct FakeLiquidConnection {
    pub info: ServiceInfo,
    usage_report: Mutex<Option<UsageReport>>,
    rates_report: Mutex<Option<RatesReport>>,
    fail_usage_report: Mutex<bool>,
    fail_set_quota: Mutex<bool>,
    pub set_quota_calls: Mutex<Vec<(String, HashMap<String, QuotaRequest>)>>,
}

impl FakeLiquidConnection {
    pub fn new(info: ServiceInfo) -> Self {
        Self {
            info,
            usage_report: Mutex::new(None),
            rates_report: Mutex::new(None),
            fail_usage_report: Mutex::new(false),
            fail_set_quota: Mutex::new(false),
            set_quota_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_usage_report(&self, report: UsageReport) {
        *self.usage_report.lock().unwrap() = Some(report);
    }

    pub fn set_rates_report(&self, report: RatesReport) {
        *self.rates_report.lock().unwrap() = Some(report);
    }

    pub fn fail_next_usage_report(&self) {
        *self.fail_usage_report.lock().unwrap() = true;
    }

    pub fn fail_set_quota(&self, fail: bool) {
        *self.fail_set_quota.lock().unwrap() = fail;
    }
}

#[async_trait]
impl LiquidConnection for FakeLiquidConnection {
    async fn service_info(&self, _cancel: &CancellationToken) -> Result<ServiceInfo> {
        Ok(self.info.clone())
    }

    async fn get_usage_report(
        &self,
        _project_uuid: &str,
        _all_azs: &[String],
        _cancel: &CancellationToken,
    ) -> Result<UsageReport> {
        if std::mem::take(&mut *self.fail_usage_report.lock().unwrap()) {
            return Err(CollectorError::Transient("fake backend failure".into()));
        }
        self.usage_report
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CollectorError::Transient("no usage report configured".into()))
    }

    async fn get_rates(
        &self,
        _project_uuid: &str,
        _all_azs: &[String],
        _prior_state: Option<&str>,
        _cancel: &CancellationToken,
    ) -> Result<RatesReport> {
        Ok(self.rates_report.lock().unwrap().clone().unwrap_or(RatesReport {
            rates: HashMap::new(),
            serialized_state: None,
        }))
    }

    async fn set_quota(
        &self,
        project_uuid: &str,
        request: &HashMap<String, QuotaRequest>,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        self.set_quota_calls
            .lock()
            .unwrap()
            .push((project_uuid.to_string(), request.clone()));
        if *self.fail_set_quota.lock().unwrap() {
            return Err(CollectorError::Transient("fake SetQuota failure".into()));
        }
        Ok(())
    }
}
