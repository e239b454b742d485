//! The LIQUID backend capability set (§6, EXTERNAL INTERFACES, consumed).
//!
//! Modeled as a capability set rather than a class hierarchy, dispatched by
//! service-type label through [`LiquidRegistry`] — per spec.md §9's explicit
//! design guidance ("do not build a class hierarchy").

pub mod fake;
pub mod http;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use types::*;

use crate::error::Result;

/// One backend's full capability set: inspect its schema, fetch usage/rates,
/// and push quota. All methods are cancellation-aware since LIQUID RPCs are
/// the only unbounded waits in the system (§5).
#[async_trait]
pub trait LiquidConnection: Send + Sync {
    async fn service_info(&self, cancel: &CancellationToken) -> Result<ServiceInfo>;

    async fn get_usage_report(
        &self,
        project_uuid: &str,
        all_azs: &[String],
        cancel: &CancellationToken,
    ) -> Result<UsageReport>;

    async fn get_rates(
        &self,
        project_uuid: &str,
        all_azs: &[String],
        prior_state: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<RatesReport>;

    async fn set_quota(
        &self,
        project_uuid: &str,
        request: &HashMap<String, QuotaRequest>,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Dispatch table from service-type label to its connection, the process's
/// single point of contact with all configured backends.
#[derive(Clone, Default)]
pub struct LiquidRegistry {
    connections: HashMap<String, Arc<dyn LiquidConnection>>,
}

impl LiquidRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, service_type: impl Into<String>, conn: Arc<dyn LiquidConnection>) {
        self.connections.insert(service_type.into(), conn);
    }

    pub fn get(&self, service_type: &str) -> Option<Arc<dyn LiquidConnection>> {
        self.connections.get(service_type).cloned()
    }
}
