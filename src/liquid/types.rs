use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::topology::Topology;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub unit: String,
    pub topology: Topology,
    pub has_quota: bool,
    pub has_capacity: bool,
    pub needs_resource_demand: bool,
    /// Distribution model flag (spec.md §3): when true, the resource's
    /// `historical_usage_json` series is maintained; otherwise it is kept
    /// cleared. Defaults to `false` for backends that don't report it.
    #[serde(default)]
    pub autogrow: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateInfo {
    pub unit: String,
    pub topology: Topology,
    pub has_usage: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageMetricFamilyInfo {
    pub r#type: String,
    pub help: String,
    pub label_keys: Vec<String>,
}

/// `ServiceInfo() → {version, resources, rates, usage_metric_families}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub version: String,
    pub resources: HashMap<String, ResourceInfo>,
    pub rates: HashMap<String, RateInfo>,
    pub usage_metric_families: HashMap<String, UsageMetricFamilyInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PerAzUsage {
    pub usage: i64,
    pub physical_usage: Option<i64>,
    pub subresources: Option<serde_json::Value>,
    pub quota: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub quota: Option<i64>,
    pub forbidden: Option<bool>,
    pub per_az: HashMap<String, PerAzUsage>,
}

/// `GetUsageReport(project, all_azs) → {info_version, resources, rates, metrics, serialized_state?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageReport {
    pub info_version: String,
    pub resources: HashMap<String, ResourceUsage>,
    pub metrics: HashMap<String, serde_json::Value>,
    pub serialized_state: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RateUsage {
    /// Decimal string: values can exceed 64-bit range.
    pub per_az: HashMap<String, String>,
}

/// `GetRates(project, all_azs, prior_state) → {rates, serialized_state}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatesReport {
    pub rates: HashMap<String, RateUsage>,
    pub serialized_state: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QuotaRequest {
    pub total: i64,
    pub per_az: HashMap<String, i64>,
}
