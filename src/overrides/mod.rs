//! The quota-override config file collaborator (§6, consumed).

pub mod json_file;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;

/// `domain → project → service_type → resource → quota`.
pub type OverrideMap = HashMap<String, HashMap<String, HashMap<String, HashMap<String, i64>>>>;

#[async_trait]
pub trait OverrideSource: Send + Sync {
    async fn load(&self) -> Result<OverrideMap>;
}
