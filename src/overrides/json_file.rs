use async_trait::async_trait;

use super::{OverrideMap, OverrideSource};
use crate::error::{CollectorError, Result};

/// Reads the override file as a single JSON document. Grounded on the
/// teacher's `data/reference.rs` load-then-parse pattern
/// (`examples/Xevion-banner/src/data/reference.rs`), adapted from a DB read
/// to a filesystem read since this is an external config artifact, not a
/// table.
pub struct JsonFileOverrideSource {
    path: std::path::PathBuf,
}

impl JsonFileOverrideSource {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl OverrideSource for JsonFileOverrideSource {
    async fn load(&self) -> Result<OverrideMap> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            CollectorError::Config(format!(
                "failed to read override file {}: {e}",
                self.path.display()
            ))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            CollectorError::Config(format!(
                "failed to parse override file {}: {e}",
                self.path.display()
            ))
        })
    }
}
