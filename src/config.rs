use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::executor::{hardware_worker_limit, MIN_WORKERS};
use crate::traits::HarvestError;

/// Runtime settings for a harvest session.
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```json
/// { "max_workers": 2, "log_filter": "instrument_harvester=debug" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Hard cap on pool workers; `None` sizes by available parallelism.
    pub max_workers: Option<usize>,

    /// Floor applied to the detected parallelism.
    pub min_workers: usize,

    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            max_workers: None,
            min_workers: MIN_WORKERS,
            log_filter: "info".to_string(),
        }
    }
}

impl HarvestConfig {
    pub fn from_json(text: &str) -> Result<Self, HarvestError> {
        Ok(serde_json::from_str(text)?)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, HarvestError> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_json(&text)
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    /// Worker limit handed to the task pool.
    pub fn worker_limit(&self) -> usize {
        self.max_workers
            .unwrap_or_else(|| hardware_worker_limit(self.min_workers))
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HarvestConfig::default();
        assert_eq!(config.max_workers, None);
        assert!(config.worker_limit() >= MIN_WORKERS);
    }

    #[test]
    fn test_partial_json() {
        let config = HarvestConfig::from_json(r#"{ "max_workers": 2 }"#).unwrap();
        assert_eq!(config.worker_limit(), 2);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            HarvestConfig::from_json("{ max_workers: }"),
            Err(HarvestError::Config(_))
        ));
    }

    #[test]
    fn test_builder() {
        let config = HarvestConfig::default()
            .with_max_workers(0)
            .with_log_filter("debug");
        assert_eq!(config.worker_limit(), 1);
        assert_eq!(config.log_filter, "debug");
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("harvest_config_{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "min_workers": 6 }"#).unwrap();

        let config = HarvestConfig::load(&path).await.unwrap();
        assert_eq!(config.min_workers, 6);
        assert!(config.worker_limit() >= 6);

        std::fs::remove_file(path).ok();
    }
}
