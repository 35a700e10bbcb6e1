//! Pipeline configuration shared across the service, workers, and sweep.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::paths;

/// Built-in defaults. Env vars (`FAXTRACT_*`) override them at load time.
pub mod defaults {
    pub const CONFIDENCE_THRESHOLD: f64 = 0.95;
    pub const LOW_CONF_FIELD_THRESHOLD: f64 = 0.95;
    pub const MAX_FILE_SIZE_MB: u64 = 200;
    pub const WORKER_CONCURRENCY: usize = 4;
    pub const SINGLE_TIMEOUT_S: u64 = 120;
    pub const BATCH_CHILD_TIMEOUT_S: u64 = 240;
    pub const QUEUE_HIGH_WATER: usize = 256;
    pub const QUEUE_LOW_WATER: usize = 64;
    pub const SWEEP_INTERVAL_S: u64 = 300;
    /// Source-byte cache TTL for on-demand re-analysis.
    pub const SOURCE_CACHE_TTL_S: u64 = 600;
}

/// Endpoint plus credential for an external capability provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl EndpointConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

/// Canonical pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Overall-confidence threshold deciding HIGH vs REVIEW placement.
    pub confidence_threshold: f64,
    /// Per-field threshold below which a field counts as low-confidence.
    pub low_conf_field_threshold: f64,
    pub max_file_size_mb: u64,
    pub worker_concurrency: usize,
    pub single_timeout_s: u64,
    pub batch_child_timeout_s: u64,
    pub queue_high_water: usize,
    pub queue_low_water: usize,
    pub sweep_prefix: String,
    pub sweep_interval_s: u64,
    pub source_cache_ttl_s: u64,
    pub object_store_root: PathBuf,
    /// Record store connection URL (sqlite:...).
    pub storage_connection: String,
    pub ocr: EndpointConfig,
    pub extractor: EndpointConfig,
    /// Optional downstream FHIR endpoint; records are published after
    /// completion when set.
    #[serde(default)]
    pub fhir: Option<EndpointConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: defaults::CONFIDENCE_THRESHOLD,
            low_conf_field_threshold: defaults::LOW_CONF_FIELD_THRESHOLD,
            max_file_size_mb: defaults::MAX_FILE_SIZE_MB,
            worker_concurrency: defaults::WORKER_CONCURRENCY,
            single_timeout_s: defaults::SINGLE_TIMEOUT_S,
            batch_child_timeout_s: defaults::BATCH_CHILD_TIMEOUT_S,
            queue_high_water: defaults::QUEUE_HIGH_WATER,
            queue_low_water: defaults::QUEUE_LOW_WATER,
            sweep_prefix: paths::SWEEP_SOURCE_PREFIX.to_string(),
            sweep_interval_s: defaults::SWEEP_INTERVAL_S,
            source_cache_ttl_s: defaults::SOURCE_CACHE_TTL_S,
            object_store_root: paths::default_object_root(),
            storage_connection: format!(
                "sqlite:{}?mode=rwc",
                paths::default_state_db_path().display()
            ),
            ocr: EndpointConfig::default(),
            extractor: EndpointConfig::default(),
            fhir: None,
        }
    }
}

impl PipelineConfig {
    /// Defaults overlaid with `FAXTRACT_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(value) = env_parse("FAXTRACT_CONFIDENCE_THRESHOLD") {
            config.confidence_threshold = value;
        }
        if let Some(value) = env_parse("FAXTRACT_LOW_CONF_FIELD_THRESHOLD") {
            config.low_conf_field_threshold = value;
        }
        if let Some(value) = env_parse("FAXTRACT_MAX_FILE_SIZE_MB") {
            config.max_file_size_mb = value;
        }
        if let Some(value) = env_parse("FAXTRACT_WORKER_CONCURRENCY") {
            config.worker_concurrency = value;
        }
        if let Some(value) = env_parse("FAXTRACT_SINGLE_TIMEOUT_S") {
            config.single_timeout_s = value;
        }
        if let Some(value) = env_parse("FAXTRACT_BATCH_CHILD_TIMEOUT_S") {
            config.batch_child_timeout_s = value;
        }
        if let Some(value) = env_parse("FAXTRACT_QUEUE_HIGH_WATER") {
            config.queue_high_water = value;
        }
        if let Some(value) = env_parse("FAXTRACT_QUEUE_LOW_WATER") {
            config.queue_low_water = value;
        }
        if let Ok(value) = std::env::var("FAXTRACT_SWEEP_PREFIX") {
            config.sweep_prefix = value;
        }
        if let Some(value) = env_parse("FAXTRACT_SWEEP_INTERVAL_S") {
            config.sweep_interval_s = value;
        }
        if let Ok(value) = std::env::var("FAXTRACT_OBJECT_STORE_ROOT") {
            config.object_store_root = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("FAXTRACT_STORAGE_CONNECTION") {
            config.storage_connection = value;
        }
        if let Ok(value) = std::env::var("FAXTRACT_OCR_ENDPOINT") {
            config.ocr.endpoint = value;
        }
        if let Ok(value) = std::env::var("FAXTRACT_OCR_API_KEY") {
            config.ocr.api_key = Some(value);
        }
        if let Ok(value) = std::env::var("FAXTRACT_EXTRACTOR_ENDPOINT") {
            config.extractor.endpoint = value;
        }
        if let Ok(value) = std::env::var("FAXTRACT_EXTRACTOR_API_KEY") {
            config.extractor.api_key = Some(value);
        }
        if let Ok(value) = std::env::var("FAXTRACT_FHIR_ENDPOINT") {
            config.fhir = Some(EndpointConfig::new(value));
        }

        config
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = PipelineConfig::default();
        assert_eq!(config.confidence_threshold, 0.95);
        assert_eq!(config.max_file_size_mb, 200);
        assert_eq!(config.sweep_interval_s, 300);
        assert_eq!(config.sweep_prefix, "bulk-processing/source/");
        assert_eq!(config.max_file_size_bytes(), 200 * 1024 * 1024);
    }
}
