//! Startup telemetry.

use tracing::info;

use faxtract_protocol::config::PipelineConfig;

/// Log the effective configuration once at startup. Credentials are never
/// logged, only whether they are present.
pub fn log_startup(config: &PipelineConfig) {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        confidence_threshold = config.confidence_threshold,
        worker_concurrency = config.worker_concurrency,
        sweep_interval_s = config.sweep_interval_s,
        sweep_prefix = %config.sweep_prefix,
        object_store_root = %config.object_store_root.display(),
        ocr_endpoint = %config.ocr.endpoint,
        ocr_credentials = config.ocr.api_key.is_some(),
        extractor_endpoint = %config.extractor.endpoint,
        extractor_credentials = config.extractor.api_key.is_some(),
        fhir_configured = config.fhir.is_some(),
        "faxtract starting"
    );
}
