//! Outbound FHIR hand-off.
//!
//! The publisher receives a fully-formed serialized record; delivery
//! semantics beyond a single post are its own responsibility. There is no
//! exactly-once guarantee.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use faxtract_pipeline::processed_record_json;
use faxtract_protocol::config::EndpointConfig;
use faxtract_protocol::types::ProcessedRecord;

/// Downstream record consumer.
#[async_trait]
pub trait FhirPublisher: Send + Sync {
    async fn publish(&self, record: &ProcessedRecord) -> Result<()>;
}

/// Posts the serialized record to a configured endpoint.
pub struct HttpFhirPublisher {
    client: reqwest::Client,
    config: EndpointConfig,
}

impl HttpFhirPublisher {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl FhirPublisher for HttpFhirPublisher {
    async fn publish(&self, record: &ProcessedRecord) -> Result<()> {
        let payload = processed_record_json(record);
        let mut request = self.client.post(&self.config.endpoint).json(&payload);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .context("FHIR endpoint unreachable")?;
        let status = response.status();
        anyhow::ensure!(
            status.is_success(),
            "FHIR endpoint returned {status} for {}",
            record.processing_id
        );
        info!(processing_id = %record.processing_id, "record published to FHIR");
        Ok(())
    }
}

/// Logs instead of delivering. Used for local runs and tests.
#[derive(Debug, Clone, Default)]
pub struct LogFhirPublisher;

#[async_trait]
impl FhirPublisher for LogFhirPublisher {
    async fn publish(&self, record: &ProcessedRecord) -> Result<()> {
        info!(
            processing_id = %record.processing_id,
            tenant = %record.tenant_id,
            classification = record.classification.as_str(),
            "record ready for FHIR delivery (log publisher)"
        );
        Ok(())
    }
}
