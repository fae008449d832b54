//! HTTP client for the document processing sidecar.
//!
//! The sidecar extracts text, OCR and tables from a PDF, chunks it, and
//! upserts the vectors. One synchronous multipart request per document.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{multipart, Client};
use tracing::{debug, info, warn};

use manuals_core::defaults::{PDF_CONTENT_TYPE, SIDECAR_TIMEOUT_SECS, SIDECAR_URL};
use manuals_core::{
    DocMetadata, Error, ExternalProcessor, ProcessingFlags, ProcessorResponse, Result,
};

const PROCESS_PATH: &str = "/v1/process-document";
const HEALTH_PATH: &str = "/health";
const HEALTH_TIMEOUT_SECS: u64 = 5;

/// Sidecar connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            base_url: SIDECAR_URL.to_string(),
            timeout_secs: SIDECAR_TIMEOUT_SECS,
        }
    }
}

impl SidecarConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `SIDECAR_URL` | `http://127.0.0.1:8000` | Sidecar base URL |
    /// | `SIDECAR_TIMEOUT_SECS` | `600` | Per-document request timeout |
    pub fn from_env() -> Self {
        let base_url = std::env::var("SIDECAR_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| SIDECAR_URL.to_string());

        let timeout_secs = std::env::var("SIDECAR_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(SIDECAR_TIMEOUT_SECS);

        Self {
            base_url,
            timeout_secs,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// [`ExternalProcessor`] backed by the sidecar's REST API.
pub struct SidecarProcessor {
    client: Client,
    base_url: String,
}

impl SidecarProcessor {
    pub fn new(config: SidecarConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "processor",
            component = "sidecar",
            base_url = %config.base_url,
            timeout_secs = config.timeout_secs,
            "Initializing sidecar processor"
        );

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(SidecarConfig::from_env())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ExternalProcessor for SidecarProcessor {
    async fn process(
        &self,
        data: Vec<u8>,
        metadata: &DocMetadata,
        flags: ProcessingFlags,
    ) -> Result<ProcessorResponse> {
        let start = Instant::now();
        let size_bytes = data.len();
        let doc_metadata = serde_json::to_string(metadata)?;

        let file_part = multipart::Part::bytes(data)
            .file_name(metadata.file_name.clone())
            .mime_str(PDF_CONTENT_TYPE)
            .map_err(|e| Error::Internal(format!("Failed to create multipart: {}", e)))?;

        let form = multipart::Form::new()
            .part("file", file_part)
            .text("doc_metadata", doc_metadata)
            .text("extract_tables", flags.extract_tables.to_string())
            .text("ocr_enabled", flags.ocr_enabled.to_string());

        debug!(
            subsystem = "processor",
            component = "sidecar",
            doc_id = %metadata.doc_id,
            job_id = %metadata.job_id,
            size_bytes,
            "Sending document to sidecar"
        );

        let response = self
            .client
            .post(format!("{}{}", self.base_url, PROCESS_PATH))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Processing(format!("Sidecar request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Processing(format!(
                "Sidecar returned {}: {}",
                status, body
            )));
        }

        let result: ProcessorResponse = response
            .json()
            .await
            .map_err(|e| Error::Processing(format!("Failed to parse sidecar response: {}", e)))?;

        info!(
            subsystem = "processor",
            component = "sidecar",
            doc_id = %metadata.doc_id,
            job_id = %metadata.job_id,
            success = result.success,
            chunk_count = result.chunks_processed,
            duration_ms = start.elapsed().as_millis() as u64,
            "Sidecar processing finished"
        );

        Ok(result)
    }

    async fn health(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, HEALTH_PATH))
            .timeout(Duration::from_secs(HEALTH_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| {
                warn!(subsystem = "processor", component = "sidecar", error = %e, "Sidecar health check error");
                Error::Request(format!("Sidecar unreachable: {}", e))
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            warn!(
                subsystem = "processor",
                component = "sidecar",
                status = %response.status(),
                "Sidecar health check failed"
            );
            Err(Error::Request(format!(
                "Sidecar health returned {}",
                response.status()
            )))
        }
    }
}
