//! Bounded-retry check that an uploaded blob is readable.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::{debug, info, warn};

use manuals_core::defaults::{VERIFY_GRACE_MS, VERIFY_MAX_ATTEMPTS, VERIFY_RETRY_DELAY_MS};
use manuals_core::{BlobStorage, Error, Result};

/// Retry policy for storage verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationConfig {
    /// Reads attempted before giving up.
    pub max_attempts: u32,
    /// Fixed delay after a failed read.
    pub retry_delay: Duration,
    /// Wait after the first successful read.
    pub grace_period: Duration,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            max_attempts: VERIFY_MAX_ATTEMPTS,
            retry_delay: Duration::from_millis(VERIFY_RETRY_DELAY_MS),
            grace_period: Duration::from_millis(VERIFY_GRACE_MS),
        }
    }
}

impl VerificationConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `STORAGE_VERIFY_MAX_ATTEMPTS` | `20` | Reads before the job is failed |
    /// | `STORAGE_VERIFY_RETRY_DELAY_MS` | `3000` | Delay after a failed read |
    /// | `STORAGE_VERIFY_GRACE_MS` | `5000` | Wait after the first successful read |
    pub fn from_env() -> Self {
        let max_attempts = std::env::var("STORAGE_VERIFY_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(VERIFY_MAX_ATTEMPTS)
            .max(1);

        let retry_delay_ms = std::env::var("STORAGE_VERIFY_RETRY_DELAY_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(VERIFY_RETRY_DELAY_MS);

        let grace_ms = std::env::var("STORAGE_VERIFY_GRACE_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(VERIFY_GRACE_MS);

        Self {
            max_attempts,
            retry_delay: Duration::from_millis(retry_delay_ms),
            grace_period: Duration::from_millis(grace_ms),
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Longest time a verification can block.
    pub fn worst_case(&self) -> Duration {
        self.retry_delay * self.max_attempts + self.grace_period
    }
}

/// Polls blob storage until a path becomes readable.
#[derive(Clone)]
pub struct StorageVerifier {
    storage: Arc<dyn BlobStorage>,
    config: VerificationConfig,
}

impl StorageVerifier {
    pub fn new(storage: Arc<dyn BlobStorage>, config: VerificationConfig) -> Self {
        Self { storage, config }
    }

    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    /// Read `path` until it succeeds or the attempts run out.
    ///
    /// Returns the 1-based attempt that succeeded, after the grace period.
    pub async fn wait_until_readable(&self, path: &str) -> Result<u32> {
        let start = Instant::now();

        for attempt in 1..=self.config.max_attempts {
            match self.storage.download(path).await {
                Ok(data) => {
                    debug!(
                        subsystem = "orchestrator",
                        component = "verification",
                        storage_path = %path,
                        attempt,
                        size_bytes = data.len(),
                        "Blob readable, waiting grace period"
                    );
                    sleep(self.config.grace_period).await;
                    info!(
                        subsystem = "orchestrator",
                        component = "verification",
                        storage_path = %path,
                        attempt,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Storage verified"
                    );
                    return Ok(attempt);
                }
                Err(e) => {
                    debug!(
                        subsystem = "orchestrator",
                        component = "verification",
                        storage_path = %path,
                        attempt,
                        max_attempts = self.config.max_attempts,
                        error = %e,
                        "Blob not readable yet"
                    );
                    if attempt < self.config.max_attempts {
                        sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        warn!(
            subsystem = "orchestrator",
            component = "verification",
            storage_path = %path,
            attempts = self.config.max_attempts,
            duration_ms = start.elapsed().as_millis() as u64,
            "Storage verification exhausted"
        );
        Err(Error::VerificationTimeout {
            path: path.to_string(),
            attempts: self.config.max_attempts,
        })
    }
}
