//! Blob storage backends for uploaded manuals and derived artifacts.
//!
//! Two backends implement [`BlobStorage`]:
//! - [`FilesystemBlobStorage`]: path-addressed files under a base directory
//! - [`SupabaseBlobStorage`]: Supabase-compatible object storage over HTTP
//!
//! [`StorageConfig`] selects one from the environment.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use manuals_core::defaults;
use manuals_core::{BlobStorage, Error, Result, UploadOptions};

/// Reject empty, absolute, and parent-relative blob paths.
pub fn validate_blob_path(path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(Error::InvalidInput("Blob path is empty".to_string()));
    }
    if path.contains('\\') || path.contains('\0') {
        return Err(Error::InvalidInput(format!(
            "Blob path contains an illegal character: {}",
            path
        )));
    }
    let ok = Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !ok {
        return Err(Error::InvalidInput(format!(
            "Blob path must be relative without '..': {}",
            path
        )));
    }
    Ok(())
}

// =============================================================================
// FILESYSTEM
// =============================================================================

/// Filesystem storage backend.
///
/// Writes go to a sibling temp file which is then renamed into place, so a
/// reader never observes a partially written blob.
#[derive(Debug, Clone)]
pub struct FilesystemBlobStorage {
    base_path: PathBuf,
}

impl FilesystemBlobStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn full_path(&self, path: &str) -> Result<PathBuf> {
        validate_blob_path(path)?;
        Ok(self.base_path.join(path))
    }

    async fn write_atomic(&self, full_path: &Path, data: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let file_name = full_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path =
            full_path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&temp_path, full_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStorage for FilesystemBlobStorage {
    async fn upload(&self, path: &str, data: &[u8], options: &UploadOptions) -> Result<String> {
        let full_path = self.full_path(path)?;
        debug!(
            subsystem = "storage",
            component = "filesystem",
            storage_path = %path,
            size_bytes = data.len(),
            upsert = options.upsert,
            "Writing blob"
        );

        if !options.upsert && fs::try_exists(&full_path).await.unwrap_or(false) {
            return Err(Error::Upload(format!("Object already exists: {}", path)));
        }

        self.write_atomic(&full_path, data).await.map_err(|e| {
            warn!(subsystem = "storage", storage_path = %path, error = %e, "Blob write failed");
            Error::Upload(format!("{}: {}", path, e))
        })?;

        Ok(path.to_string())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(path)?;
        match fs::read(&full_path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("Object not found: {}", path)))
            }
            Err(e) => Err(Error::Storage(format!("{}: {}", path, e))),
        }
    }
}

// =============================================================================
// SUPABASE
// =============================================================================

/// Supabase-compatible object storage over the REST API.
#[derive(Debug, Clone)]
pub struct SupabaseBlobStorage {
    client: reqwest::Client,
    base_url: String,
    service_key: String,
    bucket: String,
}

impl SupabaseBlobStorage {
    pub fn new(
        base_url: impl Into<String>,
        service_key: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(defaults::STORAGE_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build storage HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_key: service_key.into(),
            bucket: bucket.into(),
        })
    }

    fn upload_url(&self, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, path)
    }

    fn download_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/authenticated/{}/{}",
            self.base_url, self.bucket, path
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }
}

#[async_trait]
impl BlobStorage for SupabaseBlobStorage {
    async fn upload(&self, path: &str, data: &[u8], options: &UploadOptions) -> Result<String> {
        validate_blob_path(path)?;
        debug!(
            subsystem = "storage",
            component = "supabase",
            storage_path = %path,
            size_bytes = data.len(),
            "Uploading blob"
        );

        let response = self
            .authorize(self.client.post(self.upload_url(path)))
            .header("Content-Type", &options.content_type)
            .header("x-upsert", if options.upsert { "true" } else { "false" })
            .body(data.to_vec())
            .send()
            .await
            .map_err(|e| Error::Upload(format!("{}: {}", path, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Upload(format!(
                "Storage returned {} for {}: {}",
                status, path, body
            )));
        }
        Ok(path.to_string())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>> {
        validate_blob_path(path)?;
        let response = self
            .authorize(self.client.get(self.download_url(path)))
            .send()
            .await
            .map_err(|e| Error::Storage(format!("{}: {}", path, e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::BAD_REQUEST {
            return Err(Error::NotFound(format!("Object not found: {}", path)));
        }
        if !status.is_success() {
            return Err(Error::Storage(format!(
                "Storage returned {} for {}",
                status, path
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Storage(format!("{}: {}", path, e)))?;
        Ok(bytes.to_vec())
    }
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Which storage backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackendKind {
    Filesystem,
    Supabase,
}

impl std::str::FromStr for StorageBackendKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "filesystem" | "fs" | "local" => Ok(Self::Filesystem),
            "supabase" => Ok(Self::Supabase),
            _ => Err(format!("Invalid storage backend: {}", s)),
        }
    }
}

/// Blob storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackendKind,
    /// Base directory for the filesystem backend.
    pub path: PathBuf,
    pub supabase_url: Option<String>,
    pub supabase_service_key: Option<String>,
    pub bucket: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::Filesystem,
            path: PathBuf::from(defaults::STORAGE_PATH),
            supabase_url: None,
            supabase_service_key: None,
            bucket: defaults::STORAGE_BUCKET.to_string(),
        }
    }
}

impl StorageConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `STORAGE_BACKEND` | `filesystem` | `filesystem` or `supabase` |
    /// | `STORAGE_PATH` | `./data/blobs` | Base directory for the filesystem backend |
    /// | `SUPABASE_URL` | - | Object storage base URL (supabase backend) |
    /// | `SUPABASE_SERVICE_KEY` | - | Service key (supabase backend) |
    /// | `STORAGE_BUCKET` | `documents` | Bucket name (supabase backend) |
    pub fn from_env() -> Result<Self> {
        let backend = match std::env::var("STORAGE_BACKEND") {
            Ok(v) => v.parse::<StorageBackendKind>().map_err(Error::Config)?,
            Err(_) => StorageBackendKind::Filesystem,
        };

        Ok(Self {
            backend,
            path: std::env::var("STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(defaults::STORAGE_PATH)),
            supabase_url: std::env::var("SUPABASE_URL").ok().filter(|v| !v.is_empty()),
            supabase_service_key: std::env::var("SUPABASE_SERVICE_KEY")
                .ok()
                .filter(|v| !v.is_empty()),
            bucket: std::env::var("STORAGE_BUCKET")
                .unwrap_or_else(|_| defaults::STORAGE_BUCKET.to_string()),
        })
    }

    pub fn filesystem(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackendKind::Filesystem,
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn supabase(url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            backend: StorageBackendKind::Supabase,
            supabase_url: Some(url.into()),
            supabase_service_key: Some(service_key.into()),
            ..Default::default()
        }
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    /// Build the configured backend. Missing credentials are a configuration error.
    pub fn build(&self) -> Result<Arc<dyn BlobStorage>> {
        match self.backend {
            StorageBackendKind::Filesystem => {
                Ok(Arc::new(FilesystemBlobStorage::new(self.path.clone())))
            }
            StorageBackendKind::Supabase => {
                let url = self
                    .supabase_url
                    .as_deref()
                    .ok_or_else(|| Error::Config("SUPABASE_URL is not set".to_string()))?;
                let key = self.supabase_service_key.as_deref().ok_or_else(|| {
                    Error::Config("SUPABASE_SERVICE_KEY is not set".to_string())
                })?;
                Ok(Arc::new(SupabaseBlobStorage::new(url, key, &self.bucket)?))
            }
        }
    }
}
