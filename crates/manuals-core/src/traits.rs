//! Collaborator traits consumed by the ingestion orchestrator.
//!
//! Every external dependency of the pipeline sits behind one of these traits
//! so backends can be swapped and the orchestrator can be driven entirely by
//! in-memory doubles in tests.

use async_trait::async_trait;
use uuid::Uuid;

use crate::defaults;
use crate::error::Result;
use crate::models::*;

// =============================================================================
// JOB RECORD STORE
// =============================================================================

/// Durable job and document CRUD.
///
/// Implementations own serialization of concurrent writers and must enforce
/// [`JobStatus::can_transition_to`] on every status update.
#[async_trait]
pub trait JobRecordStore: Send + Sync {
    /// Cheap reachability check.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    /// Create a job in `queued` with zeroed counters.
    async fn create_job(&self, job: NewIngestJob) -> Result<IngestJob>;

    /// Move a job to `status`.
    ///
    /// `error` must be `Some` exactly when `status` is `failed`. Re-asserting
    /// the current status is a no-op; illegal moves return
    /// `Error::InvalidTransition`.
    async fn update_job_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error: Option<JobError>,
    ) -> Result<()>;

    /// Merge counters monotonically. Allowed after a terminal status.
    async fn update_job_progress(&self, job_id: Uuid, counters: &JobCounters) -> Result<()>;

    /// Record the outcome of the intelligence phase.
    async fn update_job_dip_success(&self, job_id: Uuid, success: bool) -> Result<()>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<IngestJob>>;

    async fn get_document(&self, doc_id: &str) -> Result<Option<Document>>;

    /// Insert or merge a document row keyed by `doc_id`.
    async fn create_or_update_document(&self, doc: DocumentUpsert) -> Result<Document>;

    async fn update_document_storage_path(&self, doc_id: &str, path: &str) -> Result<()>;

    /// Chunks written by the external processor, ordered by `chunk_index`.
    async fn get_chunks_by_doc_id(&self, doc_id: &str) -> Result<Vec<DocumentChunk>>;

    /// Jobs newest first.
    async fn list_jobs(&self, limit: i64, offset: i64) -> Result<Vec<IngestJob>>;

    /// Documents most recently updated first.
    async fn list_documents(&self, limit: i64, offset: i64) -> Result<Vec<Document>>;
}

// =============================================================================
// SYSTEM METADATA RESOLVER
// =============================================================================

/// Equipment registry lookup.
#[async_trait]
pub trait SystemMetadataResolver: Send + Sync {
    /// Resolve the normalized identity. The result is unvalidated.
    async fn lookup(&self, manufacturer_norm: &str, model_norm: &str) -> Result<SystemMetadata>;
}

// =============================================================================
// BLOB STORAGE
// =============================================================================

/// Options for a blob write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    pub content_type: String,
    /// Overwrite an existing object at the same path.
    pub upsert: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            content_type: defaults::PDF_CONTENT_TYPE.to_string(),
            upsert: false,
        }
    }
}

impl UploadOptions {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            upsert: false,
        }
    }

    pub fn with_upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }
}

/// Path-addressed object storage.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Write `data` at `path` and return the stored path.
    async fn upload(&self, path: &str, data: &[u8], options: &UploadOptions) -> Result<String>;

    /// Read the object at `path`. A missing object is an error.
    async fn download(&self, path: &str) -> Result<Vec<u8>>;
}

// =============================================================================
// EXTERNAL PROCESSOR
// =============================================================================

/// Remote extraction service (text, OCR, tables, chunking, vector upsert).
#[async_trait]
pub trait ExternalProcessor: Send + Sync {
    /// Process one document synchronously.
    ///
    /// Returns the parsed body even when it carries `success: false`;
    /// transport failures and non-2xx statuses are errors.
    async fn process(
        &self,
        data: Vec<u8>,
        metadata: &DocMetadata,
        flags: ProcessingFlags,
    ) -> Result<ProcessorResponse>;

    /// Reachability check.
    async fn health(&self) -> Result<()>;
}

// =============================================================================
// INTELLIGENCE GENERATOR
// =============================================================================

/// Produces the document intelligence packet and persists its JSON artifact
/// at `manuals/{doc_id}/dip.json`.
#[async_trait]
pub trait IntelligenceGenerator: Send + Sync {
    async fn generate_dip(
        &self,
        data: &[u8],
        doc_id: &str,
        file_name: &str,
        options: &DipOptions,
    ) -> Result<DipSummary>;
}

// =============================================================================
// ENTITY CANDIDATE STORE
// =============================================================================

/// Staging area for extracted facts pending human review.
#[async_trait]
pub trait EntityCandidateStore: Send + Sync {
    async fn insert_entity_candidate(
        &self,
        doc_id: &str,
        entity: &DipEntity,
        actor: &str,
    ) -> Result<()>;
}
