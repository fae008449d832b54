//! Centralized default constants for the manuals ingestion pipeline.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates and binaries reference these constants instead of defining their
//! own magic numbers. Runtime overrides go through the `from_env()` config
//! constructors, never through edits here.

// =============================================================================
// STORAGE VERIFICATION
// =============================================================================

/// Number of read attempts before an upload is declared unverifiable.
pub const VERIFY_MAX_ATTEMPTS: u32 = 20;

/// Fixed delay between verification attempts in milliseconds.
pub const VERIFY_RETRY_DELAY_MS: u64 = 3_000;

/// Extra wait after the first successful read before `upload_complete`.
pub const VERIFY_GRACE_MS: u64 = 5_000;

/// Diagnostic recorded on the job when verification gives up.
pub const VERIFY_FAILURE_MESSAGE: &str = "Unable to validate storage path, job ended";

// =============================================================================
// STORAGE LAYOUT
// =============================================================================

/// Top-level prefix for every manual blob.
pub const STORAGE_PREFIX: &str = "manuals";

/// File name of the derived intelligence artifact inside a document folder.
pub const DIP_ARTIFACT_NAME: &str = "dip.json";

/// Default bucket for the Supabase-compatible object storage backend.
pub const STORAGE_BUCKET: &str = "documents";

/// Default base directory for the filesystem storage backend.
pub const STORAGE_PATH: &str = "./data/blobs";

/// Content type assumed when the uploader does not supply one.
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

// =============================================================================
// PROCESSING
// =============================================================================

/// Default sidecar (external processor) base URL.
pub const SIDECAR_URL: &str = "http://127.0.0.1:8000";

/// Timeout for a single document processing request in seconds.
/// Large scanned manuals with OCR routinely take minutes.
pub const SIDECAR_TIMEOUT_SECS: u64 = 600;

/// Timeout for object storage requests in seconds.
pub const STORAGE_TIMEOUT_SECS: u64 = 60;

/// Default vector namespace for upserted chunks.
pub const NAMESPACE: &str = "REIMAGINEDDOCS";

/// Parser version recorded in the job params snapshot.
pub const PARSER_VERSION: &str = "1.0.0";

/// Embedding model recorded in the job params snapshot.
pub const EMBED_MODEL: &str = "text-embedding-3-large";

/// Source tag written on every system-extracted entity candidate.
pub const ENTITY_SOURCE: &str = "system";

/// Actor recorded on entity candidates created by the pipeline.
pub const PIPELINE_ACTOR: &str = "ingest-pipeline";

// =============================================================================
// WORKER
// =============================================================================

/// Capacity of the in-process ingest task queue.
pub const WORKER_QUEUE_CAPACITY: usize = 256;

/// Maximum number of tasks the worker runs concurrently.
pub const WORKER_MAX_CONCURRENT: usize = 4;

/// Default event bus broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Interval between reconciliation sweeps in seconds.
pub const RECONCILE_INTERVAL_SECS: u64 = 300;

/// Age after which a `queued` job without a stored blob is considered orphaned.
pub const ORPHAN_AFTER_SECS: i64 = 3_600;

/// Age after which a job still in `parsing`, `embedding` or `upserting` is
/// considered abandoned. Must stay well above [`SIDECAR_TIMEOUT_SECS`].
pub const STALE_PROCESSING_SECS: u64 = 7_200;

// =============================================================================
// PAGINATION
// =============================================================================

/// Default page size for job and document listings.
pub const PAGE_LIMIT: i64 = 50;
