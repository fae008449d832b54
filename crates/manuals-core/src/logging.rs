//! Structured logging schema and field name constants.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query a job's whole lifecycle by the same keys.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Job failed terminally, requires operator attention |
//! | WARN  | Isolated failure absorbed (intelligence phase, single entity insert) |
//! | INFO  | Status transitions, worker lifecycle, job completions |
//! | DEBUG | Retry attempts, collaborator calls, config choices |
//! | TRACE | Per-item iteration (entities, chunks) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "orchestrator", "worker", "db", "storage", "sidecar"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "verification", "dispatch", "intelligence", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "create_ingest_job", "verify_storage", "process_job"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Ingest job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Content-addressed document id.
pub const DOC_ID: &str = "doc_id";

/// Job type (standard / dip).
pub const JOB_TYPE: &str = "job_type";

/// Job status after a transition.
pub const STATUS: &str = "status";

/// Pipeline stage recorded in a job error.
pub const STAGE: &str = "stage";

/// Blob storage path.
pub const STORAGE_PATH: &str = "storage_path";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Verification attempt number (1-based).
pub const ATTEMPT: &str = "attempt";

/// Payload size in bytes.
pub const SIZE_BYTES: &str = "size_bytes";

/// Number of chunks reported by the processor.
pub const CHUNK_COUNT: &str = "chunk_count";

/// Number of entities seen or inserted.
pub const ENTITY_COUNT: &str = "entity_count";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
