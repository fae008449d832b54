//! Domain models for the manuals ingestion pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};

// =============================================================================
// JOB TYPES
// =============================================================================

/// Lifecycle status of an ingest job.
///
/// Forward order: `queued → upload_success → upload_complete → parsing →
/// embedding → upserting → completed`. `failed` is reachable from every
/// non-terminal status. `completed` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    UploadSuccess,
    UploadComplete,
    Parsing,
    Embedding,
    Upserting,
    Completed,
    Failed,
}

impl JobStatus {
    /// Position in the forward order. `failed` sorts after everything.
    pub fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::UploadSuccess => 1,
            Self::UploadComplete => 2,
            Self::Parsing => 3,
            Self::Embedding => 4,
            Self::Upserting => 5,
            Self::Completed => 6,
            Self::Failed => 7,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The external processor owns the job.
    pub fn is_processing(self) -> bool {
        matches!(self, Self::Parsing | Self::Embedding | Self::Upserting)
    }

    /// Whether a job currently in `self` may be moved to `next`.
    ///
    /// Terminal states accept nothing. Otherwise `failed` is always allowed,
    /// and any status at or beyond the current rank is allowed. Re-asserting
    /// the current status is accepted and is a no-op for stores.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Self::Failed || next.rank() >= self.rank()
    }

    /// Return `Ok(())` if the move is legal, `Error::InvalidTransition` otherwise.
    pub fn check_transition(self, next: JobStatus) -> Result<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::UploadSuccess => "upload_success",
            Self::UploadComplete => "upload_complete",
            Self::Parsing => "parsing",
            Self::Embedding => "embedding",
            Self::Upserting => "upserting",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(Self::Queued),
            "upload_success" => Ok(Self::UploadSuccess),
            "upload_complete" => Ok(Self::UploadComplete),
            "parsing" => Ok(Self::Parsing),
            "embedding" => Ok(Self::Embedding),
            "upserting" => Ok(Self::Upserting),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

/// Kind of ingest job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobType {
    /// Extraction, chunking and vector upsert only
    #[default]
    Standard,
    /// Standard processing followed by the document intelligence packet phase
    Dip,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "STANDARD"),
            Self::Dip => write!(f, "DIP"),
        }
    }
}

impl std::str::FromStr for JobType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "STANDARD" => Ok(Self::Standard),
            "DIP" => Ok(Self::Dip),
            _ => Err(format!("Invalid job type: {}", s)),
        }
    }
}

/// Pipeline stage named in a job failure record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    /// Blob never reached storage (reconciliation of orphaned jobs)
    Upload,
    StorageVerification,
    Processing,
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Upload => write!(f, "upload"),
            Self::StorageVerification => write!(f, "storage_verification"),
            Self::Processing => write!(f, "processing"),
        }
    }
}

/// Structured failure diagnostic stored on a failed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub stage: JobStage,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl JobError {
    pub fn new(stage: JobStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Immutable configuration snapshot captured when a job is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParams {
    #[serde(default)]
    pub ocr_enabled: bool,
    #[serde(default = "default_true")]
    pub extract_tables: bool,
    #[serde(default)]
    pub dry_run: bool,
    pub parser_version: String,
    pub embed_model: String,
    pub namespace: String,
}

fn default_true() -> bool {
    true
}

impl Default for JobParams {
    fn default() -> Self {
        Self {
            ocr_enabled: false,
            extract_tables: true,
            dry_run: false,
            parser_version: defaults::PARSER_VERSION.to_string(),
            embed_model: defaults::EMBED_MODEL.to_string(),
            namespace: defaults::NAMESPACE.to_string(),
        }
    }
}

/// Progress counters for an ingest job.
///
/// The DIP fields are only populated for DIP jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    #[serde(default)]
    pub pages_total: u64,
    #[serde(default)]
    pub pages_ocr: u64,
    #[serde(default)]
    pub tables: u64,
    #[serde(default)]
    pub chunks: u64,
    #[serde(default)]
    pub upserted: u64,
    #[serde(default)]
    pub skipped_duplicates: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities_extracted: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_hints_found: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub golden_tests_generated: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dip_error: Option<String>,
}

impl JobCounters {
    /// Fold `patch` into `self` without letting any counter decrease.
    ///
    /// `dip_error` is replaced when the patch carries one.
    pub fn merge(&mut self, patch: &JobCounters) {
        self.pages_total = self.pages_total.max(patch.pages_total);
        self.pages_ocr = self.pages_ocr.max(patch.pages_ocr);
        self.tables = self.tables.max(patch.tables);
        self.chunks = self.chunks.max(patch.chunks);
        self.upserted = self.upserted.max(patch.upserted);
        self.skipped_duplicates = self.skipped_duplicates.max(patch.skipped_duplicates);
        self.entities_extracted = max_opt(self.entities_extracted, patch.entities_extracted);
        self.spec_hints_found = max_opt(self.spec_hints_found, patch.spec_hints_found);
        self.golden_tests_generated =
            max_opt(self.golden_tests_generated, patch.golden_tests_generated);
        if patch.dip_error.is_some() {
            self.dip_error = patch.dip_error.clone();
        }
    }

    /// Base (non-DIP) counters only.
    pub fn base(&self) -> JobCounters {
        JobCounters {
            pages_total: self.pages_total,
            pages_ocr: self.pages_ocr,
            tables: self.tables,
            chunks: self.chunks,
            upserted: self.upserted,
            skipped_duplicates: self.skipped_duplicates,
            ..Default::default()
        }
    }

    /// True when no counter ever moved below `previous`.
    pub fn dominates(&self, previous: &JobCounters) -> bool {
        self.pages_total >= previous.pages_total
            && self.pages_ocr >= previous.pages_ocr
            && self.tables >= previous.tables
            && self.chunks >= previous.chunks
            && self.upserted >= previous.upserted
            && self.skipped_duplicates >= previous.skipped_duplicates
            && self.entities_extracted.unwrap_or(0) >= previous.entities_extracted.unwrap_or(0)
            && self.spec_hints_found.unwrap_or(0) >= previous.spec_hints_found.unwrap_or(0)
            && self.golden_tests_generated.unwrap_or(0)
                >= previous.golden_tests_generated.unwrap_or(0)
    }
}

fn max_opt(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

/// An ingest job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestJob {
    pub job_id: Uuid,
    pub doc_id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub params: JobParams,
    pub counters: JobCounters,
    /// Set iff `status == failed`.
    pub error: Option<JobError>,
    /// Outcome of the intelligence phase; `None` until it ran.
    pub dip_success: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Data needed to create a job. The store assigns `job_id` and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewIngestJob {
    pub doc_id: String,
    pub job_type: JobType,
    pub params: JobParams,
}

// =============================================================================
// DOCUMENT TYPES
// =============================================================================

/// Resolved equipment identity for a (manufacturer, model) pair.
///
/// Kept in the raw registry shape; call [`SystemMetadata::validate`] before use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemMetadata {
    pub asset_uid: String,
    pub system_norm: String,
    pub subsystem_norm: String,
}

impl SystemMetadata {
    pub fn new(
        asset_uid: impl Into<String>,
        system_norm: impl Into<String>,
        subsystem_norm: impl Into<String>,
    ) -> Self {
        Self {
            asset_uid: asset_uid.into(),
            system_norm: system_norm.into(),
            subsystem_norm: subsystem_norm.into(),
        }
    }

    /// Check the shape strictly and return the parsed asset id.
    pub fn validate(&self) -> Result<Uuid> {
        for (field, value) in [
            ("asset_uid", &self.asset_uid),
            ("system_norm", &self.system_norm),
            ("subsystem_norm", &self.subsystem_norm),
        ] {
            if value.trim().is_empty() {
                return Err(Error::SystemLookup(format!(
                    "System metadata field '{}' is empty",
                    field
                )));
            }
        }
        Uuid::parse_str(self.asset_uid.trim()).map_err(|e| {
            Error::SystemLookup(format!(
                "System metadata asset_uid '{}' is not a UUID: {}",
                self.asset_uid, e
            ))
        })
    }
}

/// A stored manual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub manufacturer: String,
    pub model: String,
    pub manufacturer_norm: String,
    pub model_norm: String,
    pub asset_uid: Uuid,
    pub system_norm: String,
    pub subsystem_norm: String,
    pub revision_date: Option<String>,
    pub language: Option<String>,
    pub brand_family: Option<String>,
    pub source_url: Option<String>,
    pub storage_path: Option<String>,
    pub last_ingest_version: Option<String>,
    pub last_job_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// File name portion of the storage path, if the blob was stored.
    pub fn file_name(&self) -> Option<&str> {
        self.storage_path
            .as_deref()
            .and_then(|p| p.rsplit('/').next())
            .filter(|name| !name.is_empty())
    }
}

/// Document fields written at ingestion time.
///
/// Constructing one requires a resolved [`SystemMetadata`], so a document
/// row can never be written without its normalized identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentUpsert {
    pub doc_id: String,
    pub manufacturer: String,
    pub model: String,
    pub manufacturer_norm: String,
    pub model_norm: String,
    pub asset_uid: Uuid,
    pub system_norm: String,
    pub subsystem_norm: String,
    pub revision_date: Option<String>,
    pub language: Option<String>,
    pub brand_family: Option<String>,
    pub source_url: Option<String>,
    pub last_ingest_version: Option<String>,
    pub last_job_id: Option<Uuid>,
}

/// A processed chunk of a document, as written by the external processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub chunk_id: Uuid,
    pub doc_id: String,
    pub chunk_index: i32,
    pub page: Option<i32>,
    pub content: String,
    /// "text", "ocr" or "table"
    pub content_type: String,
}

// =============================================================================
// INGEST REQUEST / RECEIPT
// =============================================================================

/// A file submitted for ingestion together with its equipment metadata.
#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    /// Overrides the content-addressed id when set.
    pub doc_id: Option<String>,
    pub job_type: JobType,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub manufacturer_norm: Option<String>,
    pub model_norm: Option<String>,
    pub revision_date: Option<String>,
    pub language: Option<String>,
    pub brand_family: Option<String>,
    pub source_url: Option<String>,
    pub ocr_enabled: bool,
    pub dry_run: bool,
}

impl IngestRequest {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
            ..Default::default()
        }
    }

    pub fn with_identity(
        mut self,
        manufacturer: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self.model = Some(model.into());
        self
    }

    pub fn with_normalized_identity(
        mut self,
        manufacturer_norm: impl Into<String>,
        model_norm: impl Into<String>,
    ) -> Self {
        self.manufacturer_norm = Some(manufacturer_norm.into());
        self.model_norm = Some(model_norm.into());
        self
    }

    pub fn with_job_type(mut self, job_type: JobType) -> Self {
        self.job_type = job_type;
        self
    }

    pub fn with_doc_id(mut self, doc_id: impl Into<String>) -> Self {
        self.doc_id = Some(doc_id.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_ocr(mut self, enabled: bool) -> Self {
        self.ocr_enabled = enabled;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_revision_date(mut self, revision_date: impl Into<String>) -> Self {
        self.revision_date = Some(revision_date.into());
        self
    }

    /// Normalized manufacturer, falling back to the display value.
    pub fn manufacturer_identity(&self) -> Option<&str> {
        non_blank(self.manufacturer_norm.as_deref()).or(non_blank(self.manufacturer.as_deref()))
    }

    /// Normalized model, falling back to the display value.
    pub fn model_identity(&self) -> Option<&str> {
        non_blank(self.model_norm.as_deref()).or(non_blank(self.model.as_deref()))
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Returned to the submitter once the job is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReceipt {
    pub doc_id: String,
    pub job_id: Uuid,
    pub status: JobStatus,
}

// =============================================================================
// EXTERNAL PROCESSOR TYPES
// =============================================================================

/// Metadata envelope sent to the external processor as `doc_metadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocMetadata {
    pub doc_id: String,
    pub manufacturer: String,
    pub model: String,
    pub revision_date: Option<String>,
    pub language: Option<String>,
    pub job_id: Uuid,
    pub file_name: String,
}

/// Processing switches forwarded with the multipart request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingFlags {
    pub extract_tables: bool,
    pub ocr_enabled: bool,
}

impl From<&JobParams> for ProcessingFlags {
    fn from(params: &JobParams) -> Self {
        Self {
            extract_tables: params.extract_tables,
            ocr_enabled: params.ocr_enabled,
        }
    }
}

/// Body returned by the external processor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessorResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub chunks_processed: u64,
    #[serde(default)]
    pub vectors_upserted: u64,
    #[serde(default)]
    pub pages_total: u64,
    #[serde(default)]
    pub pages_ocr: u64,
    #[serde(default)]
    pub tables_found: u64,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub processing_time: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ProcessorResponse {
    /// Map the wire counters onto job counter names.
    pub fn counters(&self) -> JobCounters {
        JobCounters {
            pages_total: self.pages_total,
            pages_ocr: self.pages_ocr,
            tables: self.tables_found,
            chunks: self.chunks_processed,
            upserted: self.vectors_upserted,
            ..Default::default()
        }
    }
}

// =============================================================================
// INTELLIGENCE (DIP) TYPES
// =============================================================================

/// Context passed to the intelligence generator.
#[derive(Debug, Clone, PartialEq)]
pub struct DipOptions {
    pub job_id: Uuid,
    pub manufacturer: String,
    pub model: String,
    pub asset_uid: Uuid,
    pub system_norm: String,
    pub subsystem_norm: String,
}

/// A fact extracted into the intelligence packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DipEntity {
    pub entity_type: String,
    pub value: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub page: Option<i32>,
    #[serde(default)]
    pub context: Option<String>,
}

/// A specification value with an optional unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecHint {
    pub hint_type: String,
    pub value: String,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub page: Option<i32>,
    #[serde(default)]
    pub context: Option<String>,
}

/// A suggested verification scenario derived from the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldenTest {
    pub test_name: String,
    pub test_type: String,
    pub description: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub expected_result: Option<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub page: Option<i32>,
}

/// An imperative instruction lifted verbatim from the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookHint {
    pub hint: String,
    #[serde(default)]
    pub page: Option<i32>,
    #[serde(default)]
    pub confidence: f64,
}

/// The persisted `dip.json` artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DipArtifact {
    pub doc_id: String,
    #[serde(default)]
    pub entities: Vec<DipEntity>,
    #[serde(default)]
    pub spec_hints: Vec<SpecHint>,
    #[serde(default)]
    pub golden_tests: Vec<GoldenTest>,
    #[serde(default)]
    pub playbook_hints: Vec<PlaybookHint>,
    #[serde(default)]
    pub generated_at: Option<DateTime<Utc>>,
}

/// Summary returned by the intelligence generator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DipSummary {
    pub entities_count: u64,
    pub hints_count: u64,
    pub tests_count: u64,
    #[serde(default)]
    pub playbook_count: u64,
    #[serde(default)]
    pub entities: Vec<DipEntity>,
}

impl DipSummary {
    pub fn counters(&self) -> JobCounters {
        JobCounters {
            entities_extracted: Some(self.entities_count),
            spec_hints_found: Some(self.hints_count),
            golden_tests_generated: Some(self.tests_count),
            ..Default::default()
        }
    }
}

/// Outcome of the isolated intelligence phase.
///
/// Failure is a value here, never an error that unwinds into the primary path.
#[derive(Debug, Clone, PartialEq)]
pub enum IntelligenceOutcome {
    /// Not a DIP job.
    Skipped,
    Generated(DipSummary),
    Failed(String),
}

impl IntelligenceOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Generated(_))
    }
}

/// Result of staging the entities of a DIP artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseOutcome {
    pub entities_inserted: usize,
    pub total_entities: usize,
}

/// A staged entity awaiting review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityCandidate {
    pub id: Uuid,
    pub doc_id: String,
    pub entity_type: String,
    pub value: String,
    pub source: String,
    pub status: String,
    pub confidence: f64,
    pub page: Option<i32>,
    pub context: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// STORAGE PATHS
// =============================================================================

/// `manuals/{doc_id}/{file_name}`
pub fn blob_path(doc_id: &str, file_name: &str) -> String {
    format!("{}/{}/{}", defaults::STORAGE_PREFIX, doc_id, file_name)
}

/// `manuals/{doc_id}/dip.json`
pub fn dip_artifact_path(doc_id: &str) -> String {
    blob_path(doc_id, defaults::DIP_ARTIFACT_NAME)
}
