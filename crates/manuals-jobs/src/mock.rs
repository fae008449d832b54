//! In-memory collaborators for deterministic testing.
//!
//! Every collaborator trait the orchestrator depends on has a mock here. The
//! mocks record their calls so tests can assert on side effects (or the lack
//! of them), and can be scripted to fail.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use manuals_jobs::mock::{MockBlobStorage, MockJobStore, MockProcessor, MockResolver};
//! use manuals_jobs::IngestionOrchestrator;
//!
//! let store = Arc::new(MockJobStore::new());
//! let orchestrator = IngestionOrchestrator::builder(store.clone(), Arc::new(MockResolver::kenyon()))
//!     .with_storage(Arc::new(MockBlobStorage::new()))
//!     .with_processor(Arc::new(MockProcessor::new()))
//!     .build();
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use manuals_core::{
    dip_artifact_path, BlobStorage, DipArtifact, DipEntity, DipOptions, DipSummary, DocMetadata,
    Document, DocumentChunk, DocumentUpsert, EntityCandidateStore, Error, ExternalProcessor,
    IngestJob, IntelligenceGenerator, JobCounters, JobError, JobRecordStore, JobStatus,
    NewIngestJob, ProcessingFlags, ProcessorResponse, Result, SystemMetadata,
    SystemMetadataResolver, UploadOptions,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// JOB RECORD STORE
// =============================================================================

/// A write performed against [`MockJobStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    CreateJob { doc_id: String },
    UpdateStatus { job_id: Uuid, status: JobStatus },
    UpdateProgress { job_id: Uuid, counters: JobCounters },
    UpdateDipSuccess { job_id: Uuid, success: bool },
    UpsertDocument { doc_id: String },
    UpdateStoragePath { doc_id: String, path: String },
}

#[derive(Default)]
struct StoreState {
    jobs: HashMap<Uuid, IngestJob>,
    documents: HashMap<String, Document>,
    chunks: HashMap<String, Vec<DocumentChunk>>,
    calls: Vec<StoreCall>,
    refused_status: Option<JobStatus>,
}

/// In-memory job record store that enforces the status state machine.
#[derive(Default)]
pub struct MockJobStore {
    state: Mutex<StoreState>,
    unreachable: std::sync::atomic::AtomicBool,
}

impl MockJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `ping` fail.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Fail every write of `status` without touching the record.
    pub fn refuse_status(&self, status: JobStatus) {
        lock(&self.state).refused_status = Some(status);
    }

    /// `update_job_progress` payloads for a job, in order.
    pub fn progress_updates(&self, job_id: Uuid) -> Vec<JobCounters> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|c| match c {
                StoreCall::UpdateProgress {
                    job_id: id,
                    counters,
                } if *id == job_id => Some(counters.clone()),
                _ => None,
            })
            .collect()
    }

    /// Seed processed chunks for a document.
    pub fn insert_chunks(&self, doc_id: &str, chunks: Vec<DocumentChunk>) {
        lock(&self.state).chunks.insert(doc_id.to_string(), chunks);
    }

    /// Seed a job directly, bypassing `create_job`.
    pub fn insert_job(&self, job: IngestJob) {
        lock(&self.state).jobs.insert(job.job_id, job);
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        lock(&self.state).calls.clone()
    }

    /// Number of writes of any kind.
    pub fn write_count(&self) -> usize {
        lock(&self.state).calls.len()
    }

    /// Statuses written for a job, in order.
    pub fn status_history(&self, job_id: Uuid) -> Vec<JobStatus> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|c| match c {
                StoreCall::UpdateStatus { job_id: id, status } if *id == job_id => Some(*status),
                _ => None,
            })
            .collect()
    }

    /// `update_job_dip_success` calls for a job.
    pub fn dip_success_calls(&self, job_id: Uuid) -> Vec<bool> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|c| match c {
                StoreCall::UpdateDipSuccess { job_id: id, success } if *id == job_id => {
                    Some(*success)
                }
                _ => None,
            })
            .collect()
    }

    pub fn job(&self, job_id: Uuid) -> Option<IngestJob> {
        lock(&self.state).jobs.get(&job_id).cloned()
    }

    pub fn document(&self, doc_id: &str) -> Option<Document> {
        lock(&self.state).documents.get(doc_id).cloned()
    }

    pub fn job_count(&self) -> usize {
        lock(&self.state).jobs.len()
    }
}

#[async_trait]
impl JobRecordStore for MockJobStore {
    async fn ping(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Error::Internal("store unreachable".to_string()));
        }
        Ok(())
    }

    async fn create_job(&self, job: NewIngestJob) -> Result<IngestJob> {
        let now = Utc::now();
        let record = IngestJob {
            job_id: Uuid::now_v7(),
            doc_id: job.doc_id.clone(),
            job_type: job.job_type,
            status: JobStatus::Queued,
            params: job.params,
            counters: JobCounters::default(),
            error: None,
            dip_success: None,
            created_at: now,
            started_at: None,
            updated_at: now,
            completed_at: None,
        };
        let mut state = lock(&self.state);
        state.calls.push(StoreCall::CreateJob { doc_id: job.doc_id });
        state.jobs.insert(record.job_id, record.clone());
        Ok(record)
    }

    async fn update_job_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error: Option<JobError>,
    ) -> Result<()> {
        if (status == JobStatus::Failed) != error.is_some() {
            return Err(Error::InvalidInput(
                "error must accompany failed and nothing else".to_string(),
            ));
        }
        let mut state = lock(&self.state);
        if state.refused_status == Some(status) {
            return Err(Error::Internal(format!("mock store refused status {}", status)));
        }
        let job = state.jobs.get_mut(&job_id).ok_or(Error::JobNotFound(job_id))?;
        job.status.check_transition(status)?;
        if job.status != status {
            let now = Utc::now();
            job.status = status;
            job.error = error;
            job.updated_at = now;
            if status == JobStatus::Parsing && job.started_at.is_none() {
                job.started_at = Some(now);
            }
            if status.is_terminal() {
                job.completed_at = Some(now);
            }
        }
        state.calls.push(StoreCall::UpdateStatus { job_id, status });
        Ok(())
    }

    async fn update_job_progress(&self, job_id: Uuid, counters: &JobCounters) -> Result<()> {
        let mut state = lock(&self.state);
        let job = state.jobs.get_mut(&job_id).ok_or(Error::JobNotFound(job_id))?;
        job.counters.merge(counters);
        job.updated_at = Utc::now();
        state.calls.push(StoreCall::UpdateProgress {
            job_id,
            counters: counters.clone(),
        });
        Ok(())
    }

    async fn update_job_dip_success(&self, job_id: Uuid, success: bool) -> Result<()> {
        let mut state = lock(&self.state);
        let job = state.jobs.get_mut(&job_id).ok_or(Error::JobNotFound(job_id))?;
        job.dip_success = Some(success);
        state
            .calls
            .push(StoreCall::UpdateDipSuccess { job_id, success });
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<IngestJob>> {
        Ok(self.job(job_id))
    }

    async fn get_document(&self, doc_id: &str) -> Result<Option<Document>> {
        Ok(self.document(doc_id))
    }

    async fn create_or_update_document(&self, doc: DocumentUpsert) -> Result<Document> {
        let now = Utc::now();
        let mut state = lock(&self.state);
        state.calls.push(StoreCall::UpsertDocument {
            doc_id: doc.doc_id.clone(),
        });
        let existing = state.documents.get(&doc.doc_id).cloned();
        let record = Document {
            doc_id: doc.doc_id.clone(),
            manufacturer: doc.manufacturer,
            model: doc.model,
            manufacturer_norm: doc.manufacturer_norm,
            model_norm: doc.model_norm,
            asset_uid: doc.asset_uid,
            system_norm: doc.system_norm,
            subsystem_norm: doc.subsystem_norm,
            revision_date: doc.revision_date,
            language: doc.language,
            brand_family: doc.brand_family,
            source_url: doc.source_url,
            storage_path: existing.as_ref().and_then(|d| d.storage_path.clone()),
            last_ingest_version: doc.last_ingest_version,
            last_job_id: doc.last_job_id,
            created_at: existing.as_ref().map(|d| d.created_at).unwrap_or(now),
            updated_at: now,
        };
        state.documents.insert(doc.doc_id, record.clone());
        Ok(record)
    }

    async fn update_document_storage_path(&self, doc_id: &str, path: &str) -> Result<()> {
        let mut state = lock(&self.state);
        let doc = state
            .documents
            .get_mut(doc_id)
            .ok_or_else(|| Error::DocumentNotFound(doc_id.to_string()))?;
        doc.storage_path = Some(path.to_string());
        doc.updated_at = Utc::now();
        state.calls.push(StoreCall::UpdateStoragePath {
            doc_id: doc_id.to_string(),
            path: path.to_string(),
        });
        Ok(())
    }

    async fn get_chunks_by_doc_id(&self, doc_id: &str) -> Result<Vec<DocumentChunk>> {
        Ok(lock(&self.state)
            .chunks
            .get(doc_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_jobs(&self, limit: i64, offset: i64) -> Result<Vec<IngestJob>> {
        let mut jobs: Vec<IngestJob> = lock(&self.state).jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.job_id.cmp(&a.job_id)));
        Ok(jobs
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn list_documents(&self, limit: i64, offset: i64) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = lock(&self.state).documents.values().cloned().collect();
        docs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.doc_id.cmp(&b.doc_id)));
        Ok(docs
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }
}

// =============================================================================
// SYSTEM METADATA RESOLVER
// =============================================================================

/// Registry lookup backed by a fixed table.
#[derive(Default)]
pub struct MockResolver {
    systems: HashMap<(String, String), SystemMetadata>,
    calls: AtomicUsize,
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the Kenyon BBQ grill used throughout the tests.
    pub fn kenyon() -> Self {
        Self::new().with_system(
            "Kenyon",
            "BBQ Grill System",
            SystemMetadata::new("11111111-1111-1111-1111-111111111111", "Galley", "Cooking"),
        )
    }

    pub fn with_system(
        mut self,
        manufacturer_norm: &str,
        model_norm: &str,
        metadata: SystemMetadata,
    ) -> Self {
        self.systems.insert(
            (manufacturer_norm.to_string(), model_norm.to_string()),
            metadata,
        );
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SystemMetadataResolver for MockResolver {
    async fn lookup(&self, manufacturer_norm: &str, model_norm: &str) -> Result<SystemMetadata> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.systems
            .get(&(manufacturer_norm.to_string(), model_norm.to_string()))
            .cloned()
            .ok_or_else(|| {
                Error::SystemLookup(format!(
                    "No system registered for {} / {}",
                    manufacturer_norm, model_norm
                ))
            })
    }
}

// =============================================================================
// BLOB STORAGE
// =============================================================================

/// In-memory blob storage with scriptable failures.
#[derive(Default)]
pub struct MockBlobStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    uploads: Mutex<Vec<String>>,
    fail_uploads: std::sync::atomic::AtomicBool,
    failing_downloads: AtomicU32,
    downloads: AtomicU32,
}

impl MockBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every upload fails.
    pub fn failing_uploads() -> Self {
        let storage = Self::default();
        storage.fail_uploads.store(true, Ordering::SeqCst);
        storage
    }

    /// The next `n` downloads fail regardless of content.
    pub fn fail_next_downloads(&self, n: u32) {
        self.failing_downloads.store(n, Ordering::SeqCst);
    }

    /// Store an object directly.
    pub fn put(&self, path: &str, data: impl Into<Vec<u8>>) {
        lock(&self.objects).insert(path.to_string(), data.into());
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        lock(&self.objects).get(path).cloned()
    }

    pub fn uploaded_paths(&self) -> Vec<String> {
        lock(&self.uploads).clone()
    }

    pub fn download_count(&self) -> u32 {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStorage for MockBlobStorage {
    async fn upload(&self, path: &str, data: &[u8], options: &UploadOptions) -> Result<String> {
        lock(&self.uploads).push(path.to_string());
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(Error::Upload(format!("mock upload refused: {}", path)));
        }
        let mut objects = lock(&self.objects);
        if !options.upsert && objects.contains_key(path) {
            return Err(Error::Upload(format!("Object already exists: {}", path)));
        }
        objects.insert(path.to_string(), data.to_vec());
        Ok(path.to_string())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let scripted_failure = self
            .failing_downloads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scripted_failure {
            return Err(Error::Storage(format!("mock download unavailable: {}", path)));
        }
        self.get(path)
            .ok_or_else(|| Error::NotFound(format!("Object not found: {}", path)))
    }
}

// =============================================================================
// EXTERNAL PROCESSOR
// =============================================================================

/// A request received by [`MockProcessor`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessCall {
    pub size_bytes: usize,
    pub metadata: DocMetadata,
    pub flags: ProcessingFlags,
}

/// Processor returning a canned response.
pub struct MockProcessor {
    response: Mutex<std::result::Result<ProcessorResponse, String>>,
    healthy: std::sync::atomic::AtomicBool,
    calls: Mutex<Vec<ProcessCall>>,
}

impl Default for MockProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProcessor {
    /// Healthy processor reporting a small successful run.
    pub fn new() -> Self {
        Self {
            response: Mutex::new(Ok(ProcessorResponse {
                success: true,
                filename: None,
                chunks_processed: 12,
                vectors_upserted: 12,
                pages_total: 4,
                pages_ocr: 0,
                tables_found: 1,
                namespace: Some(manuals_core::defaults::NAMESPACE.to_string()),
                processing_time: Some(1.5),
                error: None,
            })),
            healthy: std::sync::atomic::AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_response(self, response: ProcessorResponse) -> Self {
        *lock(&self.response) = Ok(response);
        self
    }

    /// Every call fails at the transport level with `message`.
    pub fn failing(self, message: impl Into<String>) -> Self {
        *lock(&self.response) = Err(message.into());
        self
    }

    pub fn unhealthy(self) -> Self {
        self.healthy.store(false, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> Vec<ProcessCall> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl ExternalProcessor for MockProcessor {
    async fn process(
        &self,
        data: Vec<u8>,
        metadata: &DocMetadata,
        flags: ProcessingFlags,
    ) -> Result<ProcessorResponse> {
        lock(&self.calls).push(ProcessCall {
            size_bytes: data.len(),
            metadata: metadata.clone(),
            flags,
        });
        match &*lock(&self.response) {
            Ok(response) => Ok(ProcessorResponse {
                filename: Some(metadata.file_name.clone()),
                ..response.clone()
            }),
            Err(message) => Err(Error::Processing(message.clone())),
        }
    }

    async fn health(&self) -> Result<()> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Request("processor unreachable".to_string()))
        }
    }
}

// =============================================================================
// INTELLIGENCE GENERATOR
// =============================================================================

/// Generator returning fixed entities, optionally persisting the artifact.
pub struct MockIntelligenceGenerator {
    entities: Vec<DipEntity>,
    failure: Option<String>,
    artifact_storage: Option<Arc<dyn BlobStorage>>,
    calls: AtomicUsize,
}

impl MockIntelligenceGenerator {
    pub fn new(entities: Vec<DipEntity>) -> Self {
        Self {
            entities,
            failure: None,
            artifact_storage: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::new(Vec::new())
        }
    }

    /// Write `dip.json` to `storage` on every successful call.
    pub fn with_artifact_storage(mut self, storage: Arc<dyn BlobStorage>) -> Self {
        self.artifact_storage = Some(storage);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IntelligenceGenerator for MockIntelligenceGenerator {
    async fn generate_dip(
        &self,
        _data: &[u8],
        doc_id: &str,
        _file_name: &str,
        _options: &DipOptions,
    ) -> Result<DipSummary> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            return Err(Error::Intelligence(message.clone()));
        }

        if let Some(storage) = &self.artifact_storage {
            let artifact = DipArtifact {
                doc_id: doc_id.to_string(),
                entities: self.entities.clone(),
                spec_hints: Vec::new(),
                golden_tests: Vec::new(),
                playbook_hints: Vec::new(),
                generated_at: Some(Utc::now()),
            };
            let body = serde_json::to_vec(&artifact)?;
            storage
                .upload(
                    &dip_artifact_path(doc_id),
                    &body,
                    &UploadOptions::new("application/json").with_upsert(true),
                )
                .await?;
        }

        Ok(DipSummary {
            entities_count: self.entities.len() as u64,
            hints_count: 2,
            tests_count: 1,
            playbook_count: 0,
            entities: self.entities.clone(),
        })
    }
}

// =============================================================================
// ENTITY CANDIDATE STORE
// =============================================================================

/// Candidate inserted into [`MockEntityStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct InsertedCandidate {
    pub doc_id: String,
    pub entity: DipEntity,
    pub actor: String,
}

/// Entity store that rejects configured values.
#[derive(Default)]
pub struct MockEntityStore {
    inserted: Mutex<Vec<InsertedCandidate>>,
    rejected_values: HashSet<String>,
    attempts: AtomicUsize,
}

impl MockEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts of an entity with this value fail.
    pub fn rejecting(mut self, value: impl Into<String>) -> Self {
        self.rejected_values.insert(value.into());
        self
    }

    pub fn inserted(&self) -> Vec<InsertedCandidate> {
        lock(&self.inserted).clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntityCandidateStore for MockEntityStore {
    async fn insert_entity_candidate(
        &self,
        doc_id: &str,
        entity: &DipEntity,
        actor: &str,
    ) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.rejected_values.contains(&entity.value) {
            return Err(Error::InvalidInput(format!(
                "mock rejected entity {}",
                entity.value
            )));
        }
        lock(&self.inserted).push(InsertedCandidate {
            doc_id: doc_id.to_string(),
            entity: entity.clone(),
            actor: actor.to_string(),
        });
        Ok(())
    }
}
