//! Ingestion orchestrator.
//!
//! Drives one document from upload to a terminal job status:
//!
//! 1. `create_ingest_job`: identity check, registry lookup, job and document
//!    rows, blob upload, then storage verification (queued or inline).
//! 2. `verify_storage`: bounded-retry read of the uploaded blob.
//! 3. `run_job`: processing dispatch, the isolated intelligence phase for DIP
//!    jobs, finalize, and entity candidate staging.
//!
//! Collaborators are injected through [`OrchestratorBuilder`]; nothing is
//! created lazily or cached behind the caller's back.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use manuals_core::defaults::{
    EMBED_MODEL, NAMESPACE, ORPHAN_AFTER_SECS, PAGE_LIMIT, PARSER_VERSION, PIPELINE_ACTOR,
    STALE_PROCESSING_SECS, VERIFY_FAILURE_MESSAGE,
};
use manuals_core::{
    blob_path, generate_doc_id, BlobStorage, DocMetadata, Document, DocumentUpsert,
    EntityCandidateStore, Error, ExternalProcessor, IngestJob, IngestReceipt, IngestRequest,
    IntelligenceGenerator, IntelligenceOutcome, JobCounters, JobError, JobParams,
    JobRecordStore, JobStage, JobStatus, JobType, NewIngestJob, ParseOutcome, ProcessingFlags,
    ProcessorResponse, Result, SystemMetadataResolver, UploadOptions,
};

use crate::entity_parsing::parse_dip_to_entity_candidates;
use crate::intelligence::{run_intelligence_phase, IntelligenceRequest};
use crate::verification::{StorageVerifier, VerificationConfig};
use crate::worker::{IngestTask, TaskQueue};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Orchestrator settings captured into every new job's params.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub parser_version: String,
    pub embed_model: String,
    pub namespace: String,
    /// Verify storage inside `create_ingest_job` even when a queue is attached.
    pub verify_inline: bool,
    pub verification: VerificationConfig,
    /// Principal recorded on staged entity candidates.
    pub actor: String,
    /// Reconciliation fails jobs stuck in a processing state for this long.
    pub stale_processing_after: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            parser_version: PARSER_VERSION.to_string(),
            embed_model: EMBED_MODEL.to_string(),
            namespace: NAMESPACE.to_string(),
            verify_inline: false,
            verification: VerificationConfig::default(),
            actor: PIPELINE_ACTOR.to_string(),
            stale_processing_after: Duration::from_secs(STALE_PROCESSING_SECS),
        }
    }
}

impl OrchestratorConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `INGEST_PARSER_VERSION` | `1.0.0` | Parser version recorded on jobs and documents |
    /// | `INGEST_EMBED_MODEL` | `text-embedding-3-large` | Embedding model recorded on jobs |
    /// | `INGEST_NAMESPACE` | `REIMAGINEDDOCS` | Vector namespace recorded on jobs |
    /// | `INGEST_VERIFY_INLINE` | `false` | Block job creation until storage is verified |
    /// | `INGEST_ACTOR` | `ingest-pipeline` | Actor recorded on entity candidates |
    /// | `INGEST_STALE_PROCESSING_SECS` | `7200` | Age at which a processing job is failed |
    ///
    /// Verification settings come from [`VerificationConfig::from_env`].
    pub fn from_env() -> Self {
        let string_var = |name: &str, default: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let verify_inline = std::env::var("INGEST_VERIFY_INLINE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let stale_processing_secs = std::env::var("INGEST_STALE_PROCESSING_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(STALE_PROCESSING_SECS);

        Self {
            parser_version: string_var("INGEST_PARSER_VERSION", PARSER_VERSION),
            embed_model: string_var("INGEST_EMBED_MODEL", EMBED_MODEL),
            namespace: string_var("INGEST_NAMESPACE", NAMESPACE),
            verify_inline,
            verification: VerificationConfig::from_env(),
            actor: string_var("INGEST_ACTOR", PIPELINE_ACTOR),
            stale_processing_after: Duration::from_secs(stale_processing_secs),
        }
    }

    pub fn with_verify_inline(mut self, inline: bool) -> Self {
        self.verify_inline = inline;
        self
    }

    pub fn with_verification(mut self, verification: VerificationConfig) -> Self {
        self.verification = verification;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_stale_processing_after(mut self, after: Duration) -> Self {
        self.stale_processing_after = after;
        self
    }

    pub fn with_parser_version(mut self, version: impl Into<String>) -> Self {
        self.parser_version = version.into();
        self
    }

    fn job_params(&self, request: &IngestRequest) -> JobParams {
        JobParams {
            ocr_enabled: request.ocr_enabled,
            extract_tables: true,
            dry_run: request.dry_run,
            parser_version: self.parser_version.clone(),
            embed_model: self.embed_model.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

// =============================================================================
// OUTCOMES
// =============================================================================

/// Result of processing dispatch plus the intelligence phase.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    pub job_id: Uuid,
    pub job_type: JobType,
    pub response: ProcessorResponse,
    pub counters: JobCounters,
    pub intelligence: IntelligenceOutcome,
}

/// Final state of a job after [`IngestionOrchestrator::run_job`].
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub intelligence: IntelligenceOutcome,
    /// Entity staging result, when a DIP artifact was parsed.
    pub entities: Option<ParseOutcome>,
    /// Failure message when `status` is `failed`.
    pub error: Option<String>,
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

/// What a reconciliation sweep found and did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub scanned: usize,
    /// Stale `queued` jobs that were failed.
    pub orphaned: Vec<Uuid>,
    /// Jobs abandoned in `parsing`, `embedding` or `upserting` that were failed.
    pub abandoned: Vec<Uuid>,
    /// Stale `upload_success` jobs with their storage path.
    pub pending_verification: Vec<(Uuid, String)>,
    /// Stale `upload_complete` jobs.
    pub pending_processing: Vec<Uuid>,
}

impl ReconcileReport {
    /// Tasks that resume the pending jobs.
    pub fn tasks(&self) -> Vec<IngestTask> {
        self.pending_verification
            .iter()
            .map(|(job_id, storage_path)| IngestTask::Verify {
                job_id: *job_id,
                storage_path: storage_path.clone(),
            })
            .chain(
                self.pending_processing
                    .iter()
                    .map(|job_id| IngestTask::Process { job_id: *job_id }),
            )
            .collect()
    }
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================

/// Coordinates the ingestion collaborators for one job at a time.
pub struct IngestionOrchestrator {
    store: Arc<dyn JobRecordStore>,
    resolver: Arc<dyn SystemMetadataResolver>,
    storage: Option<Arc<dyn BlobStorage>>,
    processor: Option<Arc<dyn ExternalProcessor>>,
    intelligence: Option<Arc<dyn IntelligenceGenerator>>,
    entities: Option<Arc<dyn EntityCandidateStore>>,
    queue: Option<TaskQueue>,
    config: OrchestratorConfig,
}

impl IngestionOrchestrator {
    pub fn builder(
        store: Arc<dyn JobRecordStore>,
        resolver: Arc<dyn SystemMetadataResolver>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder::new(store, resolver)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JobRecordStore> {
        &self.store
    }

    fn require_storage(&self) -> Result<&Arc<dyn BlobStorage>> {
        self.storage
            .as_ref()
            .ok_or_else(|| Error::Config("Blob storage is not configured".to_string()))
    }

    fn require_processor(&self) -> Result<&Arc<dyn ExternalProcessor>> {
        self.processor
            .as_ref()
            .ok_or_else(|| Error::Config("External processor is not configured".to_string()))
    }

    // -------------------------------------------------------------------------
    // Creation
    // -------------------------------------------------------------------------

    /// Accept a document: create its job and document rows, upload the blob,
    /// and start storage verification.
    ///
    /// Fails without writing anything when storage is missing, the identity is
    /// incomplete, or the registry lookup fails. An upload failure leaves the
    /// job at `queued`.
    pub async fn create_ingest_job(&self, request: IngestRequest) -> Result<IngestReceipt> {
        let start = Instant::now();
        let storage = self.require_storage()?.clone();

        let manufacturer_norm = request
            .manufacturer_identity()
            .ok_or_else(|| Error::MissingIdentity("manufacturer is required".to_string()))?
            .to_string();
        let model_norm = request
            .model_identity()
            .ok_or_else(|| Error::MissingIdentity("model is required".to_string()))?
            .to_string();

        let file_name = request.file_name.trim();
        if file_name.is_empty() || file_name.contains('/') || file_name.contains('\\') {
            return Err(Error::InvalidInput(format!(
                "Invalid file name: '{}'",
                request.file_name
            )));
        }
        if request.bytes.is_empty() {
            return Err(Error::InvalidInput("File is empty".to_string()));
        }

        // The doc id becomes a storage path segment.
        let doc_id = match request.doc_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => {
                if id.contains('/')
                    || id.contains('\\')
                    || id.contains("..")
                    || id.chars().any(char::is_control)
                {
                    return Err(Error::InvalidInput(format!("Invalid doc_id: '{}'", id)));
                }
                id.to_string()
            }
            _ => generate_doc_id(&request.bytes),
        };

        let system = self
            .resolver
            .lookup(&manufacturer_norm, &model_norm)
            .await
            .map_err(|e| match e {
                Error::SystemLookup(_) => e,
                other => Error::SystemLookup(other.to_string()),
            })?;
        let asset_uid = system.validate()?;

        // Records exist from here on.
        let job = self
            .store
            .create_job(NewIngestJob {
                doc_id: doc_id.clone(),
                job_type: request.job_type,
                params: self.config.job_params(&request),
            })
            .await?;
        let job_id = job.job_id;

        self.store
            .create_or_update_document(DocumentUpsert {
                doc_id: doc_id.clone(),
                manufacturer: request
                    .manufacturer
                    .clone()
                    .filter(|v| !v.trim().is_empty())
                    .unwrap_or_else(|| manufacturer_norm.clone()),
                model: request
                    .model
                    .clone()
                    .filter(|v| !v.trim().is_empty())
                    .unwrap_or_else(|| model_norm.clone()),
                manufacturer_norm,
                model_norm,
                asset_uid,
                system_norm: system.system_norm.trim().to_string(),
                subsystem_norm: system.subsystem_norm.trim().to_string(),
                revision_date: request.revision_date.clone(),
                language: request.language.clone(),
                brand_family: request.brand_family.clone(),
                source_url: request.source_url.clone(),
                last_ingest_version: Some(self.config.parser_version.clone()),
                last_job_id: Some(job_id),
            })
            .await?;

        let path = blob_path(&doc_id, file_name);
        let options = UploadOptions::new(
            request
                .content_type
                .clone()
                .unwrap_or_else(|| manuals_core::defaults::PDF_CONTENT_TYPE.to_string()),
        );
        let storage_path = match storage.upload(&path, &request.bytes, &options).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(
                    subsystem = "orchestrator",
                    component = "creation",
                    job_id = %job_id,
                    doc_id = %doc_id,
                    storage_path = %path,
                    error = %e,
                    "Upload failed, job left queued"
                );
                return Err(e);
            }
        };

        self.store
            .update_document_storage_path(&doc_id, &storage_path)
            .await?;
        self.store
            .update_job_status(job_id, JobStatus::UploadSuccess, None)
            .await?;

        info!(
            subsystem = "orchestrator",
            component = "creation",
            job_id = %job_id,
            doc_id = %doc_id,
            job_type = %request.job_type,
            storage_path = %storage_path,
            size_bytes = request.bytes.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Ingest job created"
        );

        self.dispatch_verification(job_id, storage_path).await?;

        Ok(IngestReceipt {
            doc_id,
            job_id,
            status: JobStatus::Queued,
        })
    }

    async fn dispatch_verification(&self, job_id: Uuid, storage_path: String) -> Result<()> {
        if !self.config.verify_inline {
            if let Some(queue) = &self.queue {
                let task = IngestTask::Verify {
                    job_id,
                    storage_path: storage_path.clone(),
                };
                match queue.enqueue(task).await {
                    Ok(()) => {
                        debug!(job_id = %job_id, "Storage verification queued");
                        return Ok(());
                    }
                    Err(e) => warn!(
                        job_id = %job_id,
                        error = %e,
                        "Task queue unavailable, verifying inline"
                    ),
                }
            }
        }
        self.verify_storage(job_id, &storage_path).await
    }

    // -------------------------------------------------------------------------
    // Verification
    // -------------------------------------------------------------------------

    /// Confirm the blob is readable and move the job to `upload_complete`.
    ///
    /// When every attempt fails the job is marked `failed` with stage
    /// `storage_verification` before the timeout error is returned.
    pub async fn verify_storage(&self, job_id: Uuid, storage_path: &str) -> Result<()> {
        let storage = self.require_storage()?.clone();
        let verifier = StorageVerifier::new(storage, self.config.verification.clone());

        match verifier.wait_until_readable(storage_path).await {
            Ok(attempt) => {
                self.store
                    .update_job_status(job_id, JobStatus::UploadComplete, None)
                    .await?;
                info!(
                    subsystem = "orchestrator",
                    component = "verification",
                    job_id = %job_id,
                    storage_path,
                    attempt,
                    "Upload complete"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    subsystem = "orchestrator",
                    component = "verification",
                    job_id = %job_id,
                    storage_path,
                    stage = %JobStage::StorageVerification,
                    error = %e,
                    "Storage verification failed, job ended"
                );
                if let Err(write_err) = self
                    .store
                    .update_job_status(
                        job_id,
                        JobStatus::Failed,
                        Some(JobError::new(
                            JobStage::StorageVerification,
                            VERIFY_FAILURE_MESSAGE,
                        )),
                    )
                    .await
                {
                    error!(
                        job_id = %job_id,
                        error = %write_err,
                        "Failed to mark job failed after verification timeout"
                    );
                }
                Err(e)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Processing
    // -------------------------------------------------------------------------

    /// Check that every collaborator processing needs is reachable.
    async fn preflight_processing(&self) -> Result<()> {
        self.store
            .ping()
            .await
            .map_err(|e| Error::Config(format!("Job store unreachable: {}", e)))?;
        let processor = self.require_processor()?;
        processor
            .health()
            .await
            .map_err(|e| Error::Config(format!("External processor unreachable: {}", e)))?;
        self.require_storage()?;
        Ok(())
    }

    /// Send the job's blob to the external processor and, for DIP jobs, run
    /// the intelligence phase.
    ///
    /// Preflight failures return a configuration error without touching the
    /// job. Any later error leaves the job in a non-terminal status; the
    /// caller is expected to fail it (see [`Self::run_job`]).
    pub async fn process_job(&self, job_id: Uuid) -> Result<ProcessOutcome> {
        self.preflight_processing().await?;
        let processor = self.require_processor()?.clone();
        let storage = self.require_storage()?.clone();
        let start = Instant::now();

        self.store
            .update_job_status(job_id, JobStatus::Parsing, None)
            .await?;

        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(Error::JobNotFound(job_id))?;
        let document = self
            .store
            .get_document(&job.doc_id)
            .await?
            .ok_or_else(|| Error::DocumentNotFound(job.doc_id.clone()))?;
        let storage_path = document
            .storage_path
            .clone()
            .ok_or_else(|| Error::Storage(format!("Document {} has no stored blob", job.doc_id)))?;
        let file_name = document
            .file_name()
            .ok_or_else(|| Error::Storage(format!("Storage path has no file name: {}", storage_path)))?
            .to_string();

        let data = storage.download(&storage_path).await.map_err(|e| {
            Error::Storage(format!("Unable to read {}: {}", storage_path, e))
        })?;

        let metadata = DocMetadata {
            doc_id: job.doc_id.clone(),
            manufacturer: document.manufacturer.clone(),
            model: document.model.clone(),
            revision_date: document.revision_date.clone(),
            language: document.language.clone(),
            job_id,
            file_name: file_name.clone(),
        };
        let retained = (job.job_type == JobType::Dip).then(|| data.clone());

        let response = processor
            .process(data, &metadata, ProcessingFlags::from(&job.params))
            .await
            .map_err(|e| match e {
                Error::Processing(_) => e,
                other => Error::Processing(other.to_string()),
            })?;
        if !response.success {
            return Err(Error::Processing(
                response
                    .error
                    .clone()
                    .unwrap_or_else(|| "External processor reported failure".to_string()),
            ));
        }

        let counters = response.counters();
        self.store.update_job_progress(job_id, &counters).await?;

        info!(
            subsystem = "orchestrator",
            component = "processing",
            job_id = %job_id,
            doc_id = %job.doc_id,
            chunk_count = counters.chunks,
            duration_ms = start.elapsed().as_millis() as u64,
            "Primary processing complete"
        );

        let intelligence = match retained {
            None => IntelligenceOutcome::Skipped,
            Some(data) => {
                self.run_intelligence(&job, &document, &data, &file_name, &counters)
                    .await
            }
        };

        Ok(ProcessOutcome {
            job_id,
            job_type: job.job_type,
            response,
            counters,
            intelligence,
        })
    }

    async fn run_intelligence(
        &self,
        job: &IngestJob,
        document: &Document,
        data: &[u8],
        file_name: &str,
        counters: &JobCounters,
    ) -> IntelligenceOutcome {
        run_intelligence_phase(
            self.store.as_ref(),
            self.intelligence.as_deref(),
            IntelligenceRequest {
                job,
                document,
                data,
                file_name,
                base_counters: counters,
            },
        )
        .await
    }

    /// Process a job and write its terminal status.
    ///
    /// Preflight failures are returned as errors with the job untouched. Any
    /// other processing error fails the job with stage `processing` and is
    /// reported through the returned outcome. Entity staging runs after the
    /// job is completed and never changes its status.
    pub async fn run_job(&self, job_id: Uuid) -> Result<JobOutcome> {
        let processed = match self.process_job(job_id).await {
            Ok(processed) => processed,
            Err(e) if e.is_preflight() => return Err(e),
            Err(e) => return self.fail_processing(job_id, e).await,
        };

        // A failed completion write still ends the job, as `failed`.
        if let Err(e) = self
            .store
            .update_job_status(job_id, JobStatus::Completed, None)
            .await
        {
            let mut outcome = self.fail_processing(job_id, e).await?;
            outcome.intelligence = processed.intelligence;
            return Ok(outcome);
        }

        let entities = if processed.job_type == JobType::Dip && processed.intelligence.succeeded() {
            self.stage_entities(job_id).await
        } else {
            None
        };

        info!(
            subsystem = "orchestrator",
            component = "finalize",
            job_id = %job_id,
            job_type = %processed.job_type,
            status = %JobStatus::Completed,
            success = true,
            "Job completed"
        );

        Ok(JobOutcome {
            job_id,
            status: JobStatus::Completed,
            intelligence: processed.intelligence,
            entities,
            error: None,
        })
    }

    /// Entity staging after completion. Nothing here can change the job status.
    async fn stage_entities(&self, job_id: Uuid) -> Option<ParseOutcome> {
        let staged = match self.store.get_job(job_id).await {
            Ok(Some(job)) => self.parse_dip_to_entity_candidates(&job.doc_id).await,
            Ok(None) => Err(Error::JobNotFound(job_id)),
            Err(e) => Err(e),
        };
        match staged {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(
                    subsystem = "orchestrator",
                    component = "finalize",
                    job_id = %job_id,
                    error = %e,
                    "Entity candidate staging failed"
                );
                None
            }
        }
    }

    async fn fail_processing(&self, job_id: Uuid, cause: Error) -> Result<JobOutcome> {
        let message = cause.to_string();
        error!(
            subsystem = "orchestrator",
            component = "finalize",
            job_id = %job_id,
            error = %message,
            "Job failed during processing"
        );

        match self
            .store
            .update_job_status(
                job_id,
                JobStatus::Failed,
                Some(JobError::new(JobStage::Processing, message.clone())),
            )
            .await
        {
            Ok(()) => {}
            Err(Error::JobNotFound(_)) => return Err(cause),
            Err(e @ Error::InvalidTransition { .. }) => {
                warn!(job_id = %job_id, error = %e, "Job already terminal, leaving status");
            }
            Err(e) => return Err(e),
        }

        Ok(JobOutcome {
            job_id,
            status: JobStatus::Failed,
            intelligence: IntelligenceOutcome::Skipped,
            entities: None,
            error: Some(message),
        })
    }

    // -------------------------------------------------------------------------
    // Entity candidates
    // -------------------------------------------------------------------------

    /// Stage the entities of `manuals/{doc_id}/dip.json` for review.
    pub async fn parse_dip_to_entity_candidates(&self, doc_id: &str) -> Result<ParseOutcome> {
        let storage = self.require_storage()?;
        let entities = self
            .entities
            .as_ref()
            .ok_or_else(|| Error::Config("Entity candidate store is not configured".to_string()))?;
        parse_dip_to_entity_candidates(
            storage.as_ref(),
            entities.as_ref(),
            doc_id,
            &self.config.actor,
        )
        .await
    }

    // -------------------------------------------------------------------------
    // Reconciliation
    // -------------------------------------------------------------------------

    /// Sweep jobs last touched before `now - older_than`.
    ///
    /// Stale `queued` jobs never got their blob and are failed with stage
    /// `upload`. Stale `upload_success` and `upload_complete` jobs are
    /// reported so their verification or processing can be resumed. Jobs left
    /// in a processing state past `stale_processing_after` lost their worker
    /// and are failed with stage `processing`.
    pub async fn reconcile(&self, older_than: chrono::Duration) -> Result<ReconcileReport> {
        let now = Utc::now();
        let cutoff: DateTime<Utc> = now - older_than;
        let processing_cutoff: DateTime<Utc> = now
            - chrono::Duration::from_std(self.config.stale_processing_after)
                .unwrap_or_else(|_| chrono::Duration::seconds(STALE_PROCESSING_SECS as i64));
        let mut report = ReconcileReport::default();
        let mut offset = 0;

        loop {
            let page = self.store.list_jobs(PAGE_LIMIT, offset).await?;
            let fetched = page.len();
            report.scanned += fetched;

            for job in page {
                match job.status {
                    JobStatus::Queued if job.updated_at < cutoff => {
                        let error =
                            JobError::new(JobStage::Upload, "Upload never completed, job ended");
                        if self.fail_stale(&job, error).await {
                            report.orphaned.push(job.job_id);
                        }
                    }
                    JobStatus::UploadSuccess if job.updated_at < cutoff => {
                        match self.store.get_document(&job.doc_id).await? {
                            Some(Document {
                                storage_path: Some(path),
                                ..
                            }) => report.pending_verification.push((job.job_id, path)),
                            _ => warn!(
                                job_id = %job.job_id,
                                doc_id = %job.doc_id,
                                "Uploaded job has no storage path"
                            ),
                        }
                    }
                    JobStatus::UploadComplete if job.updated_at < cutoff => {
                        report.pending_processing.push(job.job_id)
                    }
                    status if status.is_processing() && job.updated_at < processing_cutoff => {
                        let error = JobError::new(
                            JobStage::Processing,
                            format!("Processing abandoned in {}, job ended", status),
                        );
                        if self.fail_stale(&job, error).await {
                            report.abandoned.push(job.job_id);
                        }
                    }
                    _ => {}
                }
            }

            if (fetched as i64) < PAGE_LIMIT {
                break;
            }
            offset += PAGE_LIMIT;
        }

        info!(
            subsystem = "orchestrator",
            component = "reconcile",
            scanned = report.scanned,
            orphaned = report.orphaned.len(),
            abandoned = report.abandoned.len(),
            pending_verification = report.pending_verification.len(),
            pending_processing = report.pending_processing.len(),
            "Reconciliation sweep finished"
        );

        Ok(report)
    }

    /// Fail a stale job. Returns whether the write went through.
    async fn fail_stale(&self, job: &IngestJob, error: JobError) -> bool {
        let stage = error.stage;
        match self
            .store
            .update_job_status(job.job_id, JobStatus::Failed, Some(error))
            .await
        {
            Ok(()) => {
                warn!(
                    subsystem = "orchestrator",
                    component = "reconcile",
                    job_id = %job.job_id,
                    status = %job.status,
                    stage = %stage,
                    "Stale job failed"
                );
                true
            }
            Err(e) => {
                warn!(
                    job_id = %job.job_id,
                    status = %job.status,
                    error = %e,
                    "Could not fail stale job"
                );
                false
            }
        }
    }

    /// Reconcile with the default orphan threshold.
    pub async fn reconcile_default(&self) -> Result<ReconcileReport> {
        self.reconcile(chrono::Duration::seconds(ORPHAN_AFTER_SECS))
            .await
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Builder for [`IngestionOrchestrator`].
pub struct OrchestratorBuilder {
    store: Arc<dyn JobRecordStore>,
    resolver: Arc<dyn SystemMetadataResolver>,
    storage: Option<Arc<dyn BlobStorage>>,
    processor: Option<Arc<dyn ExternalProcessor>>,
    intelligence: Option<Arc<dyn IntelligenceGenerator>>,
    entities: Option<Arc<dyn EntityCandidateStore>>,
    queue: Option<TaskQueue>,
    config: OrchestratorConfig,
}

impl OrchestratorBuilder {
    pub fn new(
        store: Arc<dyn JobRecordStore>,
        resolver: Arc<dyn SystemMetadataResolver>,
    ) -> Self {
        Self {
            store,
            resolver,
            storage: None,
            processor: None,
            intelligence: None,
            entities: None,
            queue: None,
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn BlobStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_processor(mut self, processor: Arc<dyn ExternalProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn with_intelligence(mut self, generator: Arc<dyn IntelligenceGenerator>) -> Self {
        self.intelligence = Some(generator);
        self
    }

    pub fn with_entity_store(mut self, entities: Arc<dyn EntityCandidateStore>) -> Self {
        self.entities = Some(entities);
        self
    }

    /// Hand verification to a worker instead of blocking job creation.
    pub fn with_queue(mut self, queue: TaskQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> IngestionOrchestrator {
        IngestionOrchestrator {
            store: self.store,
            resolver: self.resolver,
            storage: self.storage,
            processor: self.processor,
            intelligence: self.intelligence,
            entities: self.entities,
            queue: self.queue,
            config: self.config,
        }
    }
}
