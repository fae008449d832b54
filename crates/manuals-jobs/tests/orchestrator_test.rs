//! End-to-end orchestration tests against the in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use manuals_jobs::defaults::VERIFY_FAILURE_MESSAGE;
use manuals_jobs::mock::{
    MockBlobStorage, MockEntityStore, MockIntelligenceGenerator, MockJobStore, MockProcessor,
    MockResolver,
};
use manuals_jobs::{
    generate_doc_id, DipEntity, DocumentUpsert, IngestJob, IngestRequest, IngestTask,
    IngestionOrchestrator, IntelligenceOutcome, JobCounters, JobParams, JobRecordStore, JobStage,
    JobStatus, JobType, OrchestratorConfig, ParseOutcome, ProcessorResponse, VerificationConfig,
};

const PDF: &[u8] = b"%PDF-1.7 kenyon bbq grill system service manual";

struct Harness {
    store: Arc<MockJobStore>,
    resolver: Arc<MockResolver>,
    storage: Arc<MockBlobStorage>,
    processor: Arc<MockProcessor>,
    candidates: Arc<MockEntityStore>,
    orchestrator: IngestionOrchestrator,
}

fn fast_verification() -> VerificationConfig {
    VerificationConfig::default()
        .with_retry_delay(Duration::ZERO)
        .with_grace_period(Duration::ZERO)
}

fn entity(value: &str) -> DipEntity {
    DipEntity {
        entity_type: "model".to_string(),
        value: value.to_string(),
        confidence: 0.8,
        page: Some(1),
        context: None,
    }
}

fn harness_with(
    processor: MockProcessor,
    candidates: MockEntityStore,
    generator: impl FnOnce(Arc<MockBlobStorage>) -> Option<MockIntelligenceGenerator>,
    verification: VerificationConfig,
) -> Harness {
    let store = Arc::new(MockJobStore::new());
    let resolver = Arc::new(MockResolver::kenyon());
    let storage = Arc::new(MockBlobStorage::new());
    let processor = Arc::new(processor);
    let candidates = Arc::new(candidates);

    let mut builder = IngestionOrchestrator::builder(store.clone(), resolver.clone())
        .with_storage(storage.clone())
        .with_processor(processor.clone())
        .with_entity_store(candidates.clone())
        .with_config(
            OrchestratorConfig::default()
                .with_verify_inline(true)
                .with_verification(verification),
        );
    if let Some(generator) = generator(storage.clone()) {
        builder = builder.with_intelligence(Arc::new(generator));
    }

    Harness {
        store,
        resolver,
        storage,
        processor,
        candidates,
        orchestrator: builder.build(),
    }
}

fn harness() -> Harness {
    harness_with(
        MockProcessor::new(),
        MockEntityStore::new(),
        |_| None,
        fast_verification(),
    )
}

fn kenyon_request() -> IngestRequest {
    IngestRequest::new("kenyon-bbq.pdf", PDF.to_vec()).with_identity("Kenyon", "BBQ Grill System")
}

fn stale_job(status: JobStatus, doc_id: &str) -> IngestJob {
    let then = Utc::now() - chrono::Duration::hours(2);
    IngestJob {
        job_id: Uuid::now_v7(),
        doc_id: doc_id.to_string(),
        job_type: JobType::Standard,
        status,
        params: JobParams::default(),
        counters: JobCounters::default(),
        error: None,
        dip_success: None,
        created_at: then,
        started_at: None,
        updated_at: then,
        completed_at: None,
    }
}

// =============================================================================
// CREATION
// =============================================================================

#[tokio::test]
async fn test_create_ingest_job_records_document_and_verifies_upload() {
    let h = harness();

    let receipt = h
        .orchestrator
        .create_ingest_job(kenyon_request().with_language("en"))
        .await
        .expect("ingest should be accepted");

    assert_eq!(receipt.doc_id, generate_doc_id(PDF));
    assert_eq!(receipt.doc_id.len(), 64);
    assert_eq!(receipt.status, JobStatus::Queued);

    let doc = h.store.document(&receipt.doc_id).expect("document row");
    assert_eq!(doc.manufacturer_norm, "Kenyon");
    assert_eq!(doc.model_norm, "BBQ Grill System");
    assert_eq!(doc.system_norm, "Galley");
    assert_eq!(doc.subsystem_norm, "Cooking");
    assert_eq!(
        doc.asset_uid,
        Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap()
    );
    assert_eq!(doc.language.as_deref(), Some("en"));
    assert_eq!(doc.last_job_id, Some(receipt.job_id));
    let expected_path = format!("manuals/{}/kenyon-bbq.pdf", receipt.doc_id);
    assert_eq!(doc.storage_path.as_deref(), Some(expected_path.as_str()));
    assert_eq!(h.storage.get(&expected_path).as_deref(), Some(PDF));

    let job = h.store.job(receipt.job_id).expect("job row");
    assert_eq!(job.status, JobStatus::UploadComplete);
    assert_eq!(job.job_type, JobType::Standard);
    assert!(job.params.extract_tables);
    assert_eq!(
        h.store.status_history(receipt.job_id),
        vec![JobStatus::UploadSuccess, JobStatus::UploadComplete]
    );
}

#[tokio::test]
async fn test_identical_content_gets_identical_doc_id() {
    let h = harness();
    let first = h
        .orchestrator
        .create_ingest_job(kenyon_request())
        .await
        .unwrap();

    let renamed = IngestRequest::new("other-name.pdf", PDF.to_vec())
        .with_identity("Kenyon", "BBQ Grill System");
    let second = h.orchestrator.create_ingest_job(renamed).await.unwrap();

    assert_eq!(first.doc_id, second.doc_id);
    assert_ne!(first.job_id, second.job_id);
    assert_eq!(
        h.store.document(&first.doc_id).unwrap().last_job_id,
        Some(second.job_id)
    );
}

#[tokio::test]
async fn test_missing_identity_writes_nothing() {
    let h = harness();

    let no_model = IngestRequest::new("m.pdf", PDF.to_vec()).with_identity("Kenyon", "   ");
    let err = h.orchestrator.create_ingest_job(no_model).await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION_MISSING_IDENTITY");

    let no_identity = IngestRequest::new("m.pdf", PDF.to_vec());
    let err = h
        .orchestrator
        .create_ingest_job(no_identity)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_MISSING_IDENTITY");

    assert_eq!(h.store.write_count(), 0);
    assert_eq!(h.resolver.call_count(), 0);
    assert!(h.storage.uploaded_paths().is_empty());
}

#[tokio::test]
async fn test_normalized_identity_takes_precedence() {
    let h = harness();
    let request = IngestRequest::new("m.pdf", PDF.to_vec())
        .with_identity("KENYON INTERNATIONAL", "Grill (BBQ)")
        .with_normalized_identity("Kenyon", "BBQ Grill System");

    let receipt = h.orchestrator.create_ingest_job(request).await.unwrap();

    let doc = h.store.document(&receipt.doc_id).unwrap();
    assert_eq!(doc.manufacturer, "KENYON INTERNATIONAL");
    assert_eq!(doc.manufacturer_norm, "Kenyon");
    assert_eq!(doc.model_norm, "BBQ Grill System");
}

#[tokio::test]
async fn test_unknown_system_writes_nothing() {
    let h = harness();
    let request =
        IngestRequest::new("m.pdf", PDF.to_vec()).with_identity("Acme", "Unknown Fryer");

    let err = h.orchestrator.create_ingest_job(request).await.unwrap_err();

    assert_eq!(err.code(), "SYSTEM_LOOKUP_FAILED");
    assert!(err.is_preflight());
    assert_eq!(h.resolver.call_count(), 1);
    assert_eq!(h.store.write_count(), 0);
    assert_eq!(h.store.job_count(), 0);
}

#[tokio::test]
async fn test_invalid_file_is_rejected() {
    let h = harness();

    let empty = IngestRequest::new("m.pdf", Vec::new()).with_identity("Kenyon", "BBQ Grill System");
    assert_eq!(
        h.orchestrator.create_ingest_job(empty).await.unwrap_err().code(),
        "INVALID_INPUT"
    );

    let nested = IngestRequest::new("../m.pdf", PDF.to_vec())
        .with_identity("Kenyon", "BBQ Grill System");
    assert_eq!(
        h.orchestrator.create_ingest_job(nested).await.unwrap_err().code(),
        "INVALID_INPUT"
    );
    assert_eq!(h.store.write_count(), 0);
}

#[tokio::test]
async fn test_unsafe_doc_id_is_rejected_before_any_write() {
    let h = harness();

    for doc_id in ["../escape", "manuals/other", "a\\b", "nul\u{0}id"] {
        let err = h
            .orchestrator
            .create_ingest_job(kenyon_request().with_doc_id(doc_id))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT", "doc_id {:?}", doc_id);
    }
    assert_eq!(h.store.write_count(), 0);
    assert!(h.storage.uploaded_paths().is_empty());
    assert_eq!(h.resolver.call_count(), 0);

    let receipt = h
        .orchestrator
        .create_ingest_job(kenyon_request().with_doc_id(" kenyon-bbq-2024 "))
        .await
        .unwrap();
    assert_eq!(receipt.doc_id, "kenyon-bbq-2024");
}

#[tokio::test]
async fn test_missing_storage_is_a_configuration_error() {
    let store = Arc::new(MockJobStore::new());
    let orchestrator =
        IngestionOrchestrator::builder(store.clone(), Arc::new(MockResolver::kenyon())).build();

    let err = orchestrator
        .create_ingest_job(kenyon_request())
        .await
        .unwrap_err();

    assert_eq!(err.code(), "CONFIGURATION_ERROR");
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn test_upload_failure_leaves_job_queued() {
    let store = Arc::new(MockJobStore::new());
    let storage = Arc::new(MockBlobStorage::failing_uploads());
    let orchestrator =
        IngestionOrchestrator::builder(store.clone(), Arc::new(MockResolver::kenyon()))
            .with_storage(storage.clone())
            .with_config(OrchestratorConfig::default().with_verify_inline(true))
            .build();

    let err = orchestrator
        .create_ingest_job(kenyon_request())
        .await
        .unwrap_err();

    assert_eq!(err.code(), "UPLOAD_ERROR");
    assert_eq!(store.job_count(), 1);
    let job = store
        .list_jobs(10, 0)
        .await
        .unwrap()
        .pop()
        .expect("job created before upload");
    assert_eq!(job.status, JobStatus::Queued);
    assert!(store.status_history(job.job_id).is_empty());
    assert_eq!(storage.uploaded_paths().len(), 1);
}

// =============================================================================
// VERIFICATION
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_verification_succeeds_on_last_attempt() {
    let h = harness_with(
        MockProcessor::new(),
        MockEntityStore::new(),
        |_| None,
        VerificationConfig::default(),
    );
    h.storage.fail_next_downloads(19);

    let receipt = h
        .orchestrator
        .create_ingest_job(kenyon_request())
        .await
        .expect("readable on the 20th attempt");

    assert_eq!(h.storage.download_count(), 20);
    assert_eq!(
        h.store.job(receipt.job_id).unwrap().status,
        JobStatus::UploadComplete
    );
}

#[tokio::test(start_paused = true)]
async fn test_verification_exhaustion_fails_job() {
    let h = harness_with(
        MockProcessor::new(),
        MockEntityStore::new(),
        |_| None,
        VerificationConfig::default(),
    );
    h.storage.fail_next_downloads(20);

    let err = h
        .orchestrator
        .create_ingest_job(kenyon_request())
        .await
        .unwrap_err();

    assert_eq!(err.code(), "STORAGE_VERIFICATION_TIMEOUT");
    assert_eq!(h.storage.download_count(), 20);

    let job = h.store.list_jobs(10, 0).await.unwrap().pop().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.expect("failed job carries an error");
    assert_eq!(error.stage, JobStage::StorageVerification);
    assert_eq!(error.message, VERIFY_FAILURE_MESSAGE);
    assert!(job.completed_at.is_some());
}

// =============================================================================
// PROCESSING
// =============================================================================

#[tokio::test]
async fn test_standard_job_completes_with_mapped_counters() {
    let h = harness_with(
        MockProcessor::new().with_response(ProcessorResponse {
            success: true,
            chunks_processed: 40,
            vectors_upserted: 38,
            pages_total: 7,
            pages_ocr: 2,
            tables_found: 3,
            ..Default::default()
        }),
        MockEntityStore::new(),
        |_| None,
        fast_verification(),
    );
    let receipt = h
        .orchestrator
        .create_ingest_job(kenyon_request().with_ocr(true))
        .await
        .unwrap();

    let outcome = h.orchestrator.run_job(receipt.job_id).await.unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.intelligence, IntelligenceOutcome::Skipped);
    assert_eq!(outcome.entities, None);

    let job = h.store.job(receipt.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.counters.pages_total, 7);
    assert_eq!(job.counters.pages_ocr, 2);
    assert_eq!(job.counters.tables, 3);
    assert_eq!(job.counters.chunks, 40);
    assert_eq!(job.counters.upserted, 38);
    assert_eq!(job.counters.entities_extracted, None);
    assert_eq!(job.dip_success, None);
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());
    assert!(h.store.dip_success_calls(receipt.job_id).is_empty());

    let calls = h.processor.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].size_bytes, PDF.len());
    assert_eq!(calls[0].metadata.file_name, "kenyon-bbq.pdf");
    assert_eq!(calls[0].metadata.doc_id, receipt.doc_id);
    assert!(calls[0].flags.ocr_enabled);
    assert!(calls[0].flags.extract_tables);
}

#[tokio::test]
async fn test_failed_completion_write_fails_job() {
    let h = harness();
    let receipt = h.orchestrator.create_ingest_job(kenyon_request()).await.unwrap();
    h.store.refuse_status(JobStatus::Completed);

    let outcome = h.orchestrator.run_job(receipt.job_id).await.unwrap();

    assert_eq!(outcome.status, JobStatus::Failed);
    assert!(outcome.error.unwrap().contains("refused"));
    let job = h.store.job(receipt.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.unwrap().stage, JobStage::Processing);
    assert_eq!(
        h.store.status_history(receipt.job_id),
        vec![
            JobStatus::UploadSuccess,
            JobStatus::UploadComplete,
            JobStatus::Parsing,
            JobStatus::Failed
        ]
    );
}

#[tokio::test]
async fn test_counters_never_decrease_across_a_dip_run() {
    let h = harness_with(
        MockProcessor::new(),
        MockEntityStore::new(),
        |storage| {
            Some(
                MockIntelligenceGenerator::new(vec![entity("bbq-1000"), entity("bbq-2000")])
                    .with_artifact_storage(storage),
            )
        },
        fast_verification(),
    );
    let receipt = h
        .orchestrator
        .create_ingest_job(kenyon_request().with_job_type(JobType::Dip))
        .await
        .unwrap();
    h.orchestrator.run_job(receipt.job_id).await.unwrap();

    let updates = h.store.progress_updates(receipt.job_id);
    assert!(updates.len() >= 2, "processing and DIP both report progress");

    let mut stored = JobCounters::default();
    for update in &updates {
        let mut next = stored.clone();
        next.merge(update);
        assert!(next.dominates(&stored), "{:?} shrank to {:?}", stored, next);
        stored = next;
    }
    let job = h.store.job(receipt.job_id).unwrap();
    assert_eq!(job.counters, stored);
    assert!(job.counters.dominates(&updates[0]));
}

#[tokio::test]
async fn test_processor_reported_failure_fails_job() {
    let h = harness_with(
        MockProcessor::new().with_response(ProcessorResponse {
            success: false,
            error: Some("encrypted pdf".to_string()),
            ..Default::default()
        }),
        MockEntityStore::new(),
        |_| None,
        fast_verification(),
    );
    let receipt = h
        .orchestrator
        .create_ingest_job(kenyon_request())
        .await
        .unwrap();

    let outcome = h.orchestrator.run_job(receipt.job_id).await.unwrap();

    assert_eq!(outcome.status, JobStatus::Failed);
    assert!(outcome.error.unwrap().contains("encrypted pdf"));
    let job = h.store.job(receipt.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.unwrap();
    assert_eq!(error.stage, JobStage::Processing);
    assert!(error.message.contains("encrypted pdf"));
}

#[tokio::test]
async fn test_processor_transport_error_fails_job() {
    let h = harness_with(
        MockProcessor::new().failing("connection reset"),
        MockEntityStore::new(),
        |_| None,
        fast_verification(),
    );
    let receipt = h
        .orchestrator
        .create_ingest_job(kenyon_request())
        .await
        .unwrap();

    let outcome = h.orchestrator.run_job(receipt.job_id).await.unwrap();

    assert_eq!(outcome.status, JobStatus::Failed);
    assert_eq!(
        h.store.status_history(receipt.job_id),
        vec![
            JobStatus::UploadSuccess,
            JobStatus::UploadComplete,
            JobStatus::Parsing,
            JobStatus::Failed
        ]
    );
}

#[tokio::test]
async fn test_unhealthy_processor_leaves_job_untouched() {
    let h = harness_with(
        MockProcessor::new().unhealthy(),
        MockEntityStore::new(),
        |_| None,
        fast_verification(),
    );
    let receipt = h
        .orchestrator
        .create_ingest_job(kenyon_request())
        .await
        .unwrap();
    let writes_before = h.store.write_count();

    let err = h.orchestrator.run_job(receipt.job_id).await.unwrap_err();

    assert_eq!(err.code(), "CONFIGURATION_ERROR");
    assert_eq!(h.store.write_count(), writes_before);
    assert_eq!(
        h.store.job(receipt.job_id).unwrap().status,
        JobStatus::UploadComplete
    );
    assert!(h.processor.calls().is_empty());
}

#[tokio::test]
async fn test_unreachable_store_is_a_configuration_error() {
    let h = harness();
    let receipt = h
        .orchestrator
        .create_ingest_job(kenyon_request())
        .await
        .unwrap();
    h.store.set_unreachable(true);

    let err = h.orchestrator.run_job(receipt.job_id).await.unwrap_err();

    assert_eq!(err.code(), "CONFIGURATION_ERROR");
    assert_eq!(
        h.store.job(receipt.job_id).unwrap().status,
        JobStatus::UploadComplete
    );
}

#[tokio::test]
async fn test_missing_blob_fails_job_at_processing() {
    let h = harness();
    let receipt = h
        .orchestrator
        .create_ingest_job(kenyon_request())
        .await
        .unwrap();
    h.storage.fail_next_downloads(1);

    let outcome = h.orchestrator.run_job(receipt.job_id).await.unwrap();

    assert_eq!(outcome.status, JobStatus::Failed);
    assert!(h.processor.calls().is_empty());
    let error = h.store.job(receipt.job_id).unwrap().error.unwrap();
    assert_eq!(error.stage, JobStage::Processing);
}

#[tokio::test]
async fn test_terminal_job_is_not_reprocessed() {
    let h = harness();
    let receipt = h
        .orchestrator
        .create_ingest_job(kenyon_request())
        .await
        .unwrap();
    h.orchestrator.run_job(receipt.job_id).await.unwrap();

    let outcome = h.orchestrator.run_job(receipt.job_id).await.unwrap();

    assert_eq!(outcome.status, JobStatus::Failed);
    assert_eq!(h.processor.calls().len(), 1);
    assert_eq!(
        h.store.job(receipt.job_id).unwrap().status,
        JobStatus::Completed
    );
}

// =============================================================================
// INTELLIGENCE
// =============================================================================

#[tokio::test]
async fn test_dip_job_stages_entity_candidates() {
    let h = harness_with(
        MockProcessor::new(),
        MockEntityStore::new().rejecting("bbq-3000"),
        |storage| {
            Some(
                MockIntelligenceGenerator::new(vec![
                    entity("bbq-1000"),
                    entity("bbq-2000"),
                    entity("bbq-3000"),
                    entity("bbq-4000"),
                ])
                .with_artifact_storage(storage),
            )
        },
        fast_verification(),
    );
    let receipt = h
        .orchestrator
        .create_ingest_job(kenyon_request().with_job_type(JobType::Dip))
        .await
        .unwrap();

    let outcome = h.orchestrator.run_job(receipt.job_id).await.unwrap();

    assert!(outcome.is_completed());
    assert!(outcome.intelligence.succeeded());
    assert_eq!(
        outcome.entities,
        Some(ParseOutcome {
            entities_inserted: 3,
            total_entities: 4
        })
    );

    let job = h.store.job(receipt.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.dip_success, Some(true));
    assert_eq!(h.store.dip_success_calls(receipt.job_id), vec![true]);
    assert_eq!(job.counters.chunks, 12);
    assert_eq!(job.counters.entities_extracted, Some(4));
    assert_eq!(job.counters.spec_hints_found, Some(2));
    assert_eq!(job.counters.golden_tests_generated, Some(1));

    let inserted = h.candidates.inserted();
    assert_eq!(inserted.len(), 3);
    assert!(inserted.iter().all(|c| c.doc_id == receipt.doc_id));
    assert!(inserted.iter().all(|c| c.actor == "ingest-pipeline"));
}

#[tokio::test]
async fn test_dip_failure_does_not_fail_job() {
    let h = harness_with(
        MockProcessor::new(),
        MockEntityStore::new(),
        |_| Some(MockIntelligenceGenerator::failing("model overloaded")),
        fast_verification(),
    );
    let receipt = h
        .orchestrator
        .create_ingest_job(kenyon_request().with_job_type(JobType::Dip))
        .await
        .unwrap();

    let outcome = h.orchestrator.run_job(receipt.job_id).await.unwrap();

    assert!(outcome.is_completed());
    assert!(matches!(outcome.intelligence, IntelligenceOutcome::Failed(_)));
    assert_eq!(outcome.entities, None);

    let job = h.store.job(receipt.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.error, None);
    assert_eq!(job.dip_success, Some(false));
    assert_eq!(h.store.dip_success_calls(receipt.job_id), vec![false]);
    assert_eq!(job.counters.chunks, 12);
    assert_eq!(job.counters.upserted, 12);
    assert!(job.counters.dip_error.unwrap().contains("model overloaded"));
    assert!(h.candidates.inserted().is_empty());
}

#[tokio::test]
async fn test_entity_staging_failure_keeps_job_completed() {
    // The generator succeeds without writing dip.json, so staging cannot read it.
    let h = harness_with(
        MockProcessor::new(),
        MockEntityStore::new(),
        |_| Some(MockIntelligenceGenerator::new(vec![entity("bbq-1000")])),
        fast_verification(),
    );
    let receipt = h
        .orchestrator
        .create_ingest_job(kenyon_request().with_job_type(JobType::Dip))
        .await
        .unwrap();

    let outcome = h.orchestrator.run_job(receipt.job_id).await.unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.entities, None);
    assert_eq!(
        h.store.job(receipt.job_id).unwrap().status,
        JobStatus::Completed
    );
}

// =============================================================================
// RECONCILIATION
// =============================================================================

#[tokio::test]
async fn test_reconcile_sorts_stale_jobs() {
    let h = harness();

    let orphan = stale_job(JobStatus::Queued, "orphan-doc");
    let unverified = stale_job(JobStatus::UploadSuccess, "uploaded-doc");
    let unprocessed = stale_job(JobStatus::UploadComplete, "verified-doc");
    let mut fresh = stale_job(JobStatus::Queued, "fresh-doc");
    fresh.updated_at = Utc::now();
    let finished = stale_job(JobStatus::Completed, "done-doc");
    for job in [&orphan, &unverified, &unprocessed, &fresh, &finished] {
        h.store.insert_job(job.clone());
    }

    h.store
        .create_or_update_document(DocumentUpsert {
            doc_id: "uploaded-doc".to_string(),
            manufacturer: "Kenyon".to_string(),
            model: "BBQ Grill System".to_string(),
            manufacturer_norm: "Kenyon".to_string(),
            model_norm: "BBQ Grill System".to_string(),
            asset_uid: Uuid::nil(),
            system_norm: "Galley".to_string(),
            subsystem_norm: "Cooking".to_string(),
            revision_date: None,
            language: None,
            brand_family: None,
            source_url: None,
            last_ingest_version: None,
            last_job_id: Some(unverified.job_id),
        })
        .await
        .unwrap();
    h.store
        .update_document_storage_path("uploaded-doc", "manuals/uploaded-doc/m.pdf")
        .await
        .unwrap();

    let report = h.orchestrator.reconcile_default().await.unwrap();

    assert_eq!(report.scanned, 5);
    assert_eq!(report.orphaned, vec![orphan.job_id]);
    assert_eq!(
        report.pending_verification,
        vec![(unverified.job_id, "manuals/uploaded-doc/m.pdf".to_string())]
    );
    assert_eq!(report.pending_processing, vec![unprocessed.job_id]);

    let failed = h.store.job(orphan.job_id).unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.unwrap().stage, JobStage::Upload);
    assert_eq!(h.store.job(fresh.job_id).unwrap().status, JobStatus::Queued);

    let tasks = report.tasks();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.contains(&IngestTask::Process {
        job_id: unprocessed.job_id
    }));
    assert!(tasks.contains(&IngestTask::Verify {
        job_id: unverified.job_id,
        storage_path: "manuals/uploaded-doc/m.pdf".to_string(),
    }));
}

#[tokio::test]
async fn test_reconcile_fails_abandoned_processing_jobs() {
    let h = harness();

    let hours_ago = |hours: i64, status: JobStatus, doc_id: &str| {
        let mut job = stale_job(status, doc_id);
        job.updated_at = Utc::now() - chrono::Duration::hours(hours);
        job
    };
    let parsing = hours_ago(3, JobStatus::Parsing, "parsing-doc");
    let upserting = hours_ago(3, JobStatus::Upserting, "upserting-doc");
    let mut embedding = stale_job(JobStatus::Embedding, "embedding-doc");
    embedding.updated_at = Utc::now() - chrono::Duration::minutes(90);
    for job in [&parsing, &upserting, &embedding] {
        h.store.insert_job(job.clone());
    }

    let report = h.orchestrator.reconcile_default().await.unwrap();

    let mut abandoned = report.abandoned.clone();
    abandoned.sort();
    let mut expected = vec![parsing.job_id, upserting.job_id];
    expected.sort();
    assert_eq!(abandoned, expected);
    assert!(report.orphaned.is_empty());
    assert!(report.tasks().is_empty());

    let failed = h.store.job(parsing.job_id).unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    let error = failed.error.unwrap();
    assert_eq!(error.stage, JobStage::Processing);
    assert!(error.message.contains("parsing"));

    // Still inside a plausible sidecar window.
    assert_eq!(
        h.store.job(embedding.job_id).unwrap().status,
        JobStatus::Embedding
    );
}

#[tokio::test]
async fn test_stale_processing_threshold_is_configurable() {
    let store = Arc::new(MockJobStore::new());
    let orchestrator =
        IngestionOrchestrator::builder(store.clone(), Arc::new(MockResolver::kenyon()))
            .with_config(
                OrchestratorConfig::default().with_stale_processing_after(Duration::from_secs(60)),
            )
            .build();
    let mut parsing = stale_job(JobStatus::Parsing, "parsing-doc");
    parsing.updated_at = Utc::now() - chrono::Duration::minutes(5);
    store.insert_job(parsing.clone());

    let report = orchestrator
        .reconcile(chrono::Duration::hours(1))
        .await
        .unwrap();

    assert_eq!(report.abandoned, vec![parsing.job_id]);
    assert_eq!(store.job(parsing.job_id).unwrap().status, JobStatus::Failed);
}
