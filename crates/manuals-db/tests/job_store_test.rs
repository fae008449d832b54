//! PostgreSQL integration tests for the job record store.
//!
//! These need a live database (`DATABASE_URL`, default
//! `DEFAULT_TEST_DATABASE_URL`) and are ignored by default:
//!
//! ```text
//! cargo test -p manuals-db --test job_store_test -- --ignored
//! ```

use manuals_db::{
    create_pool, generate_doc_id, Database, DocumentUpsert, Error, EntityCandidateStore,
    JobCounters, JobError, JobParams, JobRecordStore, JobStage, JobStatus, JobType, NewIngestJob,
    SystemMetadataResolver, DEFAULT_TEST_DATABASE_URL,
};
use uuid::Uuid;

const SCHEMA: &str = include_str!("../migrations/20261001000000_ingest_schema.sql");

async fn setup() -> Database {
    let _ = dotenvy::dotenv();
    let url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_TEST_DATABASE_URL.to_string());
    let pool = create_pool(&url).await.expect("Failed to create test pool");
    sqlx::raw_sql(SCHEMA)
        .execute(&pool)
        .await
        .expect("Failed to apply schema");
    Database::new(pool)
}

fn unique_doc_id() -> String {
    generate_doc_id(Uuid::new_v4().as_bytes())
}

async fn seed_document(db: &Database, doc_id: &str, asset_uid: Uuid) {
    db.jobs
        .create_or_update_document(DocumentUpsert {
            doc_id: doc_id.to_string(),
            manufacturer: "Kenyon".into(),
            model: "BBQ Grill System".into(),
            manufacturer_norm: "Kenyon".into(),
            model_norm: "BBQ Grill System".into(),
            asset_uid,
            system_norm: "Galley".into(),
            subsystem_norm: "Cooking".into(),
            revision_date: None,
            language: Some("en".into()),
            brand_family: None,
            source_url: None,
            last_ingest_version: Some("1.0.0".into()),
            last_job_id: None,
        })
        .await
        .expect("Failed to upsert document");
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_job_lifecycle_through_completed() {
    let db = setup().await;
    let doc_id = unique_doc_id();

    let job = db
        .jobs
        .create_job(NewIngestJob {
            doc_id: doc_id.clone(),
            job_type: JobType::Dip,
            params: JobParams::default(),
        })
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.counters, JobCounters::default());

    for status in [
        JobStatus::UploadSuccess,
        JobStatus::UploadComplete,
        JobStatus::Parsing,
        JobStatus::Completed,
    ] {
        db.jobs.update_job_status(job.job_id, status, None).await.unwrap();
    }

    let job = db.jobs.get_job(job.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());
    assert!(job.error.is_none());

    let err = db
        .jobs
        .update_job_status(job.job_id, JobStatus::Parsing, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_failed_job_keeps_error_record() {
    let db = setup().await;
    let job = db
        .jobs
        .create_job(NewIngestJob {
            doc_id: unique_doc_id(),
            job_type: JobType::Standard,
            params: JobParams::default(),
        })
        .await
        .unwrap();

    db.jobs
        .update_job_status(
            job.job_id,
            JobStatus::Failed,
            Some(JobError::new(JobStage::StorageVerification, "gone")),
        )
        .await
        .unwrap();

    let job = db.jobs.get_job(job.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.unwrap();
    assert_eq!(error.stage, JobStage::StorageVerification);
    assert_eq!(error.message, "gone");
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_progress_merge_is_monotonic_and_allowed_after_terminal() {
    let db = setup().await;
    let job = db
        .jobs
        .create_job(NewIngestJob {
            doc_id: unique_doc_id(),
            job_type: JobType::Dip,
            params: JobParams::default(),
        })
        .await
        .unwrap();

    db.jobs
        .update_job_progress(
            job.job_id,
            &JobCounters {
                chunks: 10,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    db.jobs
        .update_job_status(
            job.job_id,
            JobStatus::Failed,
            Some(JobError::new(JobStage::Processing, "x")),
        )
        .await
        .unwrap();
    db.jobs
        .update_job_progress(
            job.job_id,
            &JobCounters {
                chunks: 3,
                dip_error: Some("late".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let job = db.jobs.get_job(job.job_id).await.unwrap().unwrap();
    assert_eq!(job.counters.chunks, 10);
    assert_eq!(job.counters.dip_error.as_deref(), Some("late"));
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_document_upsert_preserves_storage_path() {
    let db = setup().await;
    let doc_id = unique_doc_id();
    let asset_uid = Uuid::new_v4();

    seed_document(&db, &doc_id, asset_uid).await;
    db.jobs
        .update_document_storage_path(&doc_id, &format!("manuals/{}/m.pdf", doc_id))
        .await
        .unwrap();
    seed_document(&db, &doc_id, asset_uid).await;

    let doc = db.jobs.get_document(&doc_id).await.unwrap().unwrap();
    assert_eq!(doc.asset_uid, asset_uid);
    assert_eq!(doc.file_name(), Some("m.pdf"));
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_storage_path_for_unknown_document() {
    let db = setup().await;
    let err = db
        .jobs
        .update_document_storage_path("missing-doc", "manuals/x/y.pdf")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DocumentNotFound(_)));
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_system_lookup() {
    let db = setup().await;
    let asset_uid = Uuid::new_v4();
    let model = format!("Model {}", asset_uid.simple());
    sqlx::query(
        "INSERT INTO systems (asset_uid, manufacturer_norm, model_norm, system_norm, subsystem_norm)
         VALUES ($1, 'Kenyon', $2, 'Galley', 'Cooking')",
    )
    .bind(asset_uid)
    .bind(&model)
    .execute(db.pool())
    .await
    .unwrap();

    let metadata = db.systems.lookup("kenyon", &model).await.unwrap();
    assert_eq!(metadata.validate().unwrap(), asset_uid);
    assert_eq!(metadata.system_norm, "Galley");

    let err = db.systems.lookup("Kenyon", "Nonexistent").await.unwrap_err();
    assert_eq!(err.code(), "SYSTEM_LOOKUP_FAILED");
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_entity_candidates_are_pending_system_rows() {
    let db = setup().await;
    let doc_id = unique_doc_id();
    let entity = manuals_db::DipEntity {
        entity_type: "model".into(),
        value: "bbq-2000".into(),
        confidence: 0.8,
        page: Some(2),
        context: None,
    };

    db.entity_candidates
        .insert_entity_candidate(&doc_id, &entity, "ingest-pipeline")
        .await
        .unwrap();

    let rows = db.entity_candidates.list_for_document(&doc_id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].source, "system");
    assert_eq!(rows[0].status, "pending");
    assert_eq!(rows[0].created_by, "ingest-pipeline");
}
