//! # manuals-jobs
//!
//! Ingestion orchestration for the manuals pipeline.
//!
//! This crate provides:
//! - Job creation with content addressing, registry lookup and upload
//! - Bounded-retry storage verification
//! - Processing dispatch to the external document processor
//! - The isolated DIP intelligence phase and entity candidate staging
//! - A background worker and a reconciliation sweep for stale jobs
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use manuals_db::{Database, StorageConfig};
//! use manuals_jobs::{IngestionOrchestrator, IngestRequest, WorkerBuilder, WorkerConfig};
//!
//! let db = Database::connect("postgres://...").await?;
//! let storage = StorageConfig::from_env()?.build()?;
//!
//! let (orchestrator, worker) = WorkerBuilder::new()
//!     .with_config(WorkerConfig::from_env())
//!     .build(|queue| {
//!         IngestionOrchestrator::builder(Arc::new(db.jobs.clone()), Arc::new(db.systems.clone()))
//!             .with_storage(storage)
//!             .with_queue(queue)
//!             .build()
//!     });
//! let handle = worker.start();
//!
//! let receipt = orchestrator
//!     .create_ingest_job(IngestRequest::new("manual.pdf", bytes).with_identity("Kenyon", "BBQ Grill System"))
//!     .await?;
//! ```

pub mod adapters;
pub mod entity_parsing;
pub mod intelligence;
pub mod mock;
pub mod orchestrator;
pub mod verification;
pub mod worker;

// Re-export core types
pub use manuals_core::*;

pub use adapters::{PatternDipGenerator, SidecarConfig, SidecarProcessor};
pub use entity_parsing::parse_dip_to_entity_candidates;
pub use intelligence::{run_intelligence_phase, IntelligenceRequest};
pub use orchestrator::{
    IngestionOrchestrator, JobOutcome, OrchestratorBuilder, OrchestratorConfig, ProcessOutcome,
    ReconcileReport,
};
pub use verification::{StorageVerifier, VerificationConfig};
pub use worker::{
    IngestTask, IngestWorker, TaskKind, TaskQueue, WorkerBuilder, WorkerConfig, WorkerEvent,
    WorkerHandle,
};
