//! # manuals-core
//!
//! Core types, traits, and abstractions for the manuals ingestion pipeline.
//!
//! This crate provides the job and document models, the collaborator traits
//! the orchestrator is written against, the error taxonomy, and content
//! addressing. Storage and job execution live in `manuals-db` and
//! `manuals-jobs`.

pub mod content_address;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use content_address::{generate_doc_id, is_content_id};
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
