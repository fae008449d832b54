//! Concrete collaborators for the ingestion orchestrator.

pub mod dip_generator;
pub mod sidecar;

pub use dip_generator::PatternDipGenerator;
pub use sidecar::{SidecarConfig, SidecarProcessor};
