//! The document intelligence phase of a DIP job.
//!
//! Runs after primary processing succeeded. Nothing in here can fail the job:
//! every error is folded into an [`IntelligenceOutcome::Failed`] value, the
//! base counters and `dip_error` are merged, and `dip_success` is recorded.

use std::time::Instant;

use tracing::{error, info, warn};

use manuals_core::{
    DipOptions, Document, Error, IngestJob, IntelligenceGenerator, IntelligenceOutcome,
    JobCounters, JobRecordStore, Result,
};

/// Inputs for one run of the intelligence phase.
pub struct IntelligenceRequest<'a> {
    pub job: &'a IngestJob,
    pub document: &'a Document,
    pub data: &'a [u8],
    pub file_name: &'a str,
    /// Counters produced by primary processing.
    pub base_counters: &'a JobCounters,
}

/// Run the phase and record its outcome on the job.
///
/// `update_job_dip_success` is called exactly once, whatever happens.
pub async fn run_intelligence_phase(
    store: &dyn JobRecordStore,
    generator: Option<&dyn IntelligenceGenerator>,
    request: IntelligenceRequest<'_>,
) -> IntelligenceOutcome {
    let start = Instant::now();
    let job_id = request.job.job_id;

    let outcome = match generate(store, generator, &request).await {
        Ok(summary) => IntelligenceOutcome::Generated(summary),
        Err(e) => {
            let message = e.to_string();
            warn!(
                subsystem = "orchestrator",
                component = "intelligence",
                job_id = %job_id,
                doc_id = %request.job.doc_id,
                error = %message,
                duration_ms = start.elapsed().as_millis() as u64,
                "Intelligence phase failed, continuing with primary result"
            );
            let mut counters = request.base_counters.base();
            counters.dip_error = Some(message.clone());
            if let Err(e) = store.update_job_progress(job_id, &counters).await {
                error!(job_id = %job_id, error = %e, "Failed to record dip_error");
            }
            IntelligenceOutcome::Failed(message)
        }
    };

    if let Err(e) = store
        .update_job_dip_success(job_id, outcome.succeeded())
        .await
    {
        error!(job_id = %job_id, error = %e, "Failed to record dip_success");
    }

    if let IntelligenceOutcome::Generated(summary) = &outcome {
        info!(
            subsystem = "orchestrator",
            component = "intelligence",
            job_id = %job_id,
            doc_id = %request.job.doc_id,
            entity_count = summary.entities_count,
            hints = summary.hints_count,
            tests = summary.tests_count,
            duration_ms = start.elapsed().as_millis() as u64,
            "Intelligence phase complete"
        );
    }

    outcome
}

async fn generate(
    store: &dyn JobRecordStore,
    generator: Option<&dyn IntelligenceGenerator>,
    request: &IntelligenceRequest<'_>,
) -> Result<manuals_core::DipSummary> {
    let generator = generator.ok_or_else(|| {
        Error::Intelligence("No intelligence generator configured".to_string())
    })?;

    let options = DipOptions {
        job_id: request.job.job_id,
        manufacturer: request.document.manufacturer.clone(),
        model: request.document.model.clone(),
        asset_uid: request.document.asset_uid,
        system_norm: request.document.system_norm.clone(),
        subsystem_norm: request.document.subsystem_norm.clone(),
    };

    let summary = generator
        .generate_dip(
            request.data,
            &request.job.doc_id,
            request.file_name,
            &options,
        )
        .await?;

    store
        .update_job_progress(request.job.job_id, &summary.counters())
        .await?;

    Ok(summary)
}
