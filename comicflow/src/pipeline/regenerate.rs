//! Regeneration: resetting a job so it can be produced again.

use tracing::info;

use super::plan::initial_steps;
use crate::core::JobRecord;
use crate::errors::Result;
use crate::store::JobStore;

/// Rebuilds the canonical step list of a job and clears its results.
///
/// The fingerprint, inputs and creation time are kept. Fails with
/// `NotFound` if the job does not exist. The caller starts the new run.
pub async fn reset_job(store: &dyn JobStore, job_id: &str) -> Result<JobRecord> {
    let record = store
        .update(
            job_id,
            Box::new(|record: &mut JobRecord| {
                let steps = initial_steps(record.requested_part_count);
                record.reset(steps);
                Ok(())
            }),
        )
        .await?;
    info!(job_id = %job_id, parts = record.requested_part_count, "Job reset for regeneration");
    Ok(record)
}
