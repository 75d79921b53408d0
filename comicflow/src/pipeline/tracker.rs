//! Step tracker: the persisted state machine over a job's step list.

use std::sync::Arc;
use tracing::debug;

use super::plan::initial_steps;
use crate::core::{JobRecord, StepArtifact, StepList, StepStatus};
use crate::errors::Result;
use crate::events::{EventSink, PipelineEvent};
use crate::store::JobStore;

/// Applies step transitions to stored records.
///
/// Every transition goes through [`JobStore::update`], so it is persisted
/// before the call returns and serialized with other writers of the job.
#[derive(Clone)]
pub struct StepTracker {
    store: Arc<dyn JobStore>,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for StepTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepTracker").finish_non_exhaustive()
    }
}

impl StepTracker {
    /// Creates a tracker over a store.
    #[must_use]
    pub fn new(store: Arc<dyn JobStore>, sink: Arc<dyn EventSink>) -> Self {
        Self { store, sink }
    }

    /// Returns the canonical pending step list for `part_count` parts.
    #[must_use]
    pub fn initialize(part_count: usize) -> StepList {
        initial_steps(part_count)
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Transitions a named step and returns the updated list.
    pub async fn transition(
        &self,
        job_id: &str,
        step: &str,
        status: StepStatus,
        detail: Option<String>,
        artifact: Option<StepArtifact>,
    ) -> Result<StepList> {
        let event_detail = detail.clone();
        let record = self
            .store
            .update(
                job_id,
                Box::new(move |record: &mut JobRecord| {
                    record.steps.apply(&record.fingerprint, step, status, detail, artifact)
                }),
            )
            .await?;

        debug!(job_id = %job_id, step = %step, status = %status, detail = ?event_detail, "Step transitioned");
        self.sink
            .emit(&PipelineEvent::StepTransitioned {
                job_id: job_id.to_string(),
                step: step.to_string(),
                status,
                detail: event_detail,
            })
            .await;

        Ok(record.steps)
    }

    /// Marks a step in progress.
    pub async fn start(&self, job_id: &str, step: &str) -> Result<StepList> {
        self.transition(job_id, step, StepStatus::InProgress, None, None).await
    }

    /// Re-marks a step in progress with a retry detail.
    pub async fn retrying(&self, job_id: &str, step: &str, detail: String) -> Result<StepList> {
        self.transition(job_id, step, StepStatus::InProgress, Some(detail), None)
            .await
    }

    /// Marks a step complete.
    pub async fn complete(
        &self,
        job_id: &str,
        step: &str,
        detail: impl Into<String>,
        artifact: Option<StepArtifact>,
    ) -> Result<StepList> {
        self.transition(job_id, step, StepStatus::Complete, Some(detail.into()), artifact)
            .await
    }

    /// Marks a step in error with an `Error: <message>` detail.
    pub async fn fail(&self, job_id: &str, step: &str, message: &str) -> Result<StepList> {
        self.transition(
            job_id,
            step,
            StepStatus::Error,
            Some(format!("Error: {message}")),
            None,
        )
        .await
    }
}
