//! Pipeline orchestrator.
//!
//! A run is an explicit loop over the stage plan. Each stage is awaited to
//! completion under a timeout before the next one starts. Steps already
//! complete are skipped, so a run started on a half finished record picks
//! up where the previous one stopped.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use super::executors::{RunScratch, StageExecutor, StageOutcome};
use super::plan::{plan, PipelineStage};
use super::tracker::StepTracker;
use crate::collaborators::Collaborators;
use crate::config::PipelineConfig;
use crate::core::{JobRecord, JobState, StepStatus};
use crate::errors::{ComicflowError, Result, StageError};
use crate::events::{EventSink, PipelineEvent};
use crate::observability::StageTimer;
use crate::store::JobStore;

/// Summary of one finished run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    /// Job identifier.
    pub job_id: String,
    /// Identifier of this run.
    pub run_id: String,
    /// State of the job when the run ended.
    pub state: JobState,
    /// True when the run ended on the cache check.
    pub from_cache: bool,
    /// Error message when the run failed.
    pub error: Option<String>,
    /// Wall clock duration of the run.
    pub duration_ms: f64,
}

impl RunReport {
    /// Returns true if the run left the job succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.state == JobState::Succeeded
    }
}

/// Drives the stages of a job in order.
#[derive(Clone)]
pub struct Orchestrator {
    executor: StageExecutor,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(
        store: Arc<dyn JobStore>,
        collaborators: Collaborators,
        config: PipelineConfig,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let tracker = StepTracker::new(store, sink.clone());
        Self {
            executor: StageExecutor::new(tracker, collaborators, config, sink.clone()),
            sink,
        }
    }

    /// Returns the step tracker.
    #[must_use]
    pub fn tracker(&self) -> &StepTracker {
        self.executor.tracker()
    }

    /// Runs the pipeline for a stored job until it succeeds or a step fails.
    ///
    /// Stage failures are recorded on the job and reported in the returned
    /// [`RunReport`]; an `Err` means the run could not even record its
    /// failure (unknown job, store unavailable, job already failed).
    pub async fn run(&self, job_id: &str) -> Result<RunReport> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("pipeline_run", job_id = %job_id, run_id = %run_id);
        self.run_inner(job_id, run_id).instrument(span).await
    }

    async fn run_inner(&self, job_id: &str, run_id: String) -> Result<RunReport> {
        let timer = StageTimer::start(job_id);
        let record = self
            .tracker()
            .store()
            .get(job_id)
            .await?
            .ok_or_else(|| ComicflowError::NotFound(job_id.to_string()))?;

        if let Some(failed) = record.steps.first_error() {
            return Err(ComicflowError::invalid_transition(
                job_id,
                failed.name.clone(),
                "job has failed; regenerate it to run again",
            ));
        }

        info!(parts = record.requested_part_count, "Pipeline run started");
        self.sink
            .emit(&PipelineEvent::PipelineStarted {
                job_id: job_id.to_string(),
                run_id: run_id.clone(),
                part_count: record.requested_part_count,
            })
            .await;

        let mut scratch = RunScratch::restore(&record);
        let mut from_cache = false;

        for stage in plan(record.requested_part_count) {
            if Self::already_done(&record, stage) {
                debug!(step = %stage, "Skipping completed step");
                continue;
            }

            match self.execute_stage(stage, &record, &mut scratch).await {
                Ok(StageOutcome::Continue) => {}
                Ok(StageOutcome::ShortCircuit) => {
                    from_cache = true;
                    break;
                }
                Err(e) => return self.fail_run(job_id, run_id, stage, &e, timer).await,
            }
        }

        let duration_ms = timer.finish();
        info!(duration_ms, from_cache, "Pipeline run completed");
        self.sink
            .emit(&PipelineEvent::PipelineCompleted {
                job_id: job_id.to_string(),
                run_id: run_id.clone(),
                duration_ms,
            })
            .await;

        Ok(RunReport {
            job_id: job_id.to_string(),
            run_id,
            state: JobState::Succeeded,
            from_cache,
            error: None,
            duration_ms,
        })
    }

    /// A completed step is skipped, except the cache check of a fully
    /// complete record, which turns the run into a cache hit.
    fn already_done(record: &JobRecord, stage: PipelineStage) -> bool {
        let complete = record
            .steps
            .get(&stage.step_name())
            .is_some_and(|s| s.status == StepStatus::Complete);
        complete && !(stage == PipelineStage::CacheCheck && record.steps.all_complete())
    }

    async fn execute_stage(
        &self,
        stage: PipelineStage,
        record: &JobRecord,
        scratch: &mut RunScratch,
    ) -> Result<StageOutcome> {
        let timer = StageTimer::start(stage.step_name());
        let limit = self.executor.config().stage_timeout();

        let outcome = match tokio::time::timeout(limit, self.executor.execute(stage, record, scratch)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(StageError::timeout(stage.step_name(), limit.as_secs_f64()).into());
            }
        };

        debug!(step = %timer.name(), duration_ms = timer.elapsed_ms(), "Stage finished");
        Ok(outcome)
    }

    async fn fail_run(
        &self,
        job_id: &str,
        run_id: String,
        stage: PipelineStage,
        cause: &ComicflowError,
        timer: StageTimer,
    ) -> Result<RunReport> {
        let message = cause.to_string();
        let failed_step = self.fail_current_step(job_id, stage, &message).await?;
        let duration_ms = timer.finish();

        error!(
            step = failed_step.as_deref().unwrap_or("<none>"),
            error = %message,
            invariant_violation = cause.is_invariant_violation(),
            duration_ms,
            "Pipeline run failed"
        );
        self.sink
            .emit(&PipelineEvent::PipelineFailed {
                job_id: job_id.to_string(),
                run_id: run_id.clone(),
                step: failed_step,
                error: message.clone(),
            })
            .await;

        let state = self
            .tracker()
            .store()
            .get(job_id)
            .await?
            .map_or(JobState::Failed, |r| r.state());

        Ok(RunReport {
            job_id: job_id.to_string(),
            run_id,
            state,
            from_cache: false,
            error: Some(message),
            duration_ms,
        })
    }

    /// Marks the in-progress step (or, when none is, the failing stage's
    /// step) as `error`. Returns the name of the step marked.
    async fn fail_current_step(
        &self,
        job_id: &str,
        stage: PipelineStage,
        message: &str,
    ) -> Result<Option<String>> {
        let record = self
            .tracker()
            .store()
            .get(job_id)
            .await?
            .ok_or_else(|| ComicflowError::NotFound(job_id.to_string()))?;

        let target = record
            .steps
            .in_progress()
            .map(|s| s.name.clone())
            .or_else(|| {
                let name = stage.step_name();
                record
                    .steps
                    .get(&name)
                    .filter(|s| s.status == StepStatus::Pending)
                    .map(|_| name)
            });

        let Some(step) = target else {
            error!(error = %message, "No step to mark as failed");
            return Ok(None);
        };
        self.tracker().fail(job_id, &step, message).await?;
        Ok(Some(step))
    }
}
