//! The generation pipeline.
//!
//! This module provides:
//! - The ordered stage plan and canonical step names
//! - The step tracker (persisted step state machine)
//! - Stage executors with bounded retry
//! - The orchestrator that sequences a run
//! - Regeneration of existing jobs

mod executors;
mod orchestrator;
mod plan;
mod regenerate;
mod retry;
mod tracker;

#[cfg(test)]
mod integration_tests;

pub use executors::{
    clean_text, RunScratch, StageExecutor, StageOutcome, SummaryArtifact, CONTENT_FETCHED_DETAIL,
    FINALIZED_DETAIL, IMAGE_GENERATED_DETAIL, SUMMARIZED_DETAIL, URL_VALIDATED_DETAIL,
};
pub use orchestrator::{Orchestrator, RunReport};
pub use plan::{
    image_step_name, initial_steps, plan, PipelineStage, CACHE_CHECK_STEP, FETCH_CONTENT_STEP,
    FINALIZE_STEP, SUMMARIZE_STEP, VALIDATE_URL_STEP,
};
pub use regenerate::reset_job;
pub use retry::{
    should_retry, BackoffStrategy, JitterStrategy, RetryConfig, RetryDecision, RetryState,
};
pub use tracker::StepTracker;
