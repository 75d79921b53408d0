//! Pipeline events for observability.
//!
//! Every step transition and every run boundary produces a
//! [`PipelineEvent`] that is handed to the configured [`EventSink`].
//! Sinks never fail the pipeline; they are strictly side channels.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use serde::Serialize;

use crate::core::StepStatus;

/// Something that happened to a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A step changed status.
    StepTransitioned {
        /// Job identifier.
        job_id: String,
        /// Step name.
        step: String,
        /// New status.
        status: StepStatus,
        /// Detail recorded with the transition.
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// A pipeline run began.
    PipelineStarted {
        /// Job identifier.
        job_id: String,
        /// Identifier of this run.
        run_id: String,
        /// Number of parts being produced.
        part_count: usize,
    },
    /// A pipeline run finished with every step complete.
    PipelineCompleted {
        /// Job identifier.
        job_id: String,
        /// Identifier of this run.
        run_id: String,
        /// Wall clock duration of the run.
        duration_ms: f64,
    },
    /// A pipeline run stopped on an error.
    PipelineFailed {
        /// Job identifier.
        job_id: String,
        /// Identifier of this run.
        run_id: String,
        /// Step that failed, when known.
        #[serde(skip_serializing_if = "Option::is_none")]
        step: Option<String>,
        /// Error message.
        error: String,
    },
    /// A submission was served from an existing completed record.
    CacheHit {
        /// Job identifier.
        job_id: String,
    },
}

impl PipelineEvent {
    /// Returns the dotted event type, e.g. `step.transitioned`.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StepTransitioned { .. } => "step.transitioned",
            Self::PipelineStarted { .. } => "pipeline.started",
            Self::PipelineCompleted { .. } => "pipeline.completed",
            Self::PipelineFailed { .. } => "pipeline.failed",
            Self::CacheHit { .. } => "pipeline.cache_hit",
        }
    }

    /// Returns the job this event belongs to.
    #[must_use]
    pub fn job_id(&self) -> &str {
        match self {
            Self::StepTransitioned { job_id, .. }
            | Self::PipelineStarted { job_id, .. }
            | Self::PipelineCompleted { job_id, .. }
            | Self::PipelineFailed { job_id, .. }
            | Self::CacheHit { job_id } => job_id,
        }
    }

    /// Converts the event to a JSON payload.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
