//! Error types for the comicflow pipeline.
//!
//! Errors are split by layer: collaborator errors ([`FetchError`],
//! [`GenerationError`], [`SynthesisError`]) carry their own retry
//! classification, [`StageError`] is what a stage executor reports after
//! classifying a failure, and [`ComicflowError`] is the crate-wide error
//! returned by the service, the tracker and the stores.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T, E = ComicflowError> = std::result::Result<T, E>;

/// The main error type for comicflow operations.
#[derive(Debug, Error)]
pub enum ComicflowError {
    /// The caller supplied an invalid request; no job was created.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No job exists for the given identifier.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// A transition addressed a step the job does not have.
    #[error("Invalid step key '{step}' for job {job_id}")]
    StepNotFound {
        /// The job identifier.
        job_id: String,
        /// The step name that could not be located.
        step: String,
    },

    /// The job record has no step list.
    #[error("Steps array is missing for job {0}")]
    MissingSteps(String),

    /// A transition would break the step state machine.
    #[error("Rejected transition of step '{step}' for job {job_id}: {reason}")]
    InvalidTransition {
        /// The job identifier.
        job_id: String,
        /// The step being transitioned.
        step: String,
        /// Why the transition was rejected.
        reason: String,
    },

    /// A pipeline run is already executing for this job.
    #[error("Job {0} already has a pipeline run in progress")]
    AlreadyRunning(String),

    /// The supplied administrative secret did not match.
    #[error("Unauthorized")]
    Unauthorized,

    /// A stage failed.
    #[error("{0}")]
    Stage(#[from] StageError),

    /// The job store failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ComicflowError {
    /// Creates an invalid input error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Creates a step-not-found error.
    #[must_use]
    pub fn step_not_found(job_id: impl Into<String>, step: impl Into<String>) -> Self {
        Self::StepNotFound {
            job_id: job_id.into(),
            step: step.into(),
        }
    }

    /// Creates an invalid transition error.
    #[must_use]
    pub fn invalid_transition(
        job_id: impl Into<String>,
        step: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            job_id: job_id.into(),
            step: step.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if retrying the failed operation may succeed.
    ///
    /// Only classified stage failures are ever retried. Invariant
    /// violations and store failures are not: retrying cannot repair a
    /// corrupted record.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Stage(err) if err.is_retriable())
    }

    /// Returns true for errors that indicate a corrupted or inconsistent record.
    #[must_use]
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::StepNotFound { .. } | Self::MissingSteps(_) | Self::InvalidTransition { .. }
        )
    }
}

/// How a stage failure should be handled by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Transient; the stage may be attempted again.
    Retriable,
    /// Bad input or a permanent condition; fail immediately.
    NonRetriable,
}

/// A classified failure reported by a stage executor.
#[derive(Debug, Clone, Error)]
pub enum StageError {
    /// The stage failed in a way that may succeed on another attempt.
    #[error("{message}")]
    Retriable {
        /// The step the failure belongs to.
        stage: String,
        /// Human readable failure message.
        message: String,
    },

    /// The stage failed permanently.
    #[error("{message}")]
    NonRetriable {
        /// The step the failure belongs to.
        stage: String,
        /// Human readable failure message.
        message: String,
    },

    /// The stage exceeded its wall-clock budget.
    #[error("Stage '{stage}' timed out after {seconds}s")]
    Timeout {
        /// The step the failure belongs to.
        stage: String,
        /// The budget that was exceeded.
        seconds: f64,
    },
}

impl StageError {
    /// Creates a retriable stage error.
    #[must_use]
    pub fn retriable(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Retriable {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Creates a non-retriable stage error.
    #[must_use]
    pub fn non_retriable(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NonRetriable {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(stage: impl Into<String>, seconds: f64) -> Self {
        Self::Timeout {
            stage: stage.into(),
            seconds,
        }
    }

    /// Builds a stage error from a message and its failure class.
    #[must_use]
    pub fn classified(stage: impl Into<String>, class: FailureClass, message: impl Into<String>) -> Self {
        match class {
            FailureClass::Retriable => Self::retriable(stage, message),
            FailureClass::NonRetriable => Self::non_retriable(stage, message),
        }
    }

    /// Returns the name of the step that failed.
    #[must_use]
    pub fn stage(&self) -> &str {
        match self {
            Self::Retriable { stage, .. }
            | Self::NonRetriable { stage, .. }
            | Self::Timeout { stage, .. } => stage,
        }
    }

    /// Returns true if the stage may be attempted again.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Retriable { .. })
    }
}

/// Errors from the document fetcher and link probe.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The URL could not be parsed or uses an unsupported scheme.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The request failed before a response was received.
    #[error("Request failed: {0}")]
    Request(String),

    /// The server answered with a non-success status.
    #[error("Unexpected HTTP status {status} for {url}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// The requested URL.
        url: String,
    },

    /// The resource is not an HTML document.
    #[error("URL must point to an HTML page (got {0})")]
    UnsupportedContentType(String),

    /// The document body exceeded the configured size.
    #[error("Response exceeds {limit} bytes")]
    TooLarge {
        /// The configured limit.
        limit: usize,
    },
}

impl FetchError {
    /// Returns the failure class of this error.
    #[must_use]
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Request(_) => FailureClass::Retriable,
            Self::Status { status, .. } if *status == 429 || *status >= 500 => {
                FailureClass::Retriable
            }
            _ => FailureClass::NonRetriable,
        }
    }

    /// Returns true if retrying may succeed.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        self.class() == FailureClass::Retriable
    }
}

/// Errors from the structured content generator.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    /// The generator is not configured (e.g. a missing API key).
    #[error("Content generator misconfigured: {0}")]
    Configuration(String),

    /// The request failed before a response was received.
    #[error("Request failed: {0}")]
    Request(String),

    /// The service answered with an error status.
    #[error("Generation API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The response could not be interpreted.
    #[error("No usable content received: {0}")]
    MalformedResponse(String),

    /// The number of parts does not match the request.
    #[error("Expected {expected} parts but received {actual}")]
    PartCountMismatch {
        /// The requested part count.
        expected: usize,
        /// The number of parts returned.
        actual: usize,
    },

    /// A summary was missing or too short.
    #[error("Invalid summary for part {part}")]
    DegenerateSummary {
        /// One-based part number.
        part: usize,
    },

    /// An image prompt was empty.
    #[error("Invalid image prompt for part {part}")]
    EmptyPrompt {
        /// One-based part number.
        part: usize,
    },
}

impl GenerationError {
    /// Returns the failure class of this error.
    #[must_use]
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Configuration(_) => FailureClass::NonRetriable,
            Self::Api { status, .. } if *status == 401 || *status == 403 => {
                FailureClass::NonRetriable
            }
            _ => FailureClass::Retriable,
        }
    }
}

/// Errors from the image synthesizer.
#[derive(Debug, Clone, Error)]
pub enum SynthesisError {
    /// The synthesizer is not configured (e.g. a missing API key).
    #[error("Image synthesizer misconfigured: {0}")]
    Configuration(String),

    /// The request failed before a response was received.
    #[error("Request failed: {0}")]
    Request(String),

    /// The service answered with an error status.
    #[error("Image API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The service returned no image reference.
    #[error("Invalid image URL received")]
    EmptyReference,

    /// The returned reference could not be resolved.
    #[error("Generated image not accessible: {0}")]
    Unresolvable(String),
}

impl SynthesisError {
    /// Returns the failure class of this error.
    #[must_use]
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Configuration(_) => FailureClass::NonRetriable,
            Self::Api { status, .. } if *status == 401 || *status == 403 => {
                FailureClass::NonRetriable
            }
            _ => FailureClass::Retriable,
        }
    }
}

/// Errors raised by a job store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error from a file-backed store.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored record could not be decoded.
    #[error("Corrupt record '{key}': {message}")]
    Corrupt {
        /// The record key.
        key: String,
        /// Decoder message.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_retriable_stage_errors_are_retriable() {
        let retriable: ComicflowError = StageError::retriable("Generating Summary", "boom").into();
        let fatal: ComicflowError = StageError::non_retriable("Validating URL", "bad").into();
        let timeout: ComicflowError = StageError::timeout("Generating Summary", 1.0).into();

        assert!(retriable.is_retriable());
        assert!(!fatal.is_retriable());
        assert!(!timeout.is_retriable());
        assert!(!ComicflowError::MissingSteps("x".into()).is_retriable());
    }

    #[test]
    fn test_stage_error_display_is_bare_message() {
        let err = StageError::retriable("Downloading Article Content", "Article content too short or invalid");
        assert_eq!(err.to_string(), "Article content too short or invalid");
        assert_eq!(err.stage(), "Downloading Article Content");
    }

    #[test]
    fn test_fetch_error_classes() {
        assert!(FetchError::Request("reset".into()).is_retriable());
        assert!(FetchError::Status { status: 503, url: "u".into() }.is_retriable());
        assert!(FetchError::Status { status: 429, url: "u".into() }.is_retriable());
        assert!(!FetchError::Status { status: 404, url: "u".into() }.is_retriable());
        assert!(!FetchError::UnsupportedContentType("application/pdf".into()).is_retriable());
        assert!(!FetchError::InvalidUrl("nope".into()).is_retriable());
    }

    #[test]
    fn test_generation_error_classes() {
        assert_eq!(
            GenerationError::PartCountMismatch { expected: 3, actual: 2 }.class(),
            FailureClass::Retriable
        );
        assert_eq!(
            GenerationError::Configuration("no key".into()).class(),
            FailureClass::NonRetriable
        );
        assert_eq!(
            GenerationError::Api { status: 401, body: String::new() }.class(),
            FailureClass::NonRetriable
        );
    }

    #[test]
    fn test_invariant_classification() {
        assert!(ComicflowError::step_not_found("job", "Nope").is_invariant_violation());
        assert!(!ComicflowError::Unauthorized.is_invariant_violation());
    }
}
