//! # Comicflow
//!
//! A resumable background pipeline that turns an article URL into an
//! illustrated multi-part comic.
//!
//! Comicflow provides:
//!
//! - **Deduplicated jobs**: identical requests share one job, keyed by a
//!   content fingerprint
//! - **Persisted step tracking**: every job carries an ordered list of named
//!   steps that clients poll for progress
//! - **Bounded retry**: transient collaborator failures are retried with
//!   backoff and reported on the step
//! - **Regeneration and resume**: failed jobs can be reset and rerun, and
//!   interrupted runs pick up at the first unfinished step
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use comicflow::prelude::*;
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemoryJobStore::new());
//! let service = ComicService::with_http_collaborators(
//!     store,
//!     ServiceConfig::from_env()?,
//!     Arc::new(LoggingEventSink::debug()),
//! )?;
//!
//! let receipt = service.submit(JobRequest::new("https://example.com/post", 3)).await?;
//! let view = service.status(&receipt.job_id).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod collaborators;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod fingerprint;
pub mod observability;
pub mod pipeline;
pub mod service;
pub mod store;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::collaborators::{
        Collaborators, ContentGenerator, DocumentFetcher, ImageSynthesizer, LinkProbe,
        ProbeResponse, StoryBoard, StoryPart,
    };
    pub use crate::config::{FetchConfig, OpenAiConfig, PipelineConfig, ServiceConfig};
    pub use crate::core::{
        ImageRef, JobRecord, JobRequest, JobState, JobSummary, JobView, Step, StepArtifact,
        StepList, StepStatus,
    };
    pub use crate::errors::{ComicflowError, Result, StageError};
    pub use crate::events::{
        CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, PipelineEvent,
    };
    pub use crate::fingerprint::{fingerprint, fingerprint_request};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{Orchestrator, RetryConfig, RunReport, StepTracker};
    pub use crate::service::{ComicService, SubmitReceipt};
    pub use crate::store::{FileJobStore, InMemoryJobStore, JobStore};
}
