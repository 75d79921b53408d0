//! Core domain model types for comicflow.
//!
//! This module contains the data the pipeline reads and writes:
//! - Step status and derived job state enums
//! - Steps and the name-addressed step list
//! - Step artifacts and image references
//! - Job records, requests and views

mod artifact;
mod image;
mod record;
mod status;
mod step;

pub use artifact::StepArtifact;
pub use image::ImageRef;
pub use record::{JobRecord, JobRequest, JobSummary, JobView, CACHE_HIT_DETAIL, CACHE_MISS_DETAIL};
pub use status::{JobState, StepStatus};
pub use step::{Step, StepList};
