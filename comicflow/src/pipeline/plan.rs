//! The ordered stage plan and the step names derived from it.

use std::fmt;

use crate::core::StepList;

/// Step name of the cache check.
pub const CACHE_CHECK_STEP: &str = "Checking Cache";
/// Step name of URL validation.
pub const VALIDATE_URL_STEP: &str = "Validating URL";
/// Step name of the content fetch.
pub const FETCH_CONTENT_STEP: &str = "Downloading Article Content";
/// Step name of summary and prompt generation.
pub const SUMMARIZE_STEP: &str = "Generating Summary";
/// Step name of finalization.
pub const FINALIZE_STEP: &str = "Finalizing Comic";

/// One stage of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    /// Short-circuits when the record is already complete.
    CacheCheck,
    /// Checks the URL points at an HTML page.
    ValidateUrl,
    /// Downloads and cleans the article.
    FetchContent,
    /// Produces the title, summaries and image prompts.
    Summarize,
    /// Produces the image of one part (1-based).
    GenerateImage {
        /// Part number, starting at 1.
        part: usize,
    },
    /// Checks the results and closes the run.
    Finalize,
}

impl PipelineStage {
    /// Returns the name of the step this stage drives.
    #[must_use]
    pub fn step_name(&self) -> String {
        match self {
            Self::CacheCheck => CACHE_CHECK_STEP.to_string(),
            Self::ValidateUrl => VALIDATE_URL_STEP.to_string(),
            Self::FetchContent => FETCH_CONTENT_STEP.to_string(),
            Self::Summarize => SUMMARIZE_STEP.to_string(),
            Self::GenerateImage { part } => image_step_name(*part),
            Self::Finalize => FINALIZE_STEP.to_string(),
        }
    }

    /// Returns true for stages that get bounded retries.
    #[must_use]
    pub fn is_retried(&self) -> bool {
        matches!(
            self,
            Self::FetchContent | Self::Summarize | Self::GenerateImage { .. }
        )
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.step_name())
    }
}

/// Returns the step name of the image stage for `part` (1-based).
#[must_use]
pub fn image_step_name(part: usize) -> String {
    format!("Generating Image for Part {part}")
}

/// Returns the stages of a run producing `part_count` parts, in order.
#[must_use]
pub fn plan(part_count: usize) -> Vec<PipelineStage> {
    let mut stages = vec![
        PipelineStage::CacheCheck,
        PipelineStage::ValidateUrl,
        PipelineStage::FetchContent,
        PipelineStage::Summarize,
    ];
    stages.extend((1..=part_count).map(|part| PipelineStage::GenerateImage { part }));
    stages.push(PipelineStage::Finalize);
    stages
}

/// Returns the canonical pending step list for `part_count` parts.
#[must_use]
pub fn initial_steps(part_count: usize) -> StepList {
    StepList::from_names(plan(part_count).iter().map(PipelineStage::step_name))
}
