//! Job records and the views derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ImageRef, JobState, StepList};

/// Detail recorded on the cache-check step when a completed record is reused.
pub const CACHE_HIT_DETAIL: &str = "Retrieved from cache";

/// Detail recorded on the cache-check step when a fresh run starts.
pub const CACHE_MISS_DETAIL: &str = "New generation started";

/// Parameters of a generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Document to illustrate.
    pub source_url: String,
    /// Number of parts (and images) to produce.
    pub requested_part_count: usize,
    /// Replaces the default summarization prompt.
    #[serde(default)]
    pub summary_prompt_override: Option<String>,
    /// Replaces the default image prompt template.
    #[serde(default)]
    pub image_prompt_override: Option<String>,
}

impl JobRequest {
    /// Creates a request without prompt overrides.
    #[must_use]
    pub fn new(source_url: impl Into<String>, requested_part_count: usize) -> Self {
        Self {
            source_url: source_url.into(),
            requested_part_count,
            summary_prompt_override: None,
            image_prompt_override: None,
        }
    }

    /// Sets the summary prompt override.
    #[must_use]
    pub fn with_summary_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.summary_prompt_override = Some(prompt.into());
        self
    }

    /// Sets the image prompt override.
    #[must_use]
    pub fn with_image_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.image_prompt_override = Some(prompt.into());
        self
    }
}

/// The unit of work and its accumulated results, keyed by fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Stable identifier; also the external job id.
    pub fingerprint: String,
    /// Document being illustrated.
    pub source_url: String,
    /// Number of parts requested.
    pub requested_part_count: usize,
    /// Title produced by content generation.
    #[serde(default)]
    pub title: Option<String>,
    /// Ordered step list.
    #[serde(default)]
    pub steps: StepList,
    /// One summary per part, set by the summarize stage.
    #[serde(default)]
    pub summaries: Vec<String>,
    /// One image per part, appended as each image stage completes.
    #[serde(default)]
    pub image_refs: Vec<ImageRef>,
    /// Caller supplied summary prompt.
    #[serde(default)]
    pub summary_prompt_override: Option<String>,
    /// Caller supplied image prompt template.
    #[serde(default)]
    pub image_prompt_override: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl JobRecord {
    /// Creates a record for a new request.
    #[must_use]
    pub fn new(fingerprint: impl Into<String>, request: &JobRequest, steps: StepList) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            source_url: request.source_url.clone(),
            requested_part_count: request.requested_part_count,
            title: None,
            steps,
            summaries: Vec::new(),
            image_refs: Vec::new(),
            summary_prompt_override: request.summary_prompt_override.clone(),
            image_prompt_override: request.image_prompt_override.clone(),
            created_at: Utc::now(),
        }
    }

    /// Returns the request this record was created from.
    #[must_use]
    pub fn request(&self) -> JobRequest {
        JobRequest {
            source_url: self.source_url.clone(),
            requested_part_count: self.requested_part_count,
            summary_prompt_override: self.summary_prompt_override.clone(),
            image_prompt_override: self.image_prompt_override.clone(),
        }
    }

    /// Replaces the step list and clears every generated result.
    pub fn reset(&mut self, steps: StepList) {
        self.steps = steps;
        self.title = None;
        self.summaries.clear();
        self.image_refs.clear();
    }

    /// Derives the overall state from the steps.
    #[must_use]
    pub fn state(&self) -> JobState {
        self.steps.state()
    }

    /// True when the job is complete and the cache-check step reported a hit.
    #[must_use]
    pub fn from_cache(&self) -> bool {
        self.steps.all_complete()
            && self
                .steps
                .first()
                .and_then(|s| s.detail.as_deref())
                .is_some_and(|d| d == CACHE_HIT_DETAIL)
    }

    /// Returns true if the result sequences match the requested part count.
    #[must_use]
    pub fn results_complete(&self) -> bool {
        self.summaries.len() == self.requested_part_count
            && self.image_refs.len() == self.requested_part_count
    }

    /// Builds the listing summary for this record.
    #[must_use]
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.fingerprint.clone(),
            title: self.title.clone(),
            source_url: self.source_url.clone(),
            state: self.state(),
            created_at: self.created_at,
        }
    }
}

/// What a poller receives: the full record plus derived fields.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    /// The record, including the full step history.
    #[serde(flatten)]
    pub record: JobRecord,
    /// True when the result was served from a previous run.
    pub from_cache: bool,
    /// Overall state derived from the steps.
    pub state: JobState,
}

impl From<JobRecord> for JobView {
    fn from(record: JobRecord) -> Self {
        let from_cache = record.from_cache();
        let state = record.state();
        Self {
            record,
            from_cache,
            state,
        }
    }
}

/// Short description of a job used by the recent jobs listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    /// The job identifier.
    pub job_id: String,
    /// Title, if generated yet.
    pub title: Option<String>,
    /// Document being illustrated.
    pub source_url: String,
    /// Overall state.
    pub state: JobState,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}
