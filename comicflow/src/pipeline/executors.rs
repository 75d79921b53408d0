//! Stage executors.
//!
//! Each executor runs one collaborator call, validates the result, and
//! turns it into step transitions. Retriable failures of the fetch,
//! summarize and image stages are retried up to the configured attempt
//! count; anything else is returned to the orchestrator, which marks the
//! in-progress step as failed.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::OnceLock;
use tracing::{info, warn};

use super::plan::{PipelineStage, CACHE_CHECK_STEP};
use super::retry::{should_retry, RetryDecision, RetryState};
use super::tracker::StepTracker;
use crate::collaborators::{Collaborators, StoryBoard};
use crate::config::PipelineConfig;
use crate::core::{
    ImageRef, JobRecord, StepArtifact, StepStatus, CACHE_HIT_DETAIL, CACHE_MISS_DETAIL,
};
use crate::errors::{ComicflowError, FetchError, GenerationError, Result, StageError, SynthesisError};
use crate::events::{EventSink, PipelineEvent};

/// Detail of a completed URL validation.
pub const URL_VALIDATED_DETAIL: &str = "URL validated successfully";
/// Detail of a completed fetch.
pub const CONTENT_FETCHED_DETAIL: &str = "Article downloaded and processed";
/// Detail of a completed summarization.
pub const SUMMARIZED_DETAIL: &str = "Generated summaries and prompts";
/// Detail of a completed image stage.
pub const IMAGE_GENERATED_DETAIL: &str = "Generated comic panel";
/// Detail of a completed finalization.
pub const FINALIZED_DETAIL: &str = "Comic generation completed";

/// How the run continues after a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// Go on with the next stage.
    Continue,
    /// Stop the run successfully; the record was already complete.
    ShortCircuit,
}

/// Summaries and prompts as recorded in the summary step's artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryArtifact {
    /// One summary per part.
    pub summaries: Vec<String>,
    /// One image prompt per part.
    pub prompts: Vec<String>,
}

impl SummaryArtifact {
    fn from_board(board: &StoryBoard) -> Self {
        Self {
            summaries: board.summaries(),
            prompts: board.prompts(),
        }
    }
}

/// Intermediate data passed between the stages of one run.
///
/// Everything here is also recoverable from the step artifacts, which lets
/// a run resume a record that an earlier process left half done.
#[derive(Debug, Clone, Default)]
pub struct RunScratch {
    /// Cleaned article text.
    pub article_text: Option<String>,
    /// One image prompt per part.
    pub prompts: Vec<String>,
}

impl RunScratch {
    /// Rebuilds scratch data from the artifacts of completed steps.
    #[must_use]
    pub fn restore(record: &JobRecord) -> Self {
        let completed_artifact = |stage: PipelineStage| {
            record
                .steps
                .get(&stage.step_name())
                .filter(|s| s.status == StepStatus::Complete)
                .and_then(|s| s.artifact.as_ref())
                .and_then(StepArtifact::as_text)
                .map(str::to_string)
        };

        let article_text = completed_artifact(PipelineStage::FetchContent);
        let prompts = completed_artifact(PipelineStage::Summarize)
            .and_then(|json| serde_json::from_str::<SummaryArtifact>(&json).ok())
            .map(|artifact| artifact.prompts)
            .unwrap_or_default();

        Self {
            article_text,
            prompts,
        }
    }
}

/// Collapses runs of whitespace into single spaces and trims the ends.
#[must_use]
pub fn clean_text(raw: &str) -> String {
    static WHITESPACE: OnceLock<Option<Regex>> = OnceLock::new();
    match WHITESPACE.get_or_init(|| Regex::new(r"\s+").ok()) {
        Some(re) => re.replace_all(raw, " ").trim().to_string(),
        None => raw.split_whitespace().collect::<Vec<_>>().join(" "),
    }
}

/// Runs the stages of a plan against one job.
#[derive(Clone)]
pub struct StageExecutor {
    tracker: StepTracker,
    collaborators: Collaborators,
    config: PipelineConfig,
    sink: std::sync::Arc<dyn EventSink>,
}

impl std::fmt::Debug for StageExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageExecutor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl StageExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(
        tracker: StepTracker,
        collaborators: Collaborators,
        config: PipelineConfig,
        sink: std::sync::Arc<dyn EventSink>,
    ) -> Self {
        Self {
            tracker,
            collaborators,
            config,
            sink,
        }
    }

    /// Returns the step tracker.
    #[must_use]
    pub fn tracker(&self) -> &StepTracker {
        &self.tracker
    }

    /// Returns the pipeline configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs one stage.
    pub async fn execute(
        &self,
        stage: PipelineStage,
        record: &JobRecord,
        scratch: &mut RunScratch,
    ) -> Result<StageOutcome> {
        let job_id = record.fingerprint.as_str();
        match stage {
            PipelineStage::CacheCheck => self.check_cache(job_id).await,
            PipelineStage::ValidateUrl => {
                self.validate_url(job_id, &record.source_url).await?;
                Ok(StageOutcome::Continue)
            }
            PipelineStage::FetchContent => {
                scratch.article_text = Some(self.fetch_content(job_id, &record.source_url).await?);
                Ok(StageOutcome::Continue)
            }
            PipelineStage::Summarize => {
                let text = scratch.article_text.as_deref().ok_or_else(|| {
                    ComicflowError::Internal("article text is unavailable for summarization".into())
                })?;
                scratch.prompts = self.summarize(job_id, record, text).await?;
                Ok(StageOutcome::Continue)
            }
            PipelineStage::GenerateImage { part } => {
                let prompt = scratch.prompts.get(part - 1).ok_or_else(|| {
                    ComicflowError::Internal(format!("no image prompt for part {part}"))
                })?;
                self.generate_image(job_id, record, part, prompt).await?;
                Ok(StageOutcome::Continue)
            }
            PipelineStage::Finalize => {
                self.finalize(job_id).await?;
                Ok(StageOutcome::Continue)
            }
        }
    }

    async fn check_cache(&self, job_id: &str) -> Result<StageOutcome> {
        let record = self
            .tracker
            .store()
            .get(job_id)
            .await?
            .ok_or_else(|| ComicflowError::NotFound(job_id.to_string()))?;

        if record.steps.all_complete() {
            self.tracker
                .complete(job_id, CACHE_CHECK_STEP, CACHE_HIT_DETAIL, None)
                .await?;
            self.sink
                .emit(&PipelineEvent::CacheHit {
                    job_id: job_id.to_string(),
                })
                .await;
            return Ok(StageOutcome::ShortCircuit);
        }

        self.tracker.start(job_id, CACHE_CHECK_STEP).await?;
        self.tracker
            .complete(job_id, CACHE_CHECK_STEP, CACHE_MISS_DETAIL, None)
            .await?;
        Ok(StageOutcome::Continue)
    }

    async fn validate_url(&self, job_id: &str, source_url: &str) -> Result<()> {
        let step = PipelineStage::ValidateUrl.step_name();
        self.tracker.start(job_id, &step).await?;

        let parsed = url::Url::parse(source_url)
            .map_err(|e| StageError::non_retriable(&step, format!("Invalid URL provided: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(StageError::non_retriable(
                &step,
                format!("Invalid URL provided: unsupported scheme '{}'", parsed.scheme()),
            )
            .into());
        }

        let response = self
            .collaborators
            .probe
            .probe(source_url)
            .await
            .map_err(|e| StageError::non_retriable(&step, e.to_string()))?;
        if !response.is_success() {
            return Err(StageError::non_retriable(
                &step,
                FetchError::Status {
                    status: response.status_code,
                    url: source_url.to_string(),
                }
                .to_string(),
            )
            .into());
        }
        if !response.is_html() {
            let content_type = response.content_type.unwrap_or_else(|| "no content type".into());
            return Err(StageError::non_retriable(
                &step,
                FetchError::UnsupportedContentType(content_type).to_string(),
            )
            .into());
        }

        self.tracker
            .complete(job_id, &step, URL_VALIDATED_DETAIL, None)
            .await?;
        Ok(())
    }

    async fn fetch_content(&self, job_id: &str, source_url: &str) -> Result<String> {
        let step = PipelineStage::FetchContent.step_name();
        self.tracker.start(job_id, &step).await?;

        let text = self
            .with_retry(job_id, &step, || self.fetch_once(&step, source_url))
            .await?;

        self.tracker
            .complete(
                job_id,
                &step,
                CONTENT_FETCHED_DETAIL,
                Some(StepArtifact::text(text.clone())),
            )
            .await?;
        info!(job_id = %job_id, chars = text.chars().count(), "Article fetched");
        Ok(text)
    }

    async fn fetch_once(&self, step: &str, source_url: &str) -> std::result::Result<String, StageError> {
        let raw = self
            .collaborators
            .fetcher
            .fetch(source_url)
            .await
            .map_err(|e| StageError::classified(step, e.class(), e.to_string()))?;
        let text = clean_text(&raw);
        if text.chars().count() < self.config.min_content_length {
            return Err(StageError::retriable(step, "Article content too short or invalid"));
        }
        Ok(text)
    }

    async fn summarize(&self, job_id: &str, record: &JobRecord, text: &str) -> Result<Vec<String>> {
        let step = PipelineStage::Summarize.step_name();
        self.tracker.start(job_id, &step).await?;

        let board = self
            .with_retry(job_id, &step, || self.summarize_once(&step, record, text))
            .await?;

        let artifact = serde_json::to_string_pretty(&SummaryArtifact::from_board(&board))?;
        let title = Some(board.title.trim().to_string()).filter(|t| !t.is_empty());
        let summaries = board.summaries();
        self.tracker
            .store()
            .update(
                job_id,
                Box::new(move |record: &mut JobRecord| {
                    record.title = title;
                    record.summaries = summaries;
                    Ok(())
                }),
            )
            .await?;

        self.tracker
            .complete(job_id, &step, SUMMARIZED_DETAIL, Some(StepArtifact::text(artifact)))
            .await?;
        Ok(board.prompts())
    }

    async fn summarize_once(
        &self,
        step: &str,
        record: &JobRecord,
        text: &str,
    ) -> std::result::Result<StoryBoard, StageError> {
        let classify = |e: GenerationError| StageError::classified(step, e.class(), e.to_string());
        let board = self
            .collaborators
            .generator
            .summarize(
                text,
                record.requested_part_count,
                record.summary_prompt_override.as_deref(),
            )
            .await
            .map_err(classify)?;

        if board.parts.len() != record.requested_part_count {
            return Err(classify(GenerationError::PartCountMismatch {
                expected: record.requested_part_count,
                actual: board.parts.len(),
            }));
        }
        for (index, part) in board.parts.iter().enumerate() {
            if part.summary.trim().chars().count() < self.config.min_summary_length {
                return Err(classify(GenerationError::DegenerateSummary { part: index + 1 }));
            }
            if part.prompt.trim().is_empty() {
                return Err(classify(GenerationError::EmptyPrompt { part: index + 1 }));
            }
        }
        Ok(board)
    }

    async fn generate_image(
        &self,
        job_id: &str,
        record: &JobRecord,
        part: usize,
        prompt: &str,
    ) -> Result<()> {
        let step = PipelineStage::GenerateImage { part }.step_name();
        self.tracker.start(job_id, &step).await?;

        let image = self
            .with_retry(job_id, &step, || self.generate_image_once(&step, record, prompt))
            .await?;

        let stored = image.clone();
        self.tracker
            .store()
            .update(
                job_id,
                Box::new(move |record: &mut JobRecord| {
                    record.image_refs.truncate(part - 1);
                    record.image_refs.push(stored);
                    Ok(())
                }),
            )
            .await?;

        self.tracker
            .complete(
                job_id,
                &step,
                IMAGE_GENERATED_DETAIL,
                Some(StepArtifact::image(image.as_str())),
            )
            .await?;
        Ok(())
    }

    async fn generate_image_once(
        &self,
        step: &str,
        record: &JobRecord,
        prompt: &str,
    ) -> std::result::Result<ImageRef, StageError> {
        let classify = |e: SynthesisError| StageError::classified(step, e.class(), e.to_string());
        let image = self
            .collaborators
            .synthesizer
            .synthesize(prompt, record.image_prompt_override.as_deref())
            .await
            .map_err(classify)?;

        if image.is_empty() {
            return Err(classify(SynthesisError::EmptyReference));
        }
        if image.is_inline() {
            return match image.decode_inline() {
                Some(bytes) if !bytes.is_empty() => Ok(image),
                _ => Err(classify(SynthesisError::Unresolvable(
                    "inline payload is empty or malformed".into(),
                ))),
            };
        }

        match self.collaborators.probe.probe(image.as_str()).await {
            Ok(response) if response.is_success() => Ok(image),
            Ok(response) => Err(classify(SynthesisError::Unresolvable(format!(
                "HTTP {}",
                response.status_code
            )))),
            Err(e) => Err(classify(SynthesisError::Unresolvable(e.to_string()))),
        }
    }

    async fn finalize(&self, job_id: &str) -> Result<()> {
        let step = PipelineStage::Finalize.step_name();
        self.tracker.start(job_id, &step).await?;

        let record = self
            .tracker
            .store()
            .get(job_id)
            .await?
            .ok_or_else(|| ComicflowError::NotFound(job_id.to_string()))?;
        if !record.results_complete() {
            return Err(StageError::non_retriable(
                &step,
                format!(
                    "Expected {} summaries and images but found {} and {}",
                    record.requested_part_count,
                    record.summaries.len(),
                    record.image_refs.len()
                ),
            )
            .into());
        }

        self.tracker
            .complete(job_id, &step, FINALIZED_DETAIL, None)
            .await?;
        Ok(())
    }

    async fn with_retry<T, F, Fut>(&self, job_id: &str, step: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, StageError>>,
    {
        let mut state = RetryState::new();
        loop {
            let error = match attempt().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            match should_retry(&mut state, &self.config.retry, &error) {
                RetryDecision::Retry { delay, detail } => {
                    warn!(
                        job_id = %job_id,
                        step = %step,
                        error = %error,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "{detail}"
                    );
                    self.tracker.retrying(job_id, step, detail).await?;
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp | RetryDecision::NotRetriable => return Err(error.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{MockLinkProbe, ProbeResponse};
    use crate::core::JobRequest;
    use crate::events::CollectingEventSink;
    use crate::pipeline::{initial_steps, RetryConfig};
    use crate::store::{InMemoryJobStore, JobStore};
    use crate::testing::{ScriptedFetcher, ScriptedGenerator, ScriptedSynthesizer};
    use std::sync::Arc;

    const ARTICLE: &str = "A long article about lighthouses and the keepers who tended them through \
        storms, fog and the slow decline of the profession as automation arrived on the coast.";

    async fn setup(probe: MockLinkProbe) -> (StageExecutor, JobRecord) {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let sink: Arc<dyn EventSink> = Arc::new(CollectingEventSink::new());
        let record = JobRecord::new(
            "job",
            &JobRequest::new("https://example.com/article", 1),
            initial_steps(1),
        );
        store.insert(record.clone()).await.unwrap();

        let collaborators = Collaborators::new(
            Arc::new(ScriptedFetcher::always(ARTICLE)),
            Arc::new(probe),
            Arc::new(ScriptedGenerator::new()),
            Arc::new(ScriptedSynthesizer::new()),
        );
        let config = PipelineConfig::new().with_retry(RetryConfig::immediate());
        let executor = StageExecutor::new(StepTracker::new(store, sink.clone()), collaborators, config, sink);
        (executor, record)
    }

    async fn stored(executor: &StageExecutor) -> JobRecord {
        executor.tracker().store().get("job").await.unwrap().unwrap()
    }

    #[test]
    fn test_clean_text_collapses_whitespace() {
        assert_eq!(clean_text("  a\n\n b\t c  "), "a b c");
    }

    #[test]
    fn test_scratch_restore_reads_artifacts() {
        let mut record = JobRecord::new("job", &JobRequest::new("https://e.com", 1), initial_steps(1));
        let fetch = PipelineStage::FetchContent.step_name();
        let summarize = PipelineStage::Summarize.step_name();
        let artifact = SummaryArtifact {
            summaries: vec!["summary one".into()],
            prompts: vec!["prompt one".into()],
        };
        record
            .steps
            .apply("job", &fetch, StepStatus::Complete, None, Some(StepArtifact::text(ARTICLE)))
            .unwrap();
        record
            .steps
            .apply(
                "job",
                &summarize,
                StepStatus::Complete,
                None,
                Some(StepArtifact::text(serde_json::to_string(&artifact).unwrap())),
            )
            .unwrap();

        let scratch = RunScratch::restore(&record);
        assert_eq!(scratch.article_text.as_deref(), Some(ARTICLE));
        assert_eq!(scratch.prompts, vec!["prompt one".to_string()]);
    }

    #[tokio::test]
    async fn test_validate_url_rejects_non_html() {
        let mut probe = MockLinkProbe::new();
        probe
            .expect_probe()
            .times(1)
            .returning(|_| Ok(ProbeResponse::new(200, Some("application/pdf"))));
        let (executor, record) = setup(probe).await;
        let mut scratch = RunScratch::default();

        let err = executor
            .execute(PipelineStage::ValidateUrl, &record, &mut scratch)
            .await
            .unwrap_err();

        assert!(!err.is_retriable());
        assert!(err.to_string().contains("URL must point to an HTML page"));
    }

    #[tokio::test]
    async fn test_validate_url_rejects_bad_scheme_without_probing() {
        let mut probe = MockLinkProbe::new();
        probe.expect_probe().times(0);
        let (executor, mut record) = setup(probe).await;
        record.source_url = "ftp://example.com/file".into();

        let err = executor
            .execute(PipelineStage::ValidateUrl, &record, &mut RunScratch::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unsupported scheme"));
    }

    #[tokio::test]
    async fn test_validate_url_accepts_html() {
        let mut probe = MockLinkProbe::new();
        probe
            .expect_probe()
            .returning(|_| Ok(ProbeResponse::new(200, Some("text/html; charset=utf-8"))));
        let (executor, record) = setup(probe).await;

        let outcome = executor
            .execute(PipelineStage::ValidateUrl, &record, &mut RunScratch::default())
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::Continue);
        let step = stored(&executor).await.steps.get("Validating URL").cloned().unwrap();
        assert_eq!(step.status, StepStatus::Complete);
        assert_eq!(step.detail.as_deref(), Some(URL_VALIDATED_DETAIL));
    }

    #[tokio::test]
    async fn test_fetch_content_records_artifact() {
        let (executor, record) = setup(MockLinkProbe::new()).await;
        let mut scratch = RunScratch::default();

        executor
            .execute(PipelineStage::FetchContent, &record, &mut scratch)
            .await
            .unwrap();

        assert_eq!(scratch.article_text.as_deref(), Some(clean_text(ARTICLE).as_str()));
        let step = stored(&executor)
            .await
            .steps
            .get("Downloading Article Content")
            .cloned()
            .unwrap();
        assert_eq!(step.detail.as_deref(), Some(CONTENT_FETCHED_DETAIL));
        assert!(matches!(step.artifact, Some(StepArtifact::Text(_))));
    }

    #[tokio::test]
    async fn test_image_probe_failure_is_retried() {
        let mut probe = MockLinkProbe::new();
        let mut calls = 0;
        probe.expect_probe().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Ok(ProbeResponse::new(404, None))
            } else {
                Ok(ProbeResponse::new(200, Some("image/png")))
            }
        });
        let (executor, record) = setup(probe).await;
        let mut scratch = RunScratch {
            article_text: None,
            prompts: vec!["a lighthouse at dusk".into()],
        };

        executor
            .execute(PipelineStage::GenerateImage { part: 1 }, &record, &mut scratch)
            .await
            .unwrap();

        let record = stored(&executor).await;
        assert_eq!(record.image_refs.len(), 1);
        let step = record.steps.get("Generating Image for Part 1").cloned().unwrap();
        assert_eq!(step.status, StepStatus::Complete);
    }

    #[tokio::test]
    async fn test_finalize_requires_all_results() {
        let (executor, record) = setup(MockLinkProbe::new()).await;

        let err = executor
            .execute(PipelineStage::Finalize, &record, &mut RunScratch::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Expected 1 summaries and images"));
    }
}
