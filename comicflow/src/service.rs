//! The job-facing service: submission, polling, regeneration and
//! administration.
//!
//! Runs are spawned onto the tokio runtime and never block the caller.
//! The service keeps a registry of the runs it launched so that a job is
//! never driven by two runs of the same process at once.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::collaborators::{Collaborators, DefaultPrompts};
use crate::config::ServiceConfig;
use crate::core::{
    JobRecord, JobRequest, JobState, JobSummary, JobView, StepStatus, CACHE_HIT_DETAIL,
};
use crate::errors::{ComicflowError, Result};
use crate::events::{EventSink, PipelineEvent};
use crate::fingerprint::fingerprint_request;
use crate::pipeline::{initial_steps, reset_job, Orchestrator, CACHE_CHECK_STEP};
use crate::store::JobStore;

/// Answer to a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    /// The job identifier to poll.
    pub job_id: String,
    /// True if this submission created the job and launched its run.
    pub created: bool,
}

/// Entry point for clients of the pipeline.
#[derive(Clone)]
pub struct ComicService {
    store: Arc<dyn JobStore>,
    orchestrator: Orchestrator,
    sink: Arc<dyn EventSink>,
    config: ServiceConfig,
    prompts: DefaultPrompts,
    active: Arc<DashMap<String, u64>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    next_token: Arc<AtomicU64>,
}

impl std::fmt::Debug for ComicService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComicService")
            .field("config", &self.config)
            .field("active_runs", &self.active.len())
            .finish_non_exhaustive()
    }
}

impl ComicService {
    /// Creates a service over a store and a set of collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn JobStore>,
        collaborators: Collaborators,
        config: ServiceConfig,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let orchestrator = Orchestrator::new(
            store.clone(),
            collaborators,
            config.pipeline.clone(),
            sink.clone(),
        );
        Self {
            store,
            orchestrator,
            sink,
            config,
            prompts: DefaultPrompts::default(),
            active: Arc::new(DashMap::new()),
            tasks: Arc::new(Mutex::new(Vec::new())),
            next_token: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Creates a service backed by the HTTP fetcher and the OpenAI
    /// generator and synthesizer.
    #[cfg(feature = "http")]
    pub fn with_http_collaborators(
        store: Arc<dyn JobStore>,
        config: ServiceConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        use crate::collaborators::{HttpFetcher, OpenAiContentGenerator, OpenAiImageSynthesizer};

        let fetcher = Arc::new(HttpFetcher::new(config.fetch.clone()).map_err(|e| {
            ComicflowError::Internal(format!("failed to build HTTP client: {e}"))
        })?);
        let collaborators = Collaborators::new(
            fetcher.clone(),
            fetcher,
            Arc::new(OpenAiContentGenerator::new(config.openai.clone()).map_err(|e| {
                ComicflowError::Internal(format!("failed to build generator client: {e}"))
            })?),
            Arc::new(OpenAiImageSynthesizer::new(config.openai.clone()).map_err(|e| {
                ComicflowError::Internal(format!("failed to build image client: {e}"))
            })?),
        );
        Ok(Self::new(store, collaborators, config, sink))
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Returns the store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Submits a request and returns its job id.
    ///
    /// Identical requests share one job: a repeated submission returns the
    /// existing id and launches nothing. Resubmitting a completed job marks
    /// it as served from cache.
    pub async fn submit(&self, request: JobRequest) -> Result<SubmitReceipt> {
        let request = self.validate(request)?;
        let job_id = fingerprint_request(&request);

        let record = JobRecord::new(
            job_id.clone(),
            &request,
            initial_steps(request.requested_part_count),
        );
        if self.store.insert(record).await? {
            info!(job_id = %job_id, url = %request.source_url, parts = request.requested_part_count, "Job created");
            let token = self.reserve(&job_id)?;
            self.launch(job_id.clone(), token);
            return Ok(SubmitReceipt {
                job_id,
                created: true,
            });
        }

        debug!(job_id = %job_id, "Duplicate submission");
        self.mark_cache_hit(&job_id).await?;
        Ok(SubmitReceipt {
            job_id,
            created: false,
        })
    }

    /// Returns the job with its full step history.
    pub async fn status(&self, job_id: &str) -> Result<JobView> {
        self.store
            .get(job_id)
            .await?
            .map(JobView::from)
            .ok_or_else(|| ComicflowError::NotFound(job_id.to_string()))
    }

    /// Resets a job and launches a new run for it.
    ///
    /// Fails with `AlreadyRunning` while a run launched by this service is
    /// still driving the job.
    pub async fn regenerate(&self, job_id: &str) -> Result<()> {
        let token = self.reserve(job_id)?;
        match reset_job(self.store.as_ref(), job_id).await {
            Ok(_) => {
                info!(job_id = %job_id, "Job regeneration started");
                self.launch(job_id.to_string(), token);
                Ok(())
            }
            Err(e) => {
                self.release(job_id, token);
                Err(e)
            }
        }
    }

    /// Deletes a job. Requires the configured admin secret.
    pub async fn delete(&self, job_id: &str, secret: &str) -> Result<()> {
        match self.config.admin_secret.as_deref() {
            Some(expected) if expected == secret => {}
            _ => {
                warn!(job_id = %job_id, "Rejected delete with wrong secret");
                return Err(ComicflowError::Unauthorized);
            }
        }
        if !self.store.delete(job_id).await? {
            return Err(ComicflowError::NotFound(job_id.to_string()));
        }
        info!(job_id = %job_id, "Job deleted");
        Ok(())
    }

    /// Lists the most recent jobs, newest first.
    ///
    /// `None` uses the configured default limit.
    pub async fn recent(&self, limit: Option<usize>) -> Result<Vec<JobSummary>> {
        let limit = limit.unwrap_or(self.config.recent_limit);
        let records = self.store.list_recent(limit).await?;
        Ok(records.iter().map(JobRecord::summary).collect())
    }

    /// Returns the prompt templates used when a request has no overrides.
    #[must_use]
    pub fn default_prompts(&self) -> DefaultPrompts {
        self.prompts.clone()
    }

    /// Launches runs for stored jobs that are neither finished nor failed
    /// and have no run in this process, e.g. after a restart.
    ///
    /// Returns the ids of the resumed jobs.
    pub async fn resume_interrupted(&self) -> Result<Vec<String>> {
        let records = self.store.list_recent(usize::MAX).await?;
        let mut resumed = Vec::new();
        for record in records {
            if record.steps.is_empty() {
                warn!(job_id = %record.fingerprint, "Not resuming record without steps");
                continue;
            }
            if !matches!(record.state(), JobState::Pending | JobState::Running) {
                continue;
            }
            let Ok(token) = self.reserve(&record.fingerprint) else {
                continue;
            };
            info!(job_id = %record.fingerprint, "Resuming interrupted job");
            self.launch(record.fingerprint.clone(), token);
            resumed.push(record.fingerprint);
        }
        Ok(resumed)
    }

    /// Returns true while a run launched by this service drives the job.
    #[must_use]
    pub fn is_running(&self, job_id: &str) -> bool {
        self.active.contains_key(job_id)
    }

    /// Waits until every launched run has finished.
    pub async fn wait_idle(&self) {
        loop {
            let handles: Vec<_> = self.tasks.lock().drain(..).collect();
            if handles.is_empty() {
                return;
            }
            for result in futures::future::join_all(handles).await {
                if let Err(e) = result {
                    error!(error = %e, "Pipeline task panicked or was cancelled");
                }
            }
        }
    }

    fn validate(&self, request: JobRequest) -> Result<JobRequest> {
        let source_url = request.source_url.trim().to_string();
        if source_url.is_empty() {
            return Err(ComicflowError::invalid_input("URL is required"));
        }
        let parsed = url::Url::parse(&source_url)
            .map_err(|e| ComicflowError::invalid_input(format!("Invalid URL '{source_url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ComicflowError::invalid_input(format!(
                "URL must use http or https, got '{}'",
                parsed.scheme()
            )));
        }

        let parts = request.requested_part_count;
        if parts == 0 || parts > self.config.max_parts {
            return Err(ComicflowError::invalid_input(format!(
                "Number of parts must be between 1 and {}, got {parts}",
                self.config.max_parts
            )));
        }

        let non_empty = |s: Option<String>| s.filter(|p| !p.trim().is_empty());
        Ok(JobRequest {
            source_url,
            requested_part_count: parts,
            summary_prompt_override: non_empty(request.summary_prompt_override),
            image_prompt_override: non_empty(request.image_prompt_override),
        })
    }

    async fn mark_cache_hit(&self, job_id: &str) -> Result<()> {
        let updated = self
            .store
            .update(
                job_id,
                Box::new(|record: &mut JobRecord| {
                    if record.steps.all_complete() {
                        let fingerprint = record.fingerprint.clone();
                        record.steps.apply(
                            &fingerprint,
                            CACHE_CHECK_STEP,
                            StepStatus::Complete,
                            Some(CACHE_HIT_DETAIL.to_string()),
                            None,
                        )?;
                    }
                    Ok(())
                }),
            )
            .await?;

        if updated.from_cache() {
            self.sink
                .emit(&PipelineEvent::CacheHit {
                    job_id: job_id.to_string(),
                })
                .await;
        }
        Ok(())
    }

    fn reserve(&self, job_id: &str) -> Result<u64> {
        match self.active.entry(job_id.to_string()) {
            Entry::Occupied(_) => Err(ComicflowError::AlreadyRunning(job_id.to_string())),
            Entry::Vacant(slot) => {
                let token = self.next_token.fetch_add(1, Ordering::Relaxed);
                slot.insert(token);
                Ok(token)
            }
        }
    }

    fn release(&self, job_id: &str, token: u64) {
        self.active.remove_if(job_id, |_, held| *held == token);
    }

    fn launch(&self, job_id: String, token: u64) {
        let orchestrator = self.orchestrator.clone();
        let active = self.active.clone();

        let handle = tokio::spawn(async move {
            match orchestrator.run(&job_id).await {
                Ok(report) if report.is_success() => {
                    debug!(job_id = %job_id, run_id = %report.run_id, "Run finished");
                }
                Ok(report) => {
                    debug!(job_id = %job_id, run_id = %report.run_id, error = ?report.error, "Run ended in failure");
                }
                Err(e) => error!(job_id = %job_id, error = %e, "Run aborted"),
            }
            active.remove_if(&job_id, |_, held| *held == token);
        });

        let mut tasks = self.tasks.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestHarness;

    fn request() -> JobRequest {
        JobRequest::new("https://example.com/story", 2)
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_input() {
        let harness = TestHarness::new();

        for bad in ["", "not a url", "ftp://example.com/file", "mailto:someone@example.com"] {
            let err = harness.service.submit(JobRequest::new(bad, 2)).await.unwrap_err();
            assert!(matches!(err, ComicflowError::InvalidInput(_)), "{bad}");
        }
        for parts in [0, 11] {
            let err = harness
                .service
                .submit(JobRequest::new("https://example.com/a", parts))
                .await
                .unwrap_err();
            assert!(matches!(err, ComicflowError::InvalidInput(_)));
        }
        assert!(harness.service.recent(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_overrides_share_a_job_with_none() {
        let harness = TestHarness::new();
        let a = harness.service.submit(request()).await.unwrap();
        let b = harness
            .service
            .submit(request().with_summary_prompt("   "))
            .await
            .unwrap();

        assert_eq!(a.job_id, b.job_id);
        assert!(a.created);
        assert!(!b.created);
        harness.service.wait_idle().await;
    }

    #[tokio::test]
    async fn test_status_unknown_job() {
        let harness = TestHarness::new();
        let err = harness.service.status("0123456789abcdef0123456789abcdef").await.unwrap_err();
        assert!(matches!(err, ComicflowError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_requires_secret() {
        let harness = TestHarness::new();
        let receipt = harness.service.submit(request()).await.unwrap();
        harness.service.wait_idle().await;

        let err = harness.service.delete(&receipt.job_id, "wrong").await.unwrap_err();
        assert!(matches!(err, ComicflowError::Unauthorized));

        harness
            .service
            .delete(&receipt.job_id, TestHarness::ADMIN_SECRET)
            .await
            .unwrap();
        assert!(matches!(
            harness.service.status(&receipt.job_id).await,
            Err(ComicflowError::NotFound(_))
        ));
        assert!(matches!(
            harness.service.delete(&receipt.job_id, TestHarness::ADMIN_SECRET).await,
            Err(ComicflowError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_disabled_without_secret() {
        let harness = TestHarness::with_config(ServiceConfig::default());
        let receipt = harness.service.submit(request()).await.unwrap();
        harness.service.wait_idle().await;

        let err = harness.service.delete(&receipt.job_id, "").await.unwrap_err();
        assert!(matches!(err, ComicflowError::Unauthorized));
    }

    #[tokio::test]
    async fn test_regenerate_unknown_job_releases_reservation() {
        let harness = TestHarness::new();
        let err = harness.service.regenerate("missing").await.unwrap_err();
        assert!(matches!(err, ComicflowError::NotFound(_)));
        assert!(!harness.service.is_running("missing"));
    }

    #[tokio::test]
    async fn test_recent_lists_newest_first() {
        let harness = TestHarness::new();
        let first = harness.service.submit(JobRequest::new("https://example.com/1", 1)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = harness.service.submit(JobRequest::new("https://example.com/2", 1)).await.unwrap();
        harness.service.wait_idle().await;

        let recent = harness.service.recent(None).await.unwrap();
        let ids: Vec<_> = recent.iter().map(|s| s.job_id.as_str()).collect();
        assert_eq!(ids, vec![second.job_id.as_str(), first.job_id.as_str()]);
        assert!(recent.iter().all(|s| s.state == JobState::Succeeded));
        assert_eq!(recent[0].title.as_deref(), Some("The Scripted Story"));

        assert_eq!(harness.service.recent(Some(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_default_prompts() {
        let harness = TestHarness::new();
        let prompts = harness.service.default_prompts();
        assert!(prompts.summary.contains("${numParts}"));
        assert!(prompts.image.contains("${prompt}"));
    }
}
