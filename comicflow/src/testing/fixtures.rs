//! Fixtures for service level tests.

use std::sync::Arc;
use std::time::Duration;

use super::mocks::{ScriptedFetcher, ScriptedGenerator, ScriptedSynthesizer, StaticProbe};
use crate::collaborators::Collaborators;
use crate::config::{PipelineConfig, ServiceConfig};
use crate::core::JobView;
use crate::errors::{ComicflowError, Result};
use crate::events::CollectingEventSink;
use crate::pipeline::RetryConfig;
use crate::service::ComicService;
use crate::store::{InMemoryJobStore, JobStore};

/// An article long enough to pass the content length check.
pub const SAMPLE_ARTICLE: &str = "The last lighthouse keeper of the northern cape kept a logbook \
for thirty-one years. Every night he wrote down the weather, the ships he saw, and the state of \
the lamp. When the light was automated he handed the logbook to the town library, where it now \
sits in a glass case next to the brass key of the tower.";

/// A service wired to scripted collaborators, an in-memory store and a
/// collecting event sink.
#[derive(Debug)]
pub struct TestHarness {
    /// The service under test.
    pub service: ComicService,
    /// The backing store.
    pub store: Arc<InMemoryJobStore>,
    /// Every emitted event.
    pub sink: Arc<CollectingEventSink>,
    /// The document fetcher.
    pub fetcher: Arc<ScriptedFetcher>,
    /// The link probe.
    pub probe: Arc<StaticProbe>,
    /// The content generator.
    pub generator: Arc<ScriptedGenerator>,
    /// The image synthesizer.
    pub synthesizer: Arc<ScriptedSynthesizer>,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    /// Admin secret configured by [`TestHarness::new`].
    pub const ADMIN_SECRET: &'static str = "let-me-in";

    /// Creates a harness whose collaborators always succeed and whose
    /// retries do not wait.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Self::default_config())
    }

    /// Creates a harness with a custom configuration.
    #[must_use]
    pub fn with_config(config: ServiceConfig) -> Self {
        Self::from_parts(
            ScriptedFetcher::always(SAMPLE_ARTICLE),
            StaticProbe::html(),
            ScriptedGenerator::new(),
            ScriptedSynthesizer::new(),
            config,
        )
    }

    /// The configuration used by [`TestHarness::new`].
    #[must_use]
    pub fn default_config() -> ServiceConfig {
        ServiceConfig::default()
            .with_admin_secret(Self::ADMIN_SECRET)
            .with_pipeline(PipelineConfig::default().with_retry(RetryConfig::immediate()))
    }

    /// Creates a harness from explicit collaborators.
    #[must_use]
    pub fn from_parts(
        fetcher: ScriptedFetcher,
        probe: StaticProbe,
        generator: ScriptedGenerator,
        synthesizer: ScriptedSynthesizer,
        config: ServiceConfig,
    ) -> Self {
        let store = Arc::new(InMemoryJobStore::new());
        let sink = Arc::new(CollectingEventSink::new());
        let fetcher = Arc::new(fetcher);
        let probe = Arc::new(probe);
        let generator = Arc::new(generator);
        let synthesizer = Arc::new(synthesizer);

        let collaborators = Collaborators::new(
            fetcher.clone(),
            probe.clone(),
            generator.clone(),
            synthesizer.clone(),
        );
        let service = ComicService::new(store.clone(), collaborators, config, sink.clone());

        Self {
            service,
            store,
            sink,
            fetcher,
            probe,
            generator,
            synthesizer,
        }
    }

    /// Returns the store as a trait object.
    #[must_use]
    pub fn job_store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }
}

/// Polls a job until it succeeds or fails.
///
/// Fails with `Internal` if the job is still running after `limit`.
pub async fn wait_for_terminal(service: &ComicService, job_id: &str, limit: Duration) -> Result<JobView> {
    let poll = async {
        loop {
            let view = service.status(job_id).await?;
            if view.state.is_terminal() {
                return Ok(view);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(limit, poll)
        .await
        .map_err(|_| ComicflowError::Internal(format!("job {job_id} did not finish within {limit:?}")))?
}
