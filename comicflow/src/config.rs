//! Configuration types for the service, the pipeline and the collaborators.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{ComicflowError, Result};
use crate::pipeline::RetryConfig;

/// Environment variable holding the admin secret used by deletion.
pub const ADMIN_SECRET_ENV: &str = "COMICFLOW_ADMIN_SECRET";
/// Environment variable overriding the per-stage timeout, in seconds.
pub const STAGE_TIMEOUT_ENV: &str = "COMICFLOW_STAGE_TIMEOUT_SECS";
/// Environment variable holding the generation API key.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
/// Environment variable overriding the generation API base URL.
pub const OPENAI_BASE_URL_ENV: &str = "OPENAI_BASE_URL";

/// Top level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Pipeline behavior.
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Document fetching.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Generation API access.
    #[serde(default)]
    pub openai: OpenAiConfig,
    /// Shared secret required to delete jobs. Deletion is refused when unset.
    #[serde(default)]
    pub admin_secret: Option<String>,
    /// Largest accepted part count.
    #[serde(default = "default_max_parts")]
    pub max_parts: usize,
    /// Default size of the recent jobs listing.
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,
}

fn default_max_parts() -> usize {
    10
}

fn default_recent_limit() -> usize {
    20
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            fetch: FetchConfig::default(),
            openai: OpenAiConfig::default(),
            admin_secret: None,
            max_parts: default_max_parts(),
            recent_limit: default_recent_limit(),
        }
    }
}

impl ServiceConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a configuration from defaults overlaid with environment
    /// variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self {
            openai: OpenAiConfig::from_env(),
            ..Self::default()
        };
        if let Some(secret) = env_var(ADMIN_SECRET_ENV) {
            config.admin_secret = Some(secret);
        }
        if let Some(raw) = env_var(STAGE_TIMEOUT_ENV) {
            let seconds: f64 = raw.parse().map_err(|_| {
                ComicflowError::invalid_input(format!("{STAGE_TIMEOUT_ENV} must be a number, got '{raw}'"))
            })?;
            config.pipeline = config.pipeline.with_stage_timeout(seconds);
        }
        Ok(config)
    }

    /// Sets the pipeline configuration.
    #[must_use]
    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Sets the admin secret.
    #[must_use]
    pub fn with_admin_secret(mut self, secret: impl Into<String>) -> Self {
        self.admin_secret = Some(secret.into());
        self
    }

    /// Sets the largest accepted part count.
    #[must_use]
    pub fn with_max_parts(mut self, max_parts: usize) -> Self {
        self.max_parts = max_parts;
        self
    }
}

/// Pipeline behavior shared by every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Retry policy of the fetch, summarize and image stages.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Upper bound on one stage invocation, retries included.
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_seconds: f64,
    /// Shortest accepted article text, in characters.
    #[serde(default = "default_min_content_length")]
    pub min_content_length: usize,
    /// Shortest accepted part summary, in characters.
    #[serde(default = "default_min_summary_length")]
    pub min_summary_length: usize,
}

fn default_stage_timeout() -> f64 {
    300.0
}

fn default_min_content_length() -> usize {
    100
}

fn default_min_summary_length() -> usize {
    10
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            stage_timeout_seconds: default_stage_timeout(),
            min_content_length: default_min_content_length(),
            min_summary_length: default_min_summary_length(),
        }
    }
}

impl PipelineConfig {
    /// Creates a pipeline configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-stage timeout.
    #[must_use]
    pub fn with_stage_timeout(mut self, seconds: f64) -> Self {
        self.stage_timeout_seconds = seconds;
        self
    }

    /// Sets the minimum article length.
    #[must_use]
    pub fn with_min_content_length(mut self, chars: usize) -> Self {
        self.min_content_length = chars;
        self
    }

    /// Gets the stage timeout as a Duration.
    ///
    /// Non-finite or negative values fall back to the default.
    #[must_use]
    pub fn stage_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.stage_timeout_seconds)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_stage_timeout()))
    }
}

/// Configuration for document fetching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Request timeout in seconds.
    #[serde(default = "default_fetch_timeout")]
    pub timeout_seconds: f64,
    /// User agent string.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Maximum response size in bytes.
    #[serde(default = "default_max_size")]
    pub max_response_size: usize,
}

fn default_fetch_timeout() -> f64 {
    30.0
}

fn default_user_agent() -> String {
    concat!("comicflow/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_max_size() -> usize {
    10 * 1024 * 1024 // 10MB
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_fetch_timeout(),
            user_agent: default_user_agent(),
            max_response_size: default_max_size(),
        }
    }
}

impl FetchConfig {
    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Sets the user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Gets timeout as Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_seconds)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_fetch_timeout()))
    }
}

/// Access to the chat and image generation API.
#[derive(Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// API key; generation fails as misconfigured when absent.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// API base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model used for summaries and prompts.
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    /// Model used for images.
    #[serde(default = "default_image_model")]
    pub image_model: String,
    /// Requested image size.
    #[serde(default = "default_image_size")]
    pub image_size: String,
    /// Request timeout in seconds.
    #[serde(default = "default_api_timeout")]
    pub timeout_seconds: f64,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o".to_string()
}

fn default_image_model() -> String {
    "dall-e-3".to_string()
}

fn default_image_size() -> String {
    "1024x1024".to_string()
}

fn default_api_timeout() -> f64 {
    120.0
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("chat_model", &self.chat_model)
            .field("image_model", &self.image_model)
            .field("image_size", &self.image_size)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            chat_model: default_chat_model(),
            image_model: default_image_model(),
            image_size: default_image_size(),
            timeout_seconds: default_api_timeout(),
        }
    }
}

impl OpenAiConfig {
    /// Reads the API key and base URL from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            api_key: env_var(OPENAI_API_KEY_ENV),
            base_url: env_var(OPENAI_BASE_URL_ENV).unwrap_or_else(default_base_url),
            ..Self::default()
        }
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Returns the endpoint URL for an API path.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Gets timeout as Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_seconds)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_api_timeout()))
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
