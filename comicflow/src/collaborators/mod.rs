//! Ports for the external services the pipeline depends on.
//!
//! Every collaborator is a trait object injected at construction time, so
//! the orchestrator can be driven by the HTTP implementations in
//! production and by scripted fakes in tests.

#[cfg(feature = "http")]
mod http;
#[cfg(feature = "http")]
mod openai;
mod prompts;

#[cfg(feature = "http")]
pub use http::{extract_article_text, HttpFetcher};
#[cfg(feature = "http")]
pub use openai::{parse_image_response, parse_story_board, OpenAiContentGenerator, OpenAiImageSynthesizer};
pub use prompts::{render_image_prompt, render_summary_prompt, DefaultPrompts, DEFAULT_IMAGE_PROMPT, DEFAULT_SUMMARY_PROMPT};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::ImageRef;
use crate::errors::{FetchError, GenerationError, SynthesisError};

/// Result of a lightweight HEAD-style probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Content type from headers.
    pub content_type: Option<String>,
}

impl ProbeResponse {
    /// Creates a probe response.
    #[must_use]
    pub fn new(status_code: u16, content_type: Option<&str>) -> Self {
        Self {
            status_code,
            content_type: content_type.map(str::to_string),
        }
    }

    /// Whether the response is HTML.
    #[must_use]
    pub fn is_html(&self) -> bool {
        self.content_type
            .as_ref()
            .is_some_and(|ct| ct.contains("text/html") || ct.contains("application/xhtml"))
    }

    /// Whether the probe was successful (2xx status).
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// One part of a generated story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryPart {
    /// Narrative summary of the part.
    pub summary: String,
    /// Prompt for the part's illustration.
    pub prompt: String,
}

/// Structured decomposition of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryBoard {
    /// Title for the whole story.
    #[serde(default)]
    pub title: String,
    /// Parts, in reading order.
    pub parts: Vec<StoryPart>,
}

impl StoryBoard {
    /// Returns the summaries, in order.
    #[must_use]
    pub fn summaries(&self) -> Vec<String> {
        self.parts.iter().map(|p| p.summary.clone()).collect()
    }

    /// Returns the image prompts, in order.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.parts.iter().map(|p| p.prompt.clone()).collect()
    }
}

/// Fetches a document and returns its extracted plain text.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    /// Fetches `url` and returns the readable text.
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Performs a lightweight reachability check on a URL.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LinkProbe: Send + Sync {
    /// Issues a HEAD-style request for `url`.
    async fn probe(&self, url: &str) -> Result<ProbeResponse, FetchError>;
}

/// Derives a titled, part-by-part decomposition of a text.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Splits `text` into `part_count` parts, each with a summary and an
    /// illustration prompt.
    async fn summarize(
        &self,
        text: &str,
        part_count: usize,
        prompt_override: Option<&str>,
    ) -> Result<StoryBoard, GenerationError>;
}

/// Produces an image from a prompt.
#[async_trait]
pub trait ImageSynthesizer: Send + Sync {
    /// Synthesizes one image.
    async fn synthesize(
        &self,
        prompt: &str,
        prompt_override: Option<&str>,
    ) -> Result<ImageRef, SynthesisError>;
}

/// The set of collaborators a pipeline run needs.
#[derive(Clone)]
pub struct Collaborators {
    /// Document fetcher.
    pub fetcher: Arc<dyn DocumentFetcher>,
    /// Reachability probe used for URL validation and image checks.
    pub probe: Arc<dyn LinkProbe>,
    /// Structured content generator.
    pub generator: Arc<dyn ContentGenerator>,
    /// Image synthesizer.
    pub synthesizer: Arc<dyn ImageSynthesizer>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

impl Collaborators {
    /// Bundles collaborators.
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn DocumentFetcher>,
        probe: Arc<dyn LinkProbe>,
        generator: Arc<dyn ContentGenerator>,
        synthesizer: Arc<dyn ImageSynthesizer>,
    ) -> Self {
        Self {
            fetcher,
            probe,
            generator,
            synthesizer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_response_is_html() {
        assert!(ProbeResponse::new(200, Some("text/html; charset=utf-8")).is_html());
        assert!(ProbeResponse::new(200, Some("application/xhtml+xml")).is_html());
        assert!(!ProbeResponse::new(200, Some("application/pdf")).is_html());
        assert!(!ProbeResponse::new(200, None).is_html());
    }

    #[test]
    fn test_probe_response_is_success() {
        assert!(ProbeResponse::new(204, None).is_success());
        assert!(!ProbeResponse::new(301, None).is_success());
        assert!(!ProbeResponse::new(404, None).is_success());
    }

    #[test]
    fn test_story_board_accessors() {
        let board = StoryBoard {
            title: "T".into(),
            parts: vec![
                StoryPart { summary: "s1".into(), prompt: "p1".into() },
                StoryPart { summary: "s2".into(), prompt: "p2".into() },
            ],
        };
        assert_eq!(board.summaries(), vec!["s1", "s2"]);
        assert_eq!(board.prompts(), vec!["p1", "p2"]);
    }
}
