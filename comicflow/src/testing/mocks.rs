//! Scripted collaborators for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

use crate::collaborators::{
    render_image_prompt, ContentGenerator, DocumentFetcher, ImageSynthesizer, LinkProbe,
    ProbeResponse, StoryBoard, StoryPart,
};
use crate::core::ImageRef;
use crate::errors::{FetchError, GenerationError, SynthesisError};

/// Shared bookkeeping: how many calls were made and how many of the first
/// calls should fail.
#[derive(Debug, Default)]
struct Script {
    calls: usize,
    failures: usize,
}

impl Script {
    /// Records a call and returns `(call_number, should_fail)`.
    fn next(&mut self) -> (usize, bool) {
        self.calls += 1;
        (self.calls, self.calls <= self.failures)
    }
}

async fn pause(delay: Option<Duration>) {
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
}

/// A fetcher that returns a fixed text, optionally after some failures.
#[derive(Debug)]
pub struct ScriptedFetcher {
    text: String,
    error: FetchError,
    script: Mutex<Script>,
    delay: Option<Duration>,
}

impl ScriptedFetcher {
    /// Returns `text` on every call.
    #[must_use]
    pub fn always(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            error: FetchError::Request("scripted fetch failure".into()),
            script: Mutex::new(Script::default()),
            delay: None,
        }
    }

    /// Fails the first `count` calls with `error`.
    #[must_use]
    pub fn with_failures(self, count: usize, error: FetchError) -> Self {
        self.script.lock().failures = count;
        Self { error, ..self }
    }

    /// Sleeps before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns the number of calls made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.script.lock().calls
    }
}

#[async_trait]
impl DocumentFetcher for ScriptedFetcher {
    async fn fetch(&self, _url: &str) -> Result<String, FetchError> {
        let (_, fail) = self.script.lock().next();
        pause(self.delay).await;
        if fail {
            return Err(self.error.clone());
        }
        Ok(self.text.clone())
    }
}

/// A probe answering every URL with the same response, unless overridden.
#[derive(Debug)]
pub struct StaticProbe {
    default: ProbeResponse,
    overrides: HashMap<String, Result<ProbeResponse, FetchError>>,
    calls: Mutex<Vec<String>>,
}

impl StaticProbe {
    /// Answers `200 text/html` for every URL.
    #[must_use]
    pub fn html() -> Self {
        Self::new(ProbeResponse::new(200, Some("text/html; charset=utf-8")))
    }

    /// Answers `response` for every URL.
    #[must_use]
    pub fn new(response: ProbeResponse) -> Self {
        Self {
            default: response,
            overrides: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answers `result` for one URL.
    #[must_use]
    pub fn with_response(
        mut self,
        url: impl Into<String>,
        result: Result<ProbeResponse, FetchError>,
    ) -> Self {
        self.overrides.insert(url.into(), result);
        self
    }

    /// Returns every probed URL, in order.
    #[must_use]
    pub fn probed(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl LinkProbe for StaticProbe {
    async fn probe(&self, url: &str) -> Result<ProbeResponse, FetchError> {
        self.calls.lock().push(url.to_string());
        self.overrides
            .get(url)
            .cloned()
            .unwrap_or_else(|| Ok(self.default.clone()))
    }
}

/// A content generator producing a well formed story board for any part
/// count, optionally after some failures.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    board: Option<StoryBoard>,
    script: Mutex<Script>,
    overrides: Mutex<Vec<Option<String>>>,
    delay: Option<Duration>,
}

impl ScriptedGenerator {
    /// Generates a valid board on every call.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the first `count` calls with a transient error.
    #[must_use]
    pub fn failing(count: usize) -> Self {
        let generator = Self::default();
        generator.script.lock().failures = count;
        generator
    }

    /// Returns `board` on every call, whatever the requested part count.
    #[must_use]
    pub fn with_board(mut self, board: StoryBoard) -> Self {
        self.board = Some(board);
        self
    }

    /// Sleeps before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns the number of calls made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.script.lock().calls
    }

    /// Returns the prompt override passed to each call.
    #[must_use]
    pub fn seen_overrides(&self) -> Vec<Option<String>> {
        self.overrides.lock().clone()
    }

    /// Builds the board generated for `part_count` parts.
    #[must_use]
    pub fn board_for(part_count: usize) -> StoryBoard {
        StoryBoard {
            title: "The Scripted Story".to_string(),
            parts: (1..=part_count)
                .map(|i| StoryPart {
                    summary: format!("Summary of part {i}, in which things happen."),
                    prompt: format!("Panel {i}: a lighthouse keeper in ink wash style"),
                })
                .collect(),
        }
    }
}

#[async_trait]
impl ContentGenerator for ScriptedGenerator {
    async fn summarize(
        &self,
        _text: &str,
        part_count: usize,
        prompt_override: Option<&str>,
    ) -> Result<StoryBoard, GenerationError> {
        let (_, fail) = self.script.lock().next();
        self.overrides.lock().push(prompt_override.map(str::to_string));
        pause(self.delay).await;
        if fail {
            return Err(GenerationError::Request("scripted generation failure".into()));
        }
        Ok(self
            .board
            .clone()
            .unwrap_or_else(|| Self::board_for(part_count)))
    }
}

/// An image synthesizer returning numbered references.
#[derive(Debug, Default)]
pub struct ScriptedSynthesizer {
    inline: bool,
    script: Mutex<Script>,
    prompts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl ScriptedSynthesizer {
    /// Returns `https://images.example.com/<n>.png` for the n-th call.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns inline `data:` references instead of URLs.
    #[must_use]
    pub fn inline() -> Self {
        Self {
            inline: true,
            ..Self::default()
        }
    }

    /// Fails the first `count` calls with a transient error.
    #[must_use]
    pub fn with_failures(self, count: usize) -> Self {
        self.script.lock().failures = count;
        self
    }

    /// Sleeps before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns the number of calls made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.script.lock().calls
    }

    /// Returns the rendered prompt of each call.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl ImageSynthesizer for ScriptedSynthesizer {
    async fn synthesize(
        &self,
        prompt: &str,
        prompt_override: Option<&str>,
    ) -> Result<ImageRef, SynthesisError> {
        let (call, fail) = self.script.lock().next();
        self.prompts
            .lock()
            .push(render_image_prompt(prompt_override, prompt));
        pause(self.delay).await;
        if fail {
            return Err(SynthesisError::Request("scripted synthesis failure".into()));
        }
        if self.inline {
            return Ok(ImageRef::inline("image/png", format!("png-{call}").as_bytes()));
        }
        Ok(ImageRef::new(format!("https://images.example.com/{call}.png")))
    }
}
