//! Content generation and image synthesis over the OpenAI HTTP API.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::prompts::{render_image_prompt, render_summary_prompt};
use super::{ContentGenerator, ImageSynthesizer, StoryBoard};
use crate::config::OpenAiConfig;
use crate::core::ImageRef;
use crate::errors::{GenerationError, SynthesisError};

/// Mime type assumed for base64 image payloads.
const INLINE_IMAGE_MIME: &str = "image/png";

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    url: Option<String>,
    b64_json: Option<String>,
}

fn build_client(config: &OpenAiConfig) -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .timeout(config.timeout())
        .build()
        .map_err(|e| e.to_string())
}

/// Sends an authenticated JSON POST and returns the status and body.
async fn post_json(
    client: &reqwest::Client,
    config: &OpenAiConfig,
    path: &str,
    body: &serde_json::Value,
) -> Result<(u16, String), String> {
    let api_key = config.api_key.as_deref().unwrap_or_default();
    let response = client
        .post(config.endpoint(path))
        .bearer_auth(api_key)
        .json(body)
        .send()
        .await
        .map_err(|e| e.to_string())?;
    let status = response.status().as_u16();
    let text = response.text().await.map_err(|e| e.to_string())?;
    Ok((status, text))
}

/// Parses the JSON document produced by the chat model.
pub fn parse_story_board(content: &str) -> Result<StoryBoard, GenerationError> {
    serde_json::from_str(content)
        .map_err(|e| GenerationError::MalformedResponse(format!("invalid story board JSON: {e}")))
}

/// Extracts the image reference from an image generation response body.
pub fn parse_image_response(body: &str) -> Result<ImageRef, SynthesisError> {
    let response: ImageResponse =
        serde_json::from_str(body).map_err(|e| SynthesisError::Request(format!("invalid image response: {e}")))?;
    let datum = response.data.into_iter().next().ok_or(SynthesisError::EmptyReference)?;

    match (datum.url, datum.b64_json) {
        (Some(url), _) if !url.trim().is_empty() => Ok(ImageRef::new(url)),
        (_, Some(payload)) if !payload.trim().is_empty() => {
            Ok(ImageRef::inline_base64(INLINE_IMAGE_MIME, payload.trim()))
        }
        _ => Err(SynthesisError::EmptyReference),
    }
}

/// Splits articles into parts with a chat model in JSON mode.
#[derive(Debug, Clone)]
pub struct OpenAiContentGenerator {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiContentGenerator {
    /// Creates a generator with its own connection pool.
    pub fn new(config: OpenAiConfig) -> Result<Self, GenerationError> {
        let client = build_client(&config).map_err(GenerationError::Configuration)?;
        Ok(Self { client, config })
    }

    /// Builds the request body for an article.
    #[must_use]
    pub fn request_body(&self, text: &str, part_count: usize, prompt_override: Option<&str>) -> serde_json::Value {
        json!({
            "model": self.config.chat_model,
            "messages": [
                {"role": "system", "content": render_summary_prompt(prompt_override, part_count)},
                {"role": "user", "content": text},
            ],
            "response_format": {"type": "json_object"},
        })
    }
}

#[async_trait]
impl ContentGenerator for OpenAiContentGenerator {
    async fn summarize(
        &self,
        text: &str,
        part_count: usize,
        prompt_override: Option<&str>,
    ) -> Result<StoryBoard, GenerationError> {
        if self.config.api_key.is_none() {
            return Err(GenerationError::Configuration("API key is not set".into()));
        }
        let body = self.request_body(text, part_count, prompt_override);
        let (status, raw) = post_json(&self.client, &self.config, "chat/completions", &body)
            .await
            .map_err(GenerationError::Request)?;
        if !(200..300).contains(&status) {
            return Err(GenerationError::Api { status, body: raw });
        }

        let response: ChatResponse = serde_json::from_str(&raw)
            .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| GenerationError::MalformedResponse("no content received".into()))?;

        let board = parse_story_board(&content)?;
        debug!(parts = board.parts.len(), model = %self.config.chat_model, "Story board generated");
        Ok(board)
    }
}

/// Renders comic panels with an image model.
#[derive(Debug, Clone)]
pub struct OpenAiImageSynthesizer {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiImageSynthesizer {
    /// Creates a synthesizer with its own connection pool.
    pub fn new(config: OpenAiConfig) -> Result<Self, SynthesisError> {
        let client = build_client(&config).map_err(SynthesisError::Configuration)?;
        Ok(Self { client, config })
    }

    /// Builds the request body for one panel.
    #[must_use]
    pub fn request_body(&self, prompt: &str, prompt_override: Option<&str>) -> serde_json::Value {
        json!({
            "model": self.config.image_model,
            "prompt": render_image_prompt(prompt_override, prompt),
            "n": 1,
            "size": self.config.image_size,
            "quality": "standard",
        })
    }
}

#[async_trait]
impl ImageSynthesizer for OpenAiImageSynthesizer {
    async fn synthesize(
        &self,
        prompt: &str,
        prompt_override: Option<&str>,
    ) -> Result<ImageRef, SynthesisError> {
        if self.config.api_key.is_none() {
            return Err(SynthesisError::Configuration("API key is not set".into()));
        }
        let body = self.request_body(prompt, prompt_override);
        let (status, raw) = post_json(&self.client, &self.config, "images/generations", &body)
            .await
            .map_err(SynthesisError::Request)?;
        if !(200..300).contains(&status) {
            return Err(SynthesisError::Api { status, body: raw });
        }
        parse_image_response(&raw)
    }
}
