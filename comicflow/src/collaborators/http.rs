//! HTTP document fetcher and link probe built on reqwest and scraper.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use scraper::{ElementRef, Html, Node, Selector};
use std::sync::OnceLock;
use tracing::debug;

use super::{DocumentFetcher, LinkProbe, ProbeResponse};
use crate::config::FetchConfig;
use crate::errors::FetchError;

/// Elements whose text never belongs to the article.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "nav", "header", "footer", "aside", "noscript"];

/// Candidates for the main content container, checked in document order.
const CONTENT_SELECTOR: &str = "article, main, .content, .post-content";

/// Fetches pages over HTTP and extracts their readable text.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

impl HttpFetcher {
    /// Creates a fetcher with its own connection pool.
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| FetchError::Request(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Creates a fetcher reusing an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, config: FetchConfig) -> Self {
        Self { client, config }
    }

    fn check_size(&self, size: Option<u64>) -> Result<(), FetchError> {
        let limit = self.config.max_response_size;
        match size {
            Some(size) if size > limit as u64 => Err(FetchError::TooLarge { limit }),
            _ => Ok(()),
        }
    }
}

/// Appends a chunk to `body`, failing once the total exceeds `limit` bytes.
fn append_limited(body: &mut Vec<u8>, chunk: &[u8], limit: usize) -> Result<(), FetchError> {
    if body.len().saturating_add(chunk.len()) > limit {
        return Err(FetchError::TooLarge { limit });
    }
    body.extend_from_slice(chunk);
    Ok(())
}

fn request_error(url: &str, error: &reqwest::Error) -> FetchError {
    if error.is_builder() {
        FetchError::InvalidUrl(url.to_string())
    } else {
        FetchError::Request(error.to_string())
    }
}

fn probe_response(response: &reqwest::Response) -> ProbeResponse {
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    ProbeResponse::new(response.status().as_u16(), content_type)
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| request_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        self.check_size(response.content_length())?;

        // chunked responses carry no length; enforce the limit while reading
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?
        {
            append_limited(&mut body, &chunk, self.config.max_response_size)?;
        }

        let html = String::from_utf8_lossy(&body);
        let text = extract_article_text(&html);
        debug!(url = %url, bytes = body.len(), chars = text.len(), "Fetched document");
        Ok(text)
    }
}

#[async_trait]
impl LinkProbe for HttpFetcher {
    async fn probe(&self, url: &str) -> Result<ProbeResponse, FetchError> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| request_error(url, &e))?;

        // some servers refuse HEAD; ask again with GET and ignore the body
        if response.status() == StatusCode::METHOD_NOT_ALLOWED {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| request_error(url, &e))?;
            return Ok(probe_response(&response));
        }
        Ok(probe_response(&response))
    }
}

fn content_selector() -> Option<&'static Selector> {
    static SELECTOR: OnceLock<Option<Selector>> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse(CONTENT_SELECTOR).ok()).as_ref()
}

fn body_selector() -> Option<&'static Selector> {
    static SELECTOR: OnceLock<Option<Selector>> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse("body").ok()).as_ref()
}

/// Extracts the readable text of an HTML page.
///
/// Navigation, scripts, styles and other page chrome are dropped. The
/// first content container (`article`, `main`, `.content`,
/// `.post-content`) wins; pages without one fall back to the whole body.
/// Whitespace is collapsed to single spaces.
#[must_use]
pub fn extract_article_text(html: &str) -> String {
    let document = Html::parse_document(html);

    let from_container = content_selector()
        .and_then(|s| document.select(s).next())
        .map(visible_text)
        .filter(|t| !t.is_empty());
    if let Some(text) = from_container {
        return text;
    }

    body_selector()
        .and_then(|s| document.select(s).next())
        .map_or_else(|| visible_text(document.root_element()), visible_text)
}

fn visible_text(element: ElementRef<'_>) -> String {
    let mut words: Vec<&str> = Vec::new();
    for node in element.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|e| SKIPPED_ELEMENTS.contains(&e.name()))
        });
        if !hidden {
            words.extend(text.split_whitespace());
        }
    }
    words.join(" ")
}
