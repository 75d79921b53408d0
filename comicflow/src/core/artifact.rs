//! Step artifact type for capturing intermediate results.

use serde::{Deserialize, Serialize};

/// An intermediate result attached to a step for observability.
///
/// Serialized as `{"type": "text" | "image", "data": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum StepArtifact {
    /// Textual output (cleaned article text, generated summaries).
    Text(String),
    /// An image reference (URL or `data:` URI).
    Image(String),
}

impl StepArtifact {
    /// Creates a text artifact.
    #[must_use]
    pub fn text(data: impl Into<String>) -> Self {
        Self::Text(data.into())
    }

    /// Creates an image artifact.
    #[must_use]
    pub fn image(data: impl Into<String>) -> Self {
        Self::Image(data.into())
    }

    /// Returns the payload.
    #[must_use]
    pub fn data(&self) -> &str {
        match self {
            Self::Text(data) | Self::Image(data) => data,
        }
    }

    /// Returns the text payload, if this is a text artifact.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(data) => Some(data),
            Self::Image(_) => None,
        }
    }
}
