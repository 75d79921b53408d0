//! Image references produced by the image synthesizer.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A reference to a generated image: either a remote URL or an inline
/// `data:` URI carrying the encoded bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(String);

impl ImageRef {
    /// Wraps a URL or data URI.
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Builds an inline reference from raw image bytes.
    #[must_use]
    pub fn inline(mime: &str, bytes: &[u8]) -> Self {
        Self(format!("data:{mime};base64,{}", STANDARD.encode(bytes)))
    }

    /// Builds an inline reference from an already base64 encoded payload.
    #[must_use]
    pub fn inline_base64(mime: &str, payload: &str) -> Self {
        Self(format!("data:{mime};base64,{payload}"))
    }

    /// Returns the reference string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the reference carries no content.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Returns true for `data:` URIs.
    #[must_use]
    pub fn is_inline(&self) -> bool {
        self.0.starts_with("data:")
    }

    /// Decodes the bytes of an inline reference.
    ///
    /// Returns `None` for remote references and malformed payloads.
    #[must_use]
    pub fn decode_inline(&self) -> Option<Vec<u8>> {
        let rest = self.0.strip_prefix("data:")?;
        let (_, payload) = rest.split_once(";base64,")?;
        STANDARD.decode(payload).ok()
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ImageRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ImageRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}
