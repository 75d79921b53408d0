//! Default prompt templates.

use serde::{Deserialize, Serialize};

/// Summarization template; `${numParts}` is replaced with the part count.
pub const DEFAULT_SUMMARY_PROMPT: &str = "You are a comic book artist and storyteller. \
Break down the given article into ${numParts} parts and create both a summary and an image \
generation prompt for each part. Ensure that each image generation prompt has enough information \
about the general setting of the story, ensuring consistency across the images. Decide for a \
style and incorporate in each image generation prompt. Also give the story a short title. \
Generate JSON in this format: { \"title\": \"string\", \"parts\": [{ \"summary\": \"string\", \"prompt\": \"string\" }] }";

/// Image template; `${prompt}` is replaced with the part's prompt.
pub const DEFAULT_IMAGE_PROMPT: &str = "Create a single comic panel style image: ${prompt}";

/// The system-wide prompt templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultPrompts {
    /// Summarization template.
    pub summary: String,
    /// Image template.
    pub image: String,
}

impl Default for DefaultPrompts {
    fn default() -> Self {
        Self {
            summary: DEFAULT_SUMMARY_PROMPT.to_string(),
            image: DEFAULT_IMAGE_PROMPT.to_string(),
        }
    }
}

/// Renders the summarization system prompt.
#[must_use]
pub fn render_summary_prompt(template_override: Option<&str>, part_count: usize) -> String {
    template_override
        .unwrap_or(DEFAULT_SUMMARY_PROMPT)
        .replace("${numParts}", &part_count.to_string())
}

/// Renders the final image prompt.
///
/// An override without a `${prompt}` placeholder is treated as a style
/// prefix and the part's prompt is appended.
#[must_use]
pub fn render_image_prompt(template_override: Option<&str>, prompt: &str) -> String {
    let template = template_override.unwrap_or(DEFAULT_IMAGE_PROMPT);
    if template.contains("${prompt}") {
        template.replace("${prompt}", prompt)
    } else {
        format!("{template}: {prompt}")
    }
}
