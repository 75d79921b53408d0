//! Content-derived job identifiers.
//!
//! The fingerprint is both the deduplication key and the external job id:
//! two submissions with identical parameters map to the same record.

use md5::{Digest, Md5};

use crate::core::JobRequest;

/// Computes the fingerprint of a request.
///
/// The digest covers `"{url}-{parts}-{summary_override}-{image_override}"`,
/// with missing overrides treated as empty strings, and is returned as
/// lowercase hex.
#[must_use]
pub fn fingerprint(
    source_url: &str,
    requested_part_count: usize,
    summary_prompt_override: Option<&str>,
    image_prompt_override: Option<&str>,
) -> String {
    let material = format!(
        "{}-{}-{}-{}",
        source_url,
        requested_part_count,
        summary_prompt_override.unwrap_or_default(),
        image_prompt_override.unwrap_or_default(),
    );
    hex::encode(Md5::digest(material.as_bytes()))
}

/// Computes the fingerprint of a [`JobRequest`].
#[must_use]
pub fn fingerprint_request(request: &JobRequest) -> String {
    fingerprint(
        &request.source_url,
        request.requested_part_count,
        request.summary_prompt_override.as_deref(),
        request.image_prompt_override.as_deref(),
    )
}

/// Returns true if `id` has the shape of a fingerprint.
#[must_use]
pub fn is_valid_job_id(id: &str) -> bool {
    id.len() == 32 && id.bytes().all(|b| b.is_ascii_hexdigit())
}
