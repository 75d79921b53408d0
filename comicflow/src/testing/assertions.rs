//! Assertions over job records.

use crate::core::{JobRecord, JobState, StepStatus};

/// Asserts the status (and, when given, the detail) of a named step.
///
/// # Panics
///
/// Panics if the step is missing or does not match.
pub fn assert_step(record: &JobRecord, name: &str, status: StepStatus, detail: Option<&str>) {
    let step = record
        .steps
        .get(name)
        .unwrap_or_else(|| panic!("step '{name}' missing from job {}", record.fingerprint));
    assert_eq!(step.status, status, "status of step '{name}'");
    if let Some(detail) = detail {
        assert_eq!(step.detail.as_deref(), Some(detail), "detail of step '{name}'");
    }
}

/// Asserts every step after `name` is still pending.
///
/// # Panics
///
/// Panics if the step is missing or a later step moved.
pub fn assert_steps_after(record: &JobRecord, name: &str, status: StepStatus) {
    let index = record
        .steps
        .position(name)
        .unwrap_or_else(|| panic!("step '{name}' missing from job {}", record.fingerprint));
    for step in &record.steps[index + 1..] {
        assert_eq!(step.status, status, "status of step '{}'", step.name);
    }
}

/// Asserts at most one step is in progress.
///
/// # Panics
///
/// Panics if two or more steps are in progress.
pub fn assert_single_in_progress(record: &JobRecord) {
    let running: Vec<_> = record
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::InProgress)
        .map(|s| s.name.as_str())
        .collect();
    assert!(running.len() <= 1, "several steps in progress: {running:?}");
}

/// Asserts a succeeded job holds one summary and one image per part.
///
/// # Panics
///
/// Panics if the job did not succeed or its results are incomplete.
pub fn assert_completion_invariant(record: &JobRecord) {
    assert_eq!(record.state(), JobState::Succeeded, "job {} did not succeed", record.fingerprint);
    assert_eq!(record.summaries.len(), record.requested_part_count, "summaries");
    assert_eq!(record.image_refs.len(), record.requested_part_count, "image refs");
}
