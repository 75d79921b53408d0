//! Steps and the name-addressed step list.

use serde::{Deserialize, Serialize};
use std::ops::Deref;

use super::{JobState, StepArtifact, StepStatus};
use crate::errors::{ComicflowError, Result};

/// One unit of persisted pipeline progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Unique name within the job; the addressing key for transitions.
    pub name: String,
    /// Current status.
    pub status: StepStatus,
    /// Human readable outcome (success note, retry note or error message).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Intermediate result captured for observability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<StepArtifact>,
}

impl Step {
    /// Creates a pending step.
    #[must_use]
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Pending,
            detail: None,
            artifact: None,
        }
    }
}

/// Ordered sequence of steps, addressed by name.
///
/// Order is pipeline order. Positions only change when the whole list is
/// rebuilt (initialization or regeneration), never in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepList(Vec<Step>);

impl StepList {
    /// Creates a list of pending steps from names, in order.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Step::pending).collect())
    }

    /// Returns the position of the named step.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|s| s.name == name)
    }

    /// Returns the named step.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Step> {
        self.0.iter().find(|s| s.name == name)
    }

    /// Returns the step currently in progress, if any.
    #[must_use]
    pub fn in_progress(&self) -> Option<&Step> {
        self.0.iter().find(|s| s.status == StepStatus::InProgress)
    }

    /// Returns the first step in error, if any.
    #[must_use]
    pub fn first_error(&self) -> Option<&Step> {
        self.0.iter().find(|s| s.status == StepStatus::Error)
    }

    /// Returns true if the list is non-empty and every step is complete.
    #[must_use]
    pub fn all_complete(&self) -> bool {
        !self.0.is_empty() && self.0.iter().all(|s| s.status == StepStatus::Complete)
    }

    /// Returns true if every step is complete or in error.
    #[must_use]
    pub fn all_terminal(&self) -> bool {
        !self.0.is_empty() && self.0.iter().all(|s| s.status.is_terminal())
    }

    /// Derives the overall job state.
    ///
    /// A list without steps belongs to a corrupted record and is reported
    /// as failed.
    #[must_use]
    pub fn state(&self) -> JobState {
        if self.0.is_empty() || self.first_error().is_some() {
            JobState::Failed
        } else if self.all_complete() {
            JobState::Succeeded
        } else if self.0.iter().all(|s| s.status == StepStatus::Pending) {
            JobState::Pending
        } else {
            JobState::Running
        }
    }

    /// Names of the completed steps, in order.
    #[must_use]
    pub fn completed_names(&self) -> Vec<&str> {
        self.0
            .iter()
            .filter(|s| s.status == StepStatus::Complete)
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Applies a status transition to the named step.
    ///
    /// On `complete` the following step is armed as `pending` unless it
    /// already reached a terminal status. Transitions that would leave two
    /// steps in progress, move a step backwards out of a terminal status, or
    /// progress a job that already has an error are rejected.
    pub fn apply(
        &mut self,
        job_id: &str,
        name: &str,
        status: StepStatus,
        detail: Option<String>,
        artifact: Option<StepArtifact>,
    ) -> Result<()> {
        if self.0.is_empty() {
            return Err(ComicflowError::MissingSteps(job_id.to_string()));
        }
        let index = self
            .position(name)
            .ok_or_else(|| ComicflowError::step_not_found(job_id, name))?;

        if status != StepStatus::Error {
            if let Some(failed) = self.first_error() {
                return Err(ComicflowError::invalid_transition(
                    job_id,
                    name,
                    format!("job already failed at step '{}'", failed.name),
                ));
            }
        }

        let current = self.0[index].status;
        if current == StepStatus::Complete && status != StepStatus::Complete {
            return Err(ComicflowError::invalid_transition(
                job_id,
                name,
                format!("step is already complete, cannot move to {status}"),
            ));
        }

        if status == StepStatus::InProgress {
            if let Some(other) = self.0.iter().find(|s| s.status == StepStatus::InProgress && s.name != name) {
                return Err(ComicflowError::invalid_transition(
                    job_id,
                    name,
                    format!("step '{}' is already in progress", other.name),
                ));
            }
        }

        let step = &mut self.0[index];
        step.status = status;
        step.detail = detail;
        step.artifact = artifact;

        if status == StepStatus::Complete {
            if let Some(next) = self.0.get_mut(index + 1) {
                if !next.status.is_terminal() {
                    next.status = StepStatus::Pending;
                }
            }
        }

        Ok(())
    }

    /// Consumes the list and returns the steps.
    #[must_use]
    pub fn into_inner(self) -> Vec<Step> {
        self.0
    }
}

impl Deref for StepList {
    type Target = [Step];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<Step>> for StepList {
    fn from(steps: Vec<Step>) -> Self {
        Self(steps)
    }
}
