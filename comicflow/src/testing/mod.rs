//! Testing utilities for comicflow.
//!
//! This module provides:
//! - Scripted collaborators that replay canned results and failures
//! - Fixtures for building services and waiting on jobs
//! - Assertions over job records

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_completion_invariant, assert_single_in_progress, assert_step, assert_steps_after,
};
pub use fixtures::{wait_for_terminal, TestHarness, SAMPLE_ARTICLE};
pub use mocks::{ScriptedFetcher, ScriptedGenerator, ScriptedSynthesizer, StaticProbe};
