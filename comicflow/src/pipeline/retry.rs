//! Bounded retry with configurable backoff and jitter.
//!
//! A stage invocation gets `max_attempts` attempts in total. After each
//! retriable failure that still leaves attempts, the step is re-marked with
//! a `Retry attempt k/N` detail, where `k` counts the failures so far.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::StageError;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^(failures - 1)
    #[default]
    Exponential,
    /// delay = base * failures
    Linear,
    /// delay = base
    Constant,
}

/// Jitter strategy applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter.
    None,
    /// Random from 0 to delay.
    #[default]
    Full,
    /// Half fixed, half random.
    Equal,
}

/// Retry behavior of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per stage invocation, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay between attempts in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Backoff strategy.
    #[serde(default)]
    pub backoff_strategy: BackoffStrategy,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter_strategy: JitterStrategy,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_strategy: BackoffStrategy::default(),
            jitter_strategy: JitterStrategy::default(),
        }
    }
}

impl RetryConfig {
    /// Creates a retry config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Retries back to back, with no delay. Useful in tests.
    #[must_use]
    pub fn immediate() -> Self {
        Self::default()
            .with_base_delay_ms(0)
            .with_jitter(JitterStrategy::None)
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter_strategy = strategy;
        self
    }
}

/// Attempt bookkeeping for one stage invocation.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    failures: u32,
}

impl RetryState {
    /// Creates a fresh state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of failed attempts so far.
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Records a failed attempt.
    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    /// Returns true once every attempt has failed.
    #[must_use]
    pub fn is_exhausted(&self, config: &RetryConfig) -> bool {
        self.failures >= config.max_attempts
    }

    /// Detail shown on the step while waiting for the next attempt.
    #[must_use]
    pub fn retry_detail(&self, config: &RetryConfig) -> String {
        format!("Retry attempt {}/{}", self.failures, config.max_attempts)
    }

    /// Calculates the delay before the next attempt.
    #[must_use]
    pub fn calculate_delay(&self, config: &RetryConfig) -> Duration {
        let base = config.base_delay_ms;
        let max = config.max_delay_ms;
        let exponent = self.failures.saturating_sub(1);

        let delay = match config.backoff_strategy {
            BackoffStrategy::Exponential => base.saturating_mul(2u64.saturating_pow(exponent)),
            BackoffStrategy::Linear => base.saturating_mul(u64::from(self.failures.max(1))),
            BackoffStrategy::Constant => base,
        }
        .min(max);

        let jittered = match config.jitter_strategy {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after the delay, showing the detail on the step.
    Retry {
        /// Delay before the next attempt.
        delay: Duration,
        /// Detail to record on the step.
        detail: String,
    },
    /// Every attempt failed.
    GiveUp,
    /// The error class is never retried.
    NotRetriable,
}

/// Records a failure and decides whether to try again.
#[must_use]
pub fn should_retry(state: &mut RetryState, config: &RetryConfig, error: &StageError) -> RetryDecision {
    if !error.is_retriable() {
        return RetryDecision::NotRetriable;
    }
    state.record_failure();
    if state.is_exhausted(config) {
        return RetryDecision::GiveUp;
    }
    RetryDecision::Retry {
        delay: state.calculate_delay(config),
        detail: state.retry_detail(config),
    }
}
