//! Logging setup and timing helpers.

mod subscriber;
mod timer;

pub use subscriber::{init_tracing, LogFormat, DEFAULT_LOG_FILTER};
pub use timer::StageTimer;
