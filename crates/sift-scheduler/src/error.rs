//! Error types for the scheduler crate.
//!
//! Job execution failures never surface here: workers report them to the
//! listener. These errors cover configuration, lifecycle and submission.

use sift_indexing::IndexingError;
use thiserror::Error;

/// Errors that can occur during scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Scheduler is already running
    #[error("Scheduler is already running")]
    AlreadyRunning,

    /// Scheduler is not running
    #[error("Scheduler is not running")]
    NotRunning,

    /// Workers did not stop within the shutdown timeout
    #[error("Workers still running after {0}s shutdown timeout")]
    ShutdownTimeout(u64),

    /// Submission failed
    #[error("Indexing error: {0}")]
    Indexing(#[from] IndexingError),
}

impl From<config::ConfigError> for SchedulerError {
    fn from(err: config::ConfigError) -> Self {
        SchedulerError::Config(err.to_string())
    }
}
