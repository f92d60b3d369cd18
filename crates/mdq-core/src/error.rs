//! Engine error taxonomy.
//!
//! Validation errors are returned synchronously from commands and never create a job.
//! Process failures are asynchronous and surface as a job's `Error` state; they only
//! appear here when an adapter fails during a synchronous step (collection expansion).

use crate::job::JobId;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Rejected before a job was created (malformed URL, template, or limits).
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// External tool terminated abnormally.
    #[error("process failed (exit code {exit_code:?}): {stderr}")]
    ProcessFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Generated id collided with an existing job.
    #[error("job {0} already exists")]
    JobAlreadyExists(JobId),

    #[error("unknown job {0}")]
    UnknownJob(JobId),

    /// User-initiated stop; callers report it as a `Cancelled` state, never as a failure.
    #[error("cancelled by user")]
    Cancelled,

    /// The engine actor is gone (shut down or crashed).
    #[error("engine is not running")]
    EngineClosed,
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::ValidationFailed(msg.into())
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
