//! Batch-level failures.
//!
//! Tool failures never show up here; they are ordinary results. A
//! `SchedulerError` means the engine itself broke an invariant and the batch
//! cannot be trusted.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("scheduler invariant violated: {message}")]
    InvariantViolation { message: String },
}

impl SchedulerError {
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }
}
