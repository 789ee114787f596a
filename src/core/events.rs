//! Events emitted by the batch executor.
//!
//! These flow to whoever drives the executor (CLI, conversation loop) over a
//! channel, so progress can be shown while a batch is still running.

use serde_json::Value;

use super::dispatch::DispatchStrategy;

/// Events emitted while a batch executes.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Dispatch policy picked a strategy for a batch
    BatchStarted {
        strategy: DispatchStrategy,
        size: usize,
    },

    /// A producer was started for an invocation
    ToolCallStarted {
        id: String,
        name: String,
        input: Value,
    },

    /// Intermediate output from a running tool
    ToolCallProgress { id: String, output: String },

    /// An invocation delivered its final result
    ToolCallComplete {
        id: String,
        name: String,
        success: bool,
    },

    /// All results for the batch have been sequenced
    BatchComplete { cancelled: bool },

    /// Free-form status line
    Status { message: String },
}

impl Event {
    pub fn status(message: impl Into<String>) -> Self {
        Event::Status {
            message: message.into(),
        }
    }
}
