//! Batch execution core: classification, dispatch, scheduling, sequencing.

// === Modules ===

pub mod batch;
pub mod classifier;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod executor;
pub mod scheduler;
pub mod sequencer;
pub mod sequential;
pub mod slot;
pub mod turn;

#[cfg(test)]
mod testing;

// === Re-exports ===

pub use batch::{
    ExecutionBatch, InvocationResult, ResultPayload, TaggedResult, ToolInvocation,
    normalize_tool_name, parse_batch_json,
};
pub use classifier::{Classification, Classifier};
pub use dispatch::{DispatchStrategy, select_strategy};
pub use error::SchedulerError;
pub use events::Event;
pub use executor::{BatchExecutor, BatchOutcome};
pub use scheduler::{ConcurrentScheduler, DEFAULT_MAX_CONCURRENCY};
pub use sequencer::{ResultSequencer, Sequenced, sequence};
pub use sequential::SequentialRunner;
pub use slot::ProducerFactory;
pub use turn::{
    ConversationLoop, ModelClient, ModelReply, ModelToolCall, ScriptedModel, TurnMessage,
    TurnOutcome, TurnStatus, format_tool_error,
};
