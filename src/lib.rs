//! Bounded-concurrency execution of model-requested tool calls.
//!
//! Read-only batches run concurrently under a ceiling; any mutating call
//! serializes its batch. Either way results come back in batch order.

pub mod audit;
pub mod config;
pub mod core;
pub mod error_taxonomy;
pub mod logging;
pub mod tools;

pub use crate::config::Config;
pub use crate::core::{BatchExecutor, BatchOutcome, ExecutionBatch, ToolInvocation};
pub use crate::tools::{ToolRegistry, ToolRegistryBuilder};
