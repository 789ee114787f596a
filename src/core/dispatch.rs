//! Dispatch policy: run a batch concurrently or strictly in order.

use std::fmt;

use serde::Serialize;

use super::batch::ExecutionBatch;
use super::classifier::{Classification, Classifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStrategy {
    Concurrent,
    Sequential,
}

impl fmt::Display for DispatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchStrategy::Concurrent => f.write_str("concurrent"),
            DispatchStrategy::Sequential => f.write_str("sequential"),
        }
    }
}

/// Concurrent only when every call is read-only.
///
/// One mutating call serializes the whole batch, reads included.
pub fn select_strategy(batch: &ExecutionBatch, classifier: &Classifier) -> DispatchStrategy {
    let all_read_only = !batch.is_empty()
        && batch
            .iter()
            .all(|inv| classifier.classify(&inv.tool_name) == Classification::ReadOnly);
    if all_read_only {
        DispatchStrategy::Concurrent
    } else {
        DispatchStrategy::Sequential
    }
}
