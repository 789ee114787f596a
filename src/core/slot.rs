//! Per-invocation bookkeeping shared by both runners.

use std::time::Instant;

use crate::tools::producer::{ToolProducer, ToolUpdate};
use crate::tools::{ToolError, ToolRegistry};

use super::batch::{InvocationResult, ToolInvocation};

/// Source of producers for admitted invocations.
pub trait ProducerFactory: Send + Sync {
    fn start(&self, invocation: &ToolInvocation) -> Box<dyn ToolProducer>;
}

impl ProducerFactory for ToolRegistry {
    fn start(&self, invocation: &ToolInvocation) -> Box<dyn ToolProducer> {
        ToolRegistry::start(self, &invocation.tool_name, invocation.parameters.clone())
    }
}

/// What to do after feeding one producer item into a slot.
#[derive(Debug)]
pub(crate) struct Absorbed {
    pub emit: Option<InvocationResult>,
    pub retire: bool,
}

/// Tracking record for one admitted invocation.
pub(crate) struct SchedulerSlot<'a> {
    pub batch_index: usize,
    invocation: &'a ToolInvocation,
    final_seen: bool,
    started_at: Instant,
}

impl<'a> SchedulerSlot<'a> {
    pub fn new(batch_index: usize, invocation: &'a ToolInvocation) -> Self {
        Self {
            batch_index,
            invocation,
            final_seen: false,
            started_at: Instant::now(),
        }
    }

    /// Turn a producer item into the result to emit and the slot's fate.
    ///
    /// Exactly one final result leaves a slot: errors become the final
    /// result, a stream that ends without one gets a synthesized failure, and
    /// anything after the final result is dropped.
    pub fn absorb(&mut self, item: Option<Result<ToolUpdate, ToolError>>) -> Absorbed {
        let invocation = self.invocation;
        match item {
            Some(Ok(ToolUpdate::Progress(output))) => {
                if self.final_seen {
                    self.discard("progress");
                    return Absorbed {
                        emit: None,
                        retire: false,
                    };
                }
                Absorbed {
                    emit: Some(InvocationResult::progress(invocation, output)),
                    retire: false,
                }
            }
            Some(Ok(ToolUpdate::Done(result))) => {
                if self.final_seen {
                    self.discard("final result");
                    return Absorbed {
                        emit: None,
                        retire: false,
                    };
                }
                self.final_seen = true;
                Absorbed {
                    emit: Some(InvocationResult::output(invocation, result)),
                    retire: false,
                }
            }
            Some(Err(error)) => {
                let emit = if self.final_seen {
                    self.discard("error");
                    None
                } else {
                    self.final_seen = true;
                    tracing::debug!(
                        batch_index = self.batch_index,
                        tool = %invocation.tool_name,
                        error = %error,
                        "tool producer failed"
                    );
                    Some(InvocationResult::failed(invocation, error))
                };
                Absorbed { emit, retire: true }
            }
            None => {
                tracing::debug!(
                    batch_index = self.batch_index,
                    tool = %invocation.tool_name,
                    elapsed_ms = self.started_at.elapsed().as_millis() as u64,
                    "tool producer finished"
                );
                let emit = (!self.final_seen).then(|| {
                    self.final_seen = true;
                    InvocationResult::failed(
                        invocation,
                        ToolError::execution_failed("tool produced no result"),
                    )
                });
                Absorbed { emit, retire: true }
            }
        }
    }

    fn discard(&self, what: &str) {
        tracing::warn!(
            batch_index = self.batch_index,
            tool = %self.invocation.tool_name,
            "discarding {what} emitted after the final result"
        );
    }
}
