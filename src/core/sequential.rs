//! Sequential runner for batches containing a mutating call.
//!
//! Each producer is drained completely, in batch order, before the next one
//! is started. The output has the same shape as the concurrent scheduler's.

use async_stream::stream;
use futures_util::stream::Stream;
use tokio_util::sync::CancellationToken;

use super::batch::{ExecutionBatch, TaggedResult};
use super::error::SchedulerError;
use super::slot::{ProducerFactory, SchedulerSlot};

pub struct SequentialRunner<'a> {
    factory: &'a dyn ProducerFactory,
}

impl<'a> SequentialRunner<'a> {
    pub fn new(factory: &'a dyn ProducerFactory) -> Self {
        Self { factory }
    }

    pub fn run(
        self,
        batch: &'a ExecutionBatch,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<TaggedResult, SchedulerError>> + Send + 'a {
        let factory = self.factory;
        stream! {
            let producer_cancel = cancel.child_token();
            for (batch_index, invocation) in batch.iter().enumerate() {
                if cancel.is_cancelled() {
                    tracing::info!(
                        remaining = batch.len() - batch_index,
                        "sequential batch cancelled"
                    );
                    break;
                }
                tracing::debug!(batch_index, tool = %invocation.tool_name, "running invocation");
                let mut slot = SchedulerSlot::new(batch_index, invocation);
                let mut producer = factory.start(invocation);
                loop {
                    let next = tokio::select! {
                        biased;
                        () = cancel.cancelled() => None,
                        item = producer.next_update(&producer_cancel) => Some(item),
                    };
                    let Some(item) = next else {
                        producer_cancel.cancel();
                        break;
                    };
                    let absorbed = slot.absorb(item);
                    if let Some(result) = absorbed.emit {
                        yield Ok(TaggedResult { batch_index, result });
                    }
                    if absorbed.retire {
                        break;
                    }
                }
            }
        }
    }
}
