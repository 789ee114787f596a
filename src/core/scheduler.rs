//! Concurrent scheduler for read-only batches.
//!
//! Up to `max_concurrency` producers are active at once. Every active slot
//! has exactly one outstanding pull in a `FuturesUnordered`; whichever pull
//! resolves first is handled, tagged with its batch index, and emitted. When
//! a producer's stream ends its slot is released and the lowest-index
//! invocation that has not been admitted yet takes its place.
//!
//! Results leave in completion order. Restoring batch order is the
//! sequencer's job.

use async_stream::stream;
use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::tools::producer::{ToolProducer, ToolUpdate};
use crate::tools::ToolError;

use super::batch::{ExecutionBatch, TaggedResult};
use super::error::SchedulerError;
use super::slot::{ProducerFactory, SchedulerSlot};

pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

type PullOutput = (
    usize,
    Box<dyn ToolProducer>,
    Option<Result<ToolUpdate, ToolError>>,
);
type Pull = BoxFuture<'static, PullOutput>;

/// Request the next update from `producer`, handing the producer back with it.
fn pull(slot_id: usize, mut producer: Box<dyn ToolProducer>, cancel: CancellationToken) -> Pull {
    Box::pin(async move {
        let item = producer.next_update(&cancel).await;
        (slot_id, producer, item)
    })
}

/// Fixed-capacity arena of active slots, addressed by slot id.
struct SlotArena<'a> {
    slots: Vec<Option<SchedulerSlot<'a>>>,
    free: Vec<usize>,
}

impl<'a> SlotArena<'a> {
    fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            free: (0..capacity).rev().collect(),
        }
    }

    fn has_capacity(&self) -> bool {
        !self.free.is_empty()
    }

    fn active(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    fn insert(&mut self, slot: SchedulerSlot<'a>) -> Option<usize> {
        let id = self.free.pop()?;
        self.slots[id] = Some(slot);
        Some(id)
    }

    fn get_mut(&mut self, id: usize) -> Option<&mut SchedulerSlot<'a>> {
        self.slots.get_mut(id).and_then(Option::as_mut)
    }

    fn release(&mut self, id: usize) {
        if let Some(entry) = self.slots.get_mut(id)
            && entry.take().is_some()
        {
            self.free.push(id);
        }
    }
}

pub struct ConcurrentScheduler<'a> {
    factory: &'a dyn ProducerFactory,
    max_concurrency: usize,
}

impl<'a> ConcurrentScheduler<'a> {
    /// `max_concurrency` is clamped to at least one.
    pub fn new(factory: &'a dyn ProducerFactory, max_concurrency: usize) -> Self {
        Self {
            factory,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Drive `batch` to completion (or cancellation), yielding tagged results.
    ///
    /// The stream yields `Err` at most once, as its last item.
    pub fn run(
        self,
        batch: &'a ExecutionBatch,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<TaggedResult, SchedulerError>> + Send + 'a {
        let factory = self.factory;
        let limit = self.max_concurrency;
        stream! {
            let producer_cancel = cancel.child_token();
            let mut arena = SlotArena::new(limit);
            let mut pending: FuturesUnordered<Pull> = FuturesUnordered::new();
            let mut next_index = 0usize;

            while next_index < batch.len() && arena.has_capacity() {
                match admit(&mut arena, factory, batch, next_index, &producer_cancel) {
                    Ok(first_pull) => pending.push(first_pull),
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                }
                next_index += 1;
            }
            tracing::debug!(
                batch_size = batch.len(),
                admitted = next_index,
                limit,
                "concurrent batch started"
            );

            loop {
                if cancel.is_cancelled() {
                    producer_cancel.cancel();
                    tracing::info!(
                        active = arena.active(),
                        unadmitted = batch.len() - next_index,
                        "concurrent batch cancelled"
                    );
                    break;
                }
                if pending.is_empty() {
                    if next_index < batch.len() || arena.active() > 0 {
                        yield Err(SchedulerError::invariant(format!(
                            "no pending pulls with {} active slot(s) and {} unadmitted invocation(s)",
                            arena.active(),
                            batch.len() - next_index
                        )));
                    }
                    break;
                }

                let resolved = tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    next = pending.next() => next,
                };
                let Some((slot_id, producer, item)) = resolved else {
                    continue;
                };

                let Some(slot) = arena.get_mut(slot_id) else {
                    yield Err(SchedulerError::invariant(format!(
                        "pull resolved for slot {slot_id}, which holds no admitted invocation"
                    )));
                    return;
                };
                let batch_index = slot.batch_index;
                let absorbed = slot.absorb(item);
                if let Some(result) = absorbed.emit {
                    yield Ok(TaggedResult { batch_index, result });
                }

                if absorbed.retire {
                    drop(producer);
                    arena.release(slot_id);
                    if next_index < batch.len() {
                        match admit(&mut arena, factory, batch, next_index, &producer_cancel) {
                            Ok(first_pull) => pending.push(first_pull),
                            Err(err) => {
                                yield Err(err);
                                return;
                            }
                        }
                        next_index += 1;
                    }
                } else {
                    pending.push(pull(slot_id, producer, producer_cancel.clone()));
                }
            }
        }
    }
}

fn admit<'a>(
    arena: &mut SlotArena<'a>,
    factory: &dyn ProducerFactory,
    batch: &'a ExecutionBatch,
    batch_index: usize,
    cancel: &CancellationToken,
) -> Result<Pull, SchedulerError> {
    let invocation = batch.get(batch_index).ok_or_else(|| {
        SchedulerError::invariant(format!("admitting index {batch_index} outside the batch"))
    })?;
    let slot_id = arena
        .insert(SchedulerSlot::new(batch_index, invocation))
        .ok_or_else(|| {
            SchedulerError::invariant(format!(
                "no free slot to admit index {batch_index}; concurrency ceiling reached"
            ))
        })?;
    tracing::debug!(batch_index, slot_id, tool = %invocation.tool_name, "admitted invocation");
    Ok(pull(slot_id, factory.start(invocation), cancel.clone()))
}
