//! Restores batch order to a stream of tagged results.

use futures_util::stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use super::batch::{ExecutionBatch, InvocationResult, ResultPayload, TaggedResult};
use super::error::SchedulerError;

/// Ordered output of one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequenced {
    /// One final result per invocation, in batch order.
    pub results: Vec<InvocationResult>,
    /// Intermediate output per invocation, in the order it was produced.
    pub progress: Vec<Vec<String>>,
}

impl Sequenced {
    pub fn cancelled(&self) -> bool {
        self.results.iter().any(InvocationResult::is_cancelled)
    }
}

/// Reordering buffer for a single batch.
///
/// Results may arrive in any order across invocations. Each invocation must
/// deliver exactly one final result, and nothing after it.
pub struct ResultSequencer<'a> {
    batch: &'a ExecutionBatch,
    finals: Vec<Option<InvocationResult>>,
    progress: Vec<Vec<String>>,
}

impl<'a> ResultSequencer<'a> {
    pub fn new(batch: &'a ExecutionBatch) -> Self {
        Self {
            batch,
            finals: vec![None; batch.len()],
            progress: vec![Vec::new(); batch.len()],
        }
    }

    pub fn accept(&mut self, tagged: TaggedResult) -> Result<(), SchedulerError> {
        let TaggedResult {
            batch_index,
            result,
        } = tagged;
        let invocation = self.batch.get(batch_index).ok_or_else(|| {
            SchedulerError::invariant(format!(
                "result tagged with index {batch_index} for a batch of {}",
                self.batch.len()
            ))
        })?;
        if invocation.id != result.invocation_id {
            return Err(SchedulerError::invariant(format!(
                "index {batch_index} belongs to '{}' but carried a result for '{}'",
                invocation.id, result.invocation_id
            )));
        }
        if self.finals[batch_index].is_some() {
            return Err(SchedulerError::invariant(format!(
                "'{}' delivered output after its final result",
                invocation.id
            )));
        }

        if result.is_final {
            self.finals[batch_index] = Some(result);
        } else if let ResultPayload::Progress(output) = result.payload {
            self.progress[batch_index].push(output);
        }
        Ok(())
    }

    pub fn progress(&self, batch_index: usize) -> &[String] {
        self.progress
            .get(batch_index)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_complete(&self) -> bool {
        self.finals.iter().all(Option::is_some)
    }

    /// Close the buffer.
    ///
    /// With `cancelled` set, invocations still lacking a final result are
    /// reported as cancelled; otherwise a missing final result is a scheduler
    /// defect.
    pub fn finish(self, cancelled: bool) -> Result<Sequenced, SchedulerError> {
        let mut results = Vec::with_capacity(self.finals.len());
        for (invocation, slot) in self.batch.iter().zip(self.finals) {
            match slot {
                Some(result) => results.push(result),
                None if cancelled => results.push(InvocationResult::cancelled(invocation)),
                None => {
                    return Err(SchedulerError::invariant(format!(
                        "'{}' finished without a final result",
                        invocation.id
                    )));
                }
            }
        }
        Ok(Sequenced {
            results,
            progress: self.progress,
        })
    }
}

/// Drain `tagged` and return the batch-ordered results.
pub async fn sequence<S>(
    tagged: S,
    batch: &ExecutionBatch,
    cancel: &CancellationToken,
) -> Result<Sequenced, SchedulerError>
where
    S: Stream<Item = Result<TaggedResult, SchedulerError>>,
{
    let mut tagged = std::pin::pin!(tagged);
    let mut sequencer = ResultSequencer::new(batch);
    while let Some(item) = tagged.next().await {
        sequencer.accept(item?)?;
    }
    sequencer.finish(cancel.is_cancelled())
}
