//! Batch execution pipeline: classify, dispatch, run, sequence.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{BoxStream, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::error_taxonomy::ErrorEnvelope;
use crate::logging;
use crate::tools::producer::ToolProducer;
use crate::tools::ToolRegistry;

use super::batch::{ExecutionBatch, InvocationResult, ResultPayload, TaggedResult, ToolInvocation};
use super::classifier::{Classification, Classifier};
use super::dispatch::{DispatchStrategy, select_strategy};
use super::error::SchedulerError;
use super::events::Event;
use super::scheduler::{ConcurrentScheduler, DEFAULT_MAX_CONCURRENCY};
use super::sequencer::sequence;
use super::sequential::SequentialRunner;
use super::slot::ProducerFactory;

/// Ordered results of one executed batch.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub strategy: DispatchStrategy,
    /// One final result per invocation, in batch order.
    pub results: Vec<InvocationResult>,
    /// Intermediate output per invocation, in batch order.
    pub progress: Vec<Vec<String>>,
    /// True when at least one invocation was cut short by cancellation.
    pub cancelled: bool,
    pub duration: Duration,
}

impl BatchOutcome {
    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| r.is_error()).count()
    }

    /// JSON summary: one entry per invocation with its content or error envelope.
    pub fn report(&self) -> serde_json::Value {
        let results: Vec<serde_json::Value> = self
            .results
            .iter()
            .zip(&self.progress)
            .map(|(result, progress)| {
                let mut entry = json!({
                    "id": result.invocation_id,
                    "tool": result.tool_name,
                    "success": !result.is_error(),
                });
                match &result.payload {
                    ResultPayload::Output(output) => {
                        entry["content"] = json!(output.content);
                        if let Some(metadata) = &output.metadata {
                            entry["metadata"] = metadata.clone();
                        }
                    }
                    ResultPayload::Failed(err) => {
                        entry["error"] = json!(ErrorEnvelope::from(err));
                    }
                    ResultPayload::Cancelled => {
                        entry["error"] = json!(ErrorEnvelope::cancelled(&result.tool_name));
                    }
                    ResultPayload::Progress(_) => {}
                }
                if !progress.is_empty() {
                    entry["progress"] = json!(progress);
                }
                entry
            })
            .collect();
        json!({
            "strategy": self.strategy,
            "cancelled": self.cancelled,
            "failures": self.failures(),
            "duration_ms": u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX),
            "results": results,
        })
    }
}

/// Runs batches of tool calls against a producer factory.
///
/// Each call to [`BatchExecutor::execute_batch`] is independent; nothing is
/// shared between batches besides the factory and configuration.
pub struct BatchExecutor {
    factory: Arc<dyn ProducerFactory>,
    classifier: Classifier,
    max_concurrency: usize,
    tx_event: Option<mpsc::Sender<Event>>,
    audit: Option<AuditLog>,
}

impl BatchExecutor {
    pub fn new(factory: Arc<dyn ProducerFactory>, classifier: Classifier) -> Self {
        Self {
            factory,
            classifier,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            tx_event: None,
            audit: None,
        }
    }

    /// Executor over `registry`, classifying tools by their declared capabilities.
    pub fn from_registry(registry: ToolRegistry) -> Self {
        let classifier = Classifier::from_registry(&registry);
        Self::new(Arc::new(registry), classifier)
    }

    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Send progress events to `tx_event`.
    ///
    /// The receiver must be drained; a full channel holds the batch back.
    #[must_use]
    pub fn with_events(mut self, tx_event: mpsc::Sender<Event>) -> Self {
        self.tx_event = Some(tx_event);
        self
    }

    #[must_use]
    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn classify(&self, tool_name: &str) -> Classification {
        self.classifier.classify(tool_name)
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn select_strategy(&self, batch: &ExecutionBatch) -> DispatchStrategy {
        select_strategy(batch, &self.classifier)
    }

    /// Execute `batch` and return its results in batch order.
    ///
    /// Tool failures and cancellation are reported per invocation. The only
    /// error is a broken scheduler invariant, which voids the whole batch.
    /// Cancelling `cancel` after this returns has no effect on the outcome.
    pub async fn execute_batch(
        &self,
        batch: &ExecutionBatch,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, SchedulerError> {
        let started_at = Instant::now();
        let batch_id = Uuid::new_v4().to_string();
        let strategy = self.select_strategy(batch);
        logging::info(format!(
            "Dispatching batch {batch_id}: {} tool call(s) {strategy} (max concurrency {})",
            batch.len(),
            self.max_concurrency
        ));
        self.record(
            "batch.dispatched",
            json!({
                "batch_id": batch_id,
                "strategy": strategy,
                "size": batch.len(),
                "tools": batch.iter().map(|inv| inv.tool_name.as_str()).collect::<Vec<_>>(),
            }),
        );
        self.emit(
            Event::BatchStarted {
                strategy,
                size: batch.len(),
            },
            cancel,
        )
        .await;
        if batch.len() > 1 {
            let message = match strategy {
                DispatchStrategy::Concurrent => {
                    format!("Executing {} read-only tools in parallel", batch.len())
                }
                DispatchStrategy::Sequential => {
                    "Executing tools sequentially (mutating or unknown tools detected)".to_string()
                }
            };
            self.emit(Event::status(message), cancel).await;
        }

        let factory = ObservedFactory {
            inner: self.factory.as_ref(),
            tx_event: self.tx_event.as_ref(),
        };
        let tagged: BoxStream<'_, Result<TaggedResult, SchedulerError>> = match strategy {
            DispatchStrategy::Concurrent => ConcurrentScheduler::new(&factory, self.max_concurrency)
                .run(batch, cancel.clone())
                .boxed(),
            DispatchStrategy::Sequential => SequentialRunner::new(&factory)
                .run(batch, cancel.clone())
                .boxed(),
        };

        let observed = tagged.then(move |item| async move {
            if let Ok(tagged) = &item {
                self.observe(&tagged.result, cancel).await;
            }
            item
        });
        let sequenced = match sequence(observed, batch, cancel).await {
            Ok(sequenced) => sequenced,
            Err(err) => {
                tracing::error!(error = %err, strategy = %strategy, "batch aborted");
                self.record(
                    "batch.failed",
                    json!({
                        "batch_id": batch_id,
                        "strategy": strategy,
                        "size": batch.len(),
                        "error": err.to_string(),
                    }),
                );
                return Err(err);
            }
        };

        for result in sequenced.results.iter().filter(|r| r.is_cancelled()) {
            self.emit(
                Event::ToolCallComplete {
                    id: result.invocation_id.clone(),
                    name: result.tool_name.clone(),
                    success: false,
                },
                cancel,
            )
            .await;
        }

        let outcome = BatchOutcome {
            strategy,
            cancelled: sequenced.cancelled(),
            results: sequenced.results,
            progress: sequenced.progress,
            duration: started_at.elapsed(),
        };
        let event = if outcome.cancelled {
            logging::warn(format!(
                "Batch cancelled after {:?}; {} call(s) without a result",
                outcome.duration,
                outcome.results.iter().filter(|r| r.is_cancelled()).count()
            ));
            "batch.cancelled"
        } else {
            logging::info(format!(
                "Batch finished in {:?} with {} failure(s)",
                outcome.duration,
                outcome.failures()
            ));
            "batch.completed"
        };
        self.record(
            event,
            json!({
                "batch_id": batch_id,
                "strategy": strategy,
                "size": batch.len(),
                "failures": outcome.failures(),
                "duration_ms": u64::try_from(outcome.duration.as_millis()).unwrap_or(u64::MAX),
            }),
        );
        self.emit(
            Event::BatchComplete {
                cancelled: outcome.cancelled,
            },
            cancel,
        )
        .await;
        Ok(outcome)
    }

    async fn observe(&self, result: &InvocationResult, cancel: &CancellationToken) {
        let event = match &result.payload {
            ResultPayload::Progress(output) => Event::ToolCallProgress {
                id: result.invocation_id.clone(),
                output: output.clone(),
            },
            _ => Event::ToolCallComplete {
                id: result.invocation_id.clone(),
                name: result.tool_name.clone(),
                success: !result.is_error(),
            },
        };
        self.emit(event, cancel).await;
    }

    /// Waits for channel capacity until `cancel` fires; after that events are
    /// only offered, so a stalled receiver cannot hold a cancelled batch.
    async fn emit(&self, event: Event, cancel: &CancellationToken) {
        let Some(tx_event) = &self.tx_event else {
            return;
        };
        if cancel.is_cancelled() {
            let _ = tx_event.try_send(event);
            return;
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => {}
            _ = tx_event.send(event) => {}
        }
    }

    fn record(&self, event: &str, details: serde_json::Value) {
        if let Some(audit) = &self.audit {
            audit.record(event, details);
        }
    }
}

/// Announces each producer start on the event channel.
struct ObservedFactory<'a> {
    inner: &'a dyn ProducerFactory,
    tx_event: Option<&'a mpsc::Sender<Event>>,
}

impl ProducerFactory for ObservedFactory<'_> {
    fn start(&self, invocation: &ToolInvocation) -> Box<dyn ToolProducer> {
        if let Some(tx_event) = self.tx_event
            && let Err(err) = tx_event.try_send(Event::ToolCallStarted {
                id: invocation.id.clone(),
                name: invocation.tool_name.clone(),
                input: invocation.parameters.clone(),
            })
        {
            tracing::debug!(id = %invocation.id, "dropped start event: {err}");
        }
        self.inner.start(invocation)
    }
}
