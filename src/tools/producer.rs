//! Incremental result producers.
//!
//! Every admitted invocation is driven through a [`ToolProducer`]: the engine
//! repeatedly asks for the next update until the producer reports the end of
//! its stream. Producers are finite, not restartable, and expected to watch the
//! cancellation token between updates.

use std::future::Future;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::spec::{ToolError, ToolResult};

/// Capacity of the channel behind [`streaming`] producers.
const STREAM_BUFFER: usize = 32;

/// One item pulled from a producer.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolUpdate {
    /// Intermediate output (progress lines, partial matches).
    Progress(String),
    /// The final result for this invocation.
    Done(ToolResult),
}

/// Pull-based producer for a single invocation.
#[async_trait]
pub trait ToolProducer: Send {
    /// Produce the next update, or `None` once the stream is exhausted.
    ///
    /// An `Err` is the producer's failure; nothing after it is requested.
    async fn next_update(
        &mut self,
        cancel: &CancellationToken,
    ) -> Option<Result<ToolUpdate, ToolError>>;
}

// === One-shot ===

struct OneShotProducer {
    work: Option<BoxFuture<'static, Result<ToolResult, ToolError>>>,
}

#[async_trait]
impl ToolProducer for OneShotProducer {
    async fn next_update(
        &mut self,
        cancel: &CancellationToken,
    ) -> Option<Result<ToolUpdate, ToolError>> {
        let work = self.work.take()?;
        tokio::select! {
            () = cancel.cancelled() => None,
            result = work => Some(result.map(ToolUpdate::Done)),
        }
    }
}

/// Wrap a future that yields a single final result.
///
/// The future is not polled until the first update is requested.
pub fn once<F>(work: F) -> Box<dyn ToolProducer>
where
    F: Future<Output = Result<ToolResult, ToolError>> + Send + 'static,
{
    Box::new(OneShotProducer {
        work: Some(Box::pin(work)),
    })
}

// === Failing ===

struct FailedProducer {
    error: Option<ToolError>,
}

#[async_trait]
impl ToolProducer for FailedProducer {
    async fn next_update(
        &mut self,
        _cancel: &CancellationToken,
    ) -> Option<Result<ToolUpdate, ToolError>> {
        self.error.take().map(Err)
    }
}

/// Producer that fails immediately with `error`.
pub fn failed(error: ToolError) -> Box<dyn ToolProducer> {
    Box::new(FailedProducer { error: Some(error) })
}

// === Streaming ===

/// Write half handed to streaming tool bodies.
#[derive(Clone)]
pub struct UpdateSink {
    tx: mpsc::Sender<Result<ToolUpdate, ToolError>>,
}

impl UpdateSink {
    /// Send a progress line. Returns false once the consumer is gone.
    pub async fn progress(&self, output: impl Into<String>) -> bool {
        self.tx
            .send(Ok(ToolUpdate::Progress(output.into())))
            .await
            .is_ok()
    }

    /// Blocking variant of [`Self::progress`] for use inside `spawn_blocking`.
    pub fn blocking_progress(&self, output: impl Into<String>) -> bool {
        self.tx
            .blocking_send(Ok(ToolUpdate::Progress(output.into())))
            .is_ok()
    }

    /// Send the terminal item (final result or failure).
    pub async fn finish(&self, result: Result<ToolResult, ToolError>) {
        let _ = self.tx.send(result.map(ToolUpdate::Done)).await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

type StreamBody = Box<dyn FnOnce(UpdateSink, CancellationToken) -> BoxFuture<'static, ()> + Send>;

struct StreamingProducer {
    body: Option<StreamBody>,
    rx: Option<mpsc::Receiver<Result<ToolUpdate, ToolError>>>,
}

#[async_trait]
impl ToolProducer for StreamingProducer {
    async fn next_update(
        &mut self,
        cancel: &CancellationToken,
    ) -> Option<Result<ToolUpdate, ToolError>> {
        if let Some(body) = self.body.take() {
            let (tx, rx) = mpsc::channel(STREAM_BUFFER);
            self.rx = Some(rx);
            tokio::spawn(body(UpdateSink { tx }, cancel.clone()));
        }
        let rx = self.rx.as_mut()?;
        tokio::select! {
            () = cancel.cancelled() => None,
            item = rx.recv() => item,
        }
    }
}

/// Producer backed by a background task that reports through an [`UpdateSink`].
///
/// The task is spawned on the first pull and receives the invocation's
/// cancellation token; the stream ends when the task drops its sink.
pub fn streaming<F, Fut>(body: F) -> Box<dyn ToolProducer>
where
    F: FnOnce(UpdateSink, CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Box::new(StreamingProducer {
        body: Some(Box::new(move |sink, cancel| Box::pin(body(sink, cancel)))),
        rx: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(mut producer: Box<dyn ToolProducer>) -> Vec<Result<ToolUpdate, ToolError>> {
        let cancel = CancellationToken::new();
        let mut items = Vec::new();
        while let Some(item) = producer.next_update(&cancel).await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn once_yields_single_final_result() {
        let items = drain(once(async { Ok(ToolResult::success("hello")) })).await;
        assert_eq!(items, vec![Ok(ToolUpdate::Done(ToolResult::success("hello")))]);
    }

    #[tokio::test]
    async fn failed_yields_error_then_ends() {
        let items = drain(failed(ToolError::not_available("nope"))).await;
        assert_eq!(items, vec![Err(ToolError::not_available("nope"))]);
    }

    #[tokio::test]
    async fn streaming_forwards_progress_before_final() {
        let producer = streaming(|sink, _cancel| async move {
            sink.progress("one").await;
            sink.progress("two").await;
            sink.finish(Ok(ToolResult::success("done"))).await;
        });
        let items = drain(producer).await;
        assert_eq!(
            items,
            vec![
                Ok(ToolUpdate::Progress("one".to_string())),
                Ok(ToolUpdate::Progress("two".to_string())),
                Ok(ToolUpdate::Done(ToolResult::success("done"))),
            ]
        );
    }

    #[tokio::test]
    async fn once_stops_when_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut producer = once(std::future::pending());
        assert!(producer.next_update(&cancel).await.is_none());
    }
}
