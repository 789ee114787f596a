//! End-to-end batch execution through the registry and executor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use toolexec::core::{
    BatchExecutor, DispatchStrategy, ExecutionBatch, ResultPayload, ToolInvocation,
};
use toolexec::tools::producer::{self, ToolProducer};
use toolexec::tools::{
    ToolCapability, ToolContext, ToolError, ToolRegistryBuilder, ToolResult, ToolSpec,
};

#[derive(Default)]
struct Tracker {
    active: AtomicUsize,
    peak: AtomicUsize,
    log: Mutex<Vec<String>>,
}

impl Tracker {
    fn note(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Decrements the active count even when the work is dropped mid-flight.
struct ActiveGuard(Arc<Tracker>);

impl ActiveGuard {
    fn enter(tracker: Arc<Tracker>) -> Self {
        let now = tracker.active.fetch_add(1, Ordering::SeqCst) + 1;
        tracker.peak.fetch_max(now, Ordering::SeqCst);
        Self(tracker)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Sleeps for `delay_ms`, then echoes `label` or fails when `fail` is set.
struct ProbeTool {
    name: &'static str,
    read_only: bool,
    tracker: Arc<Tracker>,
}

impl ToolSpec for ProbeTool {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        "test probe"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }

    fn capabilities(&self) -> Vec<ToolCapability> {
        if self.read_only {
            vec![ToolCapability::ReadOnly]
        } else {
            vec![ToolCapability::WritesFiles]
        }
    }

    fn supports_parallel(&self) -> bool {
        self.read_only
    }

    fn start(&self, input: Value, _context: &ToolContext) -> Box<dyn ToolProducer> {
        let tracker = Arc::clone(&self.tracker);
        let label = input["label"].as_str().unwrap_or("?").to_string();
        let delay = input["delay_ms"].as_u64().unwrap_or(0);
        let fail = input["fail"].as_bool().unwrap_or(false);
        producer::once(async move {
            let _guard = ActiveGuard::enter(Arc::clone(&tracker));
            tracker.note(format!("begin:{label}"));
            tokio::time::sleep(Duration::from_millis(delay)).await;
            tracker.note(format!("end:{label}"));
            if fail {
                Err(ToolError::execution_failed(format!("{label} failed")))
            } else {
                Ok(ToolResult::success(label))
            }
        })
    }
}

fn probe_executor(dir: &std::path::Path) -> (Arc<Tracker>, BatchExecutor) {
    let tracker = Arc::new(Tracker::default());
    let registry = ToolRegistryBuilder::new(ToolContext::new(dir))
        .with_builtin_tools()
        .with_tool(ProbeTool {
            name: "probe_read",
            read_only: true,
            tracker: Arc::clone(&tracker),
        })
        .with_tool(ProbeTool {
            name: "probe_write",
            read_only: false,
            tracker: Arc::clone(&tracker),
        })
        .build();
    (tracker, BatchExecutor::from_registry(registry))
}

fn call(id: impl Into<String>, name: &str, input: Value) -> ToolInvocation {
    ToolInvocation::new(id, name, input)
}

fn ids(results: &[toolexec::core::InvocationResult]) -> Vec<String> {
    results.iter().map(|r| r.invocation_id.clone()).collect()
}

fn content(result: &toolexec::core::InvocationResult) -> &str {
    match &result.payload {
        ResultPayload::Output(output) => &output.content,
        other => panic!("expected output, got {other:?}"),
    }
}

#[tokio::test]
async fn two_reads_run_concurrently_and_return_in_request_order() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("file1.txt"), "first file").unwrap();
    std::fs::write(dir.path().join("file2.txt"), "second file").unwrap();
    let (_, executor) = probe_executor(dir.path());

    let batch = ExecutionBatch::new(vec![
        call("r1", "read_file", json!({"path": "file1.txt"})),
        call("r2", "read_file", json!({"path": "file2.txt"})),
    ]);
    let outcome = executor
        .execute_batch(&batch, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.strategy, DispatchStrategy::Concurrent);
    assert_eq!(ids(&outcome.results), vec!["r1", "r2"]);
    assert!(content(&outcome.results[0]).contains("first file"));
    assert!(content(&outcome.results[1]).contains("second file"));
}

#[tokio::test]
async fn slow_first_read_still_comes_back_first() {
    let dir = tempfile::tempdir().unwrap();
    let (tracker, executor) = probe_executor(dir.path());
    let batch = ExecutionBatch::new(vec![
        call("slow", "probe_read", json!({"label": "slow", "delay_ms": 80})),
        call("fast", "probe_read", json!({"label": "fast", "delay_ms": 1})),
    ]);
    let outcome = executor
        .execute_batch(&batch, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(ids(&outcome.results), vec!["slow", "fast"]);
    let log = tracker.log();
    let fast_end = log.iter().position(|e| e == "end:fast").unwrap();
    let slow_end = log.iter().position(|e| e == "end:slow").unwrap();
    assert!(fast_end < slow_end, "{log:?}");
}

#[tokio::test]
async fn read_then_edit_of_same_file_is_sequential() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("file1.txt"), "fn old() {}\n").unwrap();
    let (_, executor) = probe_executor(dir.path());

    let batch = ExecutionBatch::new(vec![
        call("read", "read_file", json!({"path": "file1.txt"})),
        call(
            "edit",
            "edit_file",
            json!({"path": "file1.txt", "search": "old", "replace": "new"}),
        ),
    ]);
    let outcome = executor
        .execute_batch(&batch, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.strategy, DispatchStrategy::Sequential);
    assert!(content(&outcome.results[0]).contains("fn old()"));
    assert!(!outcome.results[1].is_error());
    let edited = std::fs::read_to_string(dir.path().join("file1.txt")).unwrap();
    assert_eq!(edited, "fn new() {}\n");
}

#[tokio::test]
async fn mutating_call_serializes_every_call_in_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let (tracker, executor) = probe_executor(dir.path());
    let batch = ExecutionBatch::new(vec![
        call("a", "probe_read", json!({"label": "a", "delay_ms": 30})),
        call("b", "probe_write", json!({"label": "b", "delay_ms": 1})),
        call("c", "probe_read", json!({"label": "c", "delay_ms": 1})),
    ]);
    let outcome = executor
        .execute_batch(&batch, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.strategy, DispatchStrategy::Sequential);
    assert_eq!(tracker.peak(), 1);
    assert_eq!(
        tracker.log(),
        vec!["begin:a", "end:a", "begin:b", "end:b", "begin:c", "end:c"]
    );
}

#[tokio::test]
async fn fifteen_reads_respect_a_ceiling_of_ten() {
    let dir = tempfile::tempdir().unwrap();
    let (tracker, executor) = probe_executor(dir.path());
    let executor = executor.with_max_concurrency(10);
    let batch: ExecutionBatch = (0..15)
        .map(|i| {
            call(
                format!("call-{i}"),
                "probe_read",
                json!({"label": format!("{i}"), "delay_ms": 10 + (i % 5) * 6}),
            )
        })
        .collect();
    let outcome = executor
        .execute_batch(&batch, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 15);
    assert!(tracker.peak() <= 10, "peak was {}", tracker.peak());
    assert_eq!(tracker.peak(), 10);
    let expected: Vec<String> = (0..15).map(|i| format!("call-{i}")).collect();
    assert_eq!(ids(&outcome.results), expected);
    assert_eq!(outcome.failures(), 0);
}

#[tokio::test]
async fn one_failure_leaves_the_other_results_intact() {
    let dir = tempfile::tempdir().unwrap();
    let (_, executor) = probe_executor(dir.path());
    let batch: ExecutionBatch = (1..=5)
        .map(|i| {
            call(
                format!("call-{i}"),
                "probe_read",
                json!({"label": format!("r{i}"), "delay_ms": 5 * (6 - i), "fail": i == 3}),
            )
        })
        .collect();
    let outcome = executor
        .execute_batch(&batch, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.strategy, DispatchStrategy::Concurrent);
    assert_eq!(outcome.results.len(), 5);
    let errors: Vec<bool> = outcome.results.iter().map(|r| r.is_error()).collect();
    assert_eq!(errors, vec![false, false, true, false, false]);
    assert!(matches!(
        &outcome.results[2].payload,
        ResultPayload::Failed(ToolError::ExecutionFailed { message }) if message == "r3 failed"
    ));
    for (index, label) in [(0, "r1"), (1, "r2"), (3, "r4"), (4, "r5")] {
        assert_eq!(content(&outcome.results[index]), label);
    }
}

#[tokio::test]
async fn order_is_restored_for_any_completion_timing() {
    let dir = tempfile::tempdir().unwrap();
    for limit in [1, 3, 12] {
        let (_, executor) = probe_executor(dir.path());
        let executor = executor.with_max_concurrency(limit);
        let batch: ExecutionBatch = (0..12u64)
            .map(|i| {
                call(
                    format!("id-{i}"),
                    "probe_read",
                    json!({"label": format!("{i}"), "delay_ms": (i * 7919) % 23}),
                )
            })
            .collect();
        let outcome = executor
            .execute_batch(&batch, &CancellationToken::new())
            .await
            .unwrap();
        let expected: Vec<String> = batch.iter().map(|inv| inv.id.clone()).collect();
        assert_eq!(ids(&outcome.results), expected, "limit {limit}");
    }
}

#[tokio::test]
async fn unknown_tool_fails_alone_and_serializes_batch() {
    let dir = tempfile::tempdir().unwrap();
    let (_, executor) = probe_executor(dir.path());
    let batch = ExecutionBatch::new(vec![
        call("a", "probe_read", json!({"label": "a"})),
        call("b", "does_not_exist", json!({})),
    ]);
    let outcome = executor
        .execute_batch(&batch, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.strategy, DispatchStrategy::Sequential);
    assert!(!outcome.results[0].is_error());
    assert!(matches!(
        outcome.results[1].payload,
        ResultPayload::Failed(ToolError::NotAvailable { .. })
    ));
}

#[tokio::test]
async fn cancelling_after_completion_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (_, executor) = probe_executor(dir.path());
    let batch = ExecutionBatch::new(vec![
        call("a", "probe_read", json!({"label": "a"})),
        call("b", "probe_read", json!({"label": "b"})),
    ]);
    let cancel = CancellationToken::new();
    let outcome = executor.execute_batch(&batch, &cancel).await.unwrap();
    cancel.cancel();
    cancel.cancel();

    assert!(!outcome.cancelled);
    assert_eq!(outcome.failures(), 0);
    assert!(outcome.results.iter().all(|r| !r.is_cancelled()));
}

#[tokio::test]
async fn cancellation_mid_batch_reports_unfinished_calls_as_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let (tracker, executor) = probe_executor(dir.path());
    let batch = ExecutionBatch::new(vec![
        call("quick", "probe_read", json!({"label": "quick", "delay_ms": 1})),
        call("stuck", "probe_read", json!({"label": "stuck", "delay_ms": 60_000})),
    ]);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        executor.execute_batch(&batch, &cancel),
    )
    .await
    .expect("cancelled batch should return promptly")
    .unwrap();

    assert!(outcome.cancelled);
    assert_eq!(ids(&outcome.results), vec!["quick", "stuck"]);
    assert!(!outcome.results[0].is_cancelled());
    assert!(outcome.results[1].is_cancelled());
    assert_eq!(tracker.active.load(Ordering::SeqCst), 0);
}
