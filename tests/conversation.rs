//! Conversation loop driven by canned model replies against real tools.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use toolexec::config::Config;
use toolexec::core::turn::{ConversationLoop, ModelReply, ScriptedModel, TurnMessage, TurnStatus};
use toolexec::core::{BatchExecutor, Classifier, Event, parse_batch_json};
use toolexec::tools::{ToolContext, ToolRegistryBuilder};

fn replies(script: serde_json::Value) -> Vec<ModelReply> {
    serde_json::from_value(script).unwrap()
}

fn executor_for(workspace: &std::path::Path) -> BatchExecutor {
    let registry = ToolRegistryBuilder::new(ToolContext::new(workspace))
        .with_builtin_tools()
        .build();
    BatchExecutor::from_registry(registry)
}

#[tokio::test]
async fn write_then_read_across_two_steps() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::new(replies(json!([
        {
            "text": "creating notes",
            "tool_calls": [
                {"id": "w", "name": "write_file", "input": {"path": "notes/todo.md", "content": "- ship it\n"}}
            ]
        },
        {
            "text": "checking",
            "tool_calls": [
                {"id": "r", "name": "read_file", "input": {"path": "notes/todo.md"}},
                {"id": "g", "name": "grep_files", "input": {"pattern": "ship"}}
            ]
        },
        {"text": "done"}
    ]))));

    let turn = ConversationLoop::new(model.clone(), executor_for(dir.path()));
    let outcome = turn.run("write a todo list", &CancellationToken::new()).await;

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(outcome.steps, 3);
    assert_eq!(outcome.final_text, "done");

    let results: Vec<(String, bool)> = outcome
        .messages
        .iter()
        .filter_map(|m| match m {
            TurnMessage::ToolResult {
                call_id, is_error, ..
            } => Some((call_id.clone(), *is_error)),
            _ => None,
        })
        .collect();
    assert_eq!(
        results,
        vec![
            ("w".to_string(), false),
            ("r".to_string(), false),
            ("g".to_string(), false),
        ]
    );
    assert_eq!(model.transcripts().len(), 3);
}

#[tokio::test]
async fn tool_errors_reach_the_model_as_text() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::new(replies(json!([
        {"tool_calls": [{"id": "x", "name": "read_file", "input": {}}]},
        {"text": "sorry"}
    ]))));
    let turn = ConversationLoop::new(model.clone(), executor_for(dir.path()));
    let outcome = turn.run("read something", &CancellationToken::new()).await;

    assert_eq!(outcome.status, TurnStatus::Completed);
    let rendered = outcome.messages.iter().find_map(|m| match m {
        TurnMessage::ToolResult {
            content, is_error, ..
        } => Some((content.clone(), *is_error)),
        _ => None,
    });
    assert_eq!(
        rendered,
        Some((
            "Tool 'read_file' is missing required field 'path'".to_string(),
            true
        ))
    );
}

#[tokio::test]
async fn config_overrides_reach_the_executor() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::from_toml_str(
        "[scheduler]\nmax_concurrency = 2\n\n[tools]\nmutating = [\"read_file\"]\n",
    )
    .unwrap();
    config.validate().unwrap();

    let registry = ToolRegistryBuilder::new(ToolContext::new(dir.path()))
        .with_builtin_tools()
        .build();
    let classifier = config.apply_overrides(Classifier::from_registry(&registry));
    let (tx, mut rx) = mpsc::channel(64);
    let executor = BatchExecutor::from_registry(registry)
        .with_classifier(classifier)
        .with_max_concurrency(config.max_concurrency())
        .with_events(tx);
    assert_eq!(executor.max_concurrency(), 2);

    std::fs::write(dir.path().join("a.txt"), "a").unwrap();
    let batch = parse_batch_json(
        r#"[{"name": "read_file", "input": {"path": "a.txt"}}, {"name": "list_dir"}]"#,
    )
    .unwrap();
    let outcome = executor
        .execute_batch(&batch, &CancellationToken::new())
        .await
        .unwrap();
    drop(executor);

    let mut strategies = Vec::new();
    while let Some(event) = rx.recv().await {
        if let Event::BatchStarted { strategy, .. } = event {
            strategies.push(strategy.to_string());
        }
    }
    assert_eq!(strategies, vec!["sequential"]);
    assert_eq!(outcome.failures(), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn shell_output_streams_as_progress() {
    let dir = tempfile::tempdir().unwrap();
    let batch = parse_batch_json(
        r#"[{"id": "sh", "name": "exec_shell", "input": {"command": "echo one; echo two"}}]"#,
    )
    .unwrap();
    let outcome = executor_for(dir.path())
        .execute_batch(&batch, &CancellationToken::new())
        .await
        .unwrap();
    assert!(!outcome.results[0].is_error());
    assert_eq!(outcome.progress[0], vec!["one".to_string(), "two".to_string()]);
}
