//! Conversation loop: ask the model, run the tools it asks for, feed the
//! ordered results back, repeat.
//!
//! The model itself is behind [`ModelClient`]; this module only cares that
//! tool calls arrive as a batch and ordered results go back before the next
//! request.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::logging;
use crate::tools::ToolError;

use super::batch::{
    ExecutionBatch, InvocationResult, ResultPayload, ToolInvocation, normalize_tool_name,
};
use super::executor::BatchExecutor;

pub const DEFAULT_MAX_STEPS: u32 = 32;

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelToolCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub input: Value,
}

/// One model response: text plus any tool calls to run before continuing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelReply {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<ModelToolCall>,
}

/// Transcript entry sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum TurnMessage {
    User {
        content: String,
    },
    Assistant {
        content: String,
        tool_calls: Vec<ModelToolCall>,
    },
    ToolResult {
        call_id: String,
        content: String,
        is_error: bool,
    },
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn respond(&self, messages: &[TurnMessage]) -> anyhow::Result<ModelReply>;
}

/// Final status for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    Interrupted,
    Failed,
    StepLimit,
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub status: TurnStatus,
    pub steps: u32,
    pub messages: Vec<TurnMessage>,
    /// Text of the last model reply.
    pub final_text: String,
    pub error: Option<String>,
}

pub struct ConversationLoop<M> {
    model: M,
    executor: BatchExecutor,
    max_steps: u32,
}

impl<M: ModelClient> ConversationLoop<M> {
    pub fn new(model: M, executor: BatchExecutor) -> Self {
        Self {
            model,
            executor,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    #[must_use]
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn executor(&self) -> &BatchExecutor {
        &self.executor
    }

    pub async fn run(&self, prompt: impl Into<String>, cancel: &CancellationToken) -> TurnOutcome {
        let mut turn = TurnState::new(prompt.into());

        loop {
            if cancel.is_cancelled() {
                return turn.finish(TurnStatus::Interrupted, None);
            }
            if turn.steps >= self.max_steps {
                logging::warn(format!("Turn stopped after {} step(s)", turn.steps));
                return turn.finish(TurnStatus::StepLimit, None);
            }
            turn.steps += 1;

            let reply = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                reply = self.model.respond(&turn.messages) => Some(reply),
            };
            let reply = match reply {
                None => return turn.finish(TurnStatus::Interrupted, None),
                Some(Ok(reply)) => reply,
                Some(Err(err)) => {
                    logging::warn(format!("Model request failed: {err:#}"));
                    return turn.finish(TurnStatus::Failed, Some(format!("{err:#}")));
                }
            };

            let batch = match build_batch(&reply.tool_calls, turn.steps) {
                Ok(batch) => batch,
                Err(message) => {
                    logging::warn(&message);
                    return turn.finish(TurnStatus::Failed, Some(message));
                }
            };
            turn.final_text.clone_from(&reply.text);
            turn.messages.push(TurnMessage::Assistant {
                content: reply.text,
                tool_calls: batch
                    .iter()
                    .map(|inv| ModelToolCall {
                        id: inv.id.clone(),
                        name: inv.tool_name.clone(),
                        input: inv.parameters.clone(),
                    })
                    .collect(),
            });
            if batch.is_empty() {
                return turn.finish(TurnStatus::Completed, None);
            }

            let outcome = match self.executor.execute_batch(&batch, cancel).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::error!(error = %err, "tool batch failed");
                    return turn.finish(TurnStatus::Failed, Some(err.to_string()));
                }
            };
            for result in &outcome.results {
                turn.messages.push(TurnMessage::ToolResult {
                    call_id: result.invocation_id.clone(),
                    content: render_result(result),
                    is_error: result.is_error(),
                });
            }
            if outcome.cancelled {
                return turn.finish(TurnStatus::Interrupted, None);
            }
        }
    }
}

struct TurnState {
    steps: u32,
    messages: Vec<TurnMessage>,
    final_text: String,
}

impl TurnState {
    fn new(prompt: String) -> Self {
        Self {
            steps: 0,
            messages: vec![TurnMessage::User { content: prompt }],
            final_text: String::new(),
        }
    }

    fn finish(self, status: TurnStatus, error: Option<String>) -> TurnOutcome {
        TurnOutcome {
            status,
            steps: self.steps,
            messages: self.messages,
            final_text: self.final_text,
            error,
        }
    }
}

/// Turn model tool calls into a batch, filling in missing ids.
///
/// Results are matched back to calls by id, so a reply that reuses an id is
/// refused.
fn build_batch(calls: &[ModelToolCall], step: u32) -> Result<ExecutionBatch, String> {
    let batch: ExecutionBatch = calls
        .iter()
        .enumerate()
        .map(|(i, call)| {
            let id = if call.id.trim().is_empty() {
                format!("call-{step}-{i}")
            } else {
                call.id.clone()
            };
            ToolInvocation::new(id, normalize_tool_name(&call.name), call.input.clone())
        })
        .collect();
    match batch.duplicate_id() {
        Some((index, id)) => Err(format!(
            "Model reused tool call id '{id}' at position {index}"
        )),
        None => Ok(batch),
    }
}

/// Text the model sees for one final result.
pub fn render_result(result: &InvocationResult) -> String {
    match &result.payload {
        ResultPayload::Output(output) => output.content.clone(),
        ResultPayload::Failed(err) => format_tool_error(err, &result.tool_name),
        ResultPayload::Cancelled => format!(
            "Tool '{}' was cancelled before it produced a result.",
            result.tool_name
        ),
        ResultPayload::Progress(output) => output.clone(),
    }
}

/// Actionable rendering of a tool failure.
pub fn format_tool_error(err: &ToolError, tool_name: &str) -> String {
    match err {
        ToolError::InvalidInput { message } => {
            format!("Invalid input for tool '{tool_name}': {message}")
        }
        ToolError::MissingField { field } => {
            format!("Tool '{tool_name}' is missing required field '{field}'")
        }
        ToolError::PathEscape { path } => format!(
            "Path escapes workspace: {}. Use a workspace-relative path.",
            path.display()
        ),
        ToolError::ExecutionFailed { message } => message.clone(),
        ToolError::Timeout { seconds } => format!(
            "Tool '{tool_name}' timed out after {seconds}s. Try a narrower scope or a longer timeout."
        ),
        ToolError::NotAvailable { message } => {
            format!("Tool '{tool_name}' is not available: {message}. Check the tool name.")
        }
    }
}

/// Replays canned replies in order; once they run out it answers with an
/// empty reply, which ends the turn.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<ModelReply>>,
    transcripts: Mutex<Vec<Vec<TurnMessage>>>,
}

impl ScriptedModel {
    pub fn new(replies: impl IntoIterator<Item = ModelReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            transcripts: Mutex::new(Vec::new()),
        }
    }

    /// Every transcript the model was asked to respond to.
    pub fn transcripts(&self) -> Vec<Vec<TurnMessage>> {
        self.transcripts
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn respond(&self, messages: &[TurnMessage]) -> anyhow::Result<ModelReply> {
        if let Ok(mut transcripts) = self.transcripts.lock() {
            transcripts.push(messages.to_vec());
        }
        let mut replies = self
            .replies
            .lock()
            .map_err(|_| anyhow::anyhow!("scripted model state poisoned"))?;
        Ok(replies.pop_front().unwrap_or_default())
    }
}

#[async_trait]
impl<M: ModelClient + ?Sized> ModelClient for std::sync::Arc<M> {
    async fn respond(&self, messages: &[TurnMessage]) -> anyhow::Result<ModelReply> {
        (**self).respond(messages).await
    }
}
