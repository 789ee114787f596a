//! Batch data model: invocations in, tagged results out.

use std::collections::HashSet;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::tools::spec::{ToolError, ToolResult};

/// A single requested tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub id: String,
    pub tool_name: String,
    pub parameters: Value,
}

impl ToolInvocation {
    pub fn new(id: impl Into<String>, tool_name: impl Into<String>, parameters: Value) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            parameters,
        }
    }
}

/// Strip the namespace prefixes models like to put in front of tool names.
pub fn normalize_tool_name(raw: &str) -> String {
    let mut name = raw.trim();
    for prefix in ["functions.", "tools.", "tool."] {
        if let Some(stripped) = name.strip_prefix(prefix) {
            name = stripped;
            break;
        }
    }
    name.to_string()
}

/// Ordered invocations received together from one model turn.
///
/// Batch order is the order results are delivered in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionBatch {
    invocations: Vec<ToolInvocation>,
}

impl ExecutionBatch {
    pub fn new(invocations: Vec<ToolInvocation>) -> Self {
        Self { invocations }
    }

    pub fn len(&self) -> usize {
        self.invocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invocations.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ToolInvocation> {
        self.invocations.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ToolInvocation> {
        self.invocations.iter()
    }

    pub fn invocations(&self) -> &[ToolInvocation] {
        &self.invocations
    }

    /// First invocation whose id was already used earlier in the batch.
    pub fn duplicate_id(&self) -> Option<(usize, &str)> {
        let mut seen = HashSet::new();
        self.invocations
            .iter()
            .enumerate()
            .find(|(_, inv)| !seen.insert(inv.id.as_str()))
            .map(|(index, inv)| (index, inv.id.as_str()))
    }
}

impl FromIterator<ToolInvocation> for ExecutionBatch {
    fn from_iter<I: IntoIterator<Item = ToolInvocation>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// One entry of a batch file.
#[derive(Debug, Deserialize)]
struct BatchEntry {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    input: Value,
}

/// Parse a JSON array of `{id?, name, input}` objects into a batch.
///
/// Missing ids become `call-<n>` and tool names are normalized. Duplicate ids
/// are rejected since results are matched back to calls by id.
pub fn parse_batch_json(text: &str) -> Result<ExecutionBatch> {
    let entries: Vec<BatchEntry> =
        serde_json::from_str(text).context("Batch must be a JSON array of {id?, name, input}")?;
    let mut invocations = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let id = entry
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("call-{index}"));
        let name = normalize_tool_name(&entry.name);
        if name.is_empty() {
            anyhow::bail!("Call '{id}' has an empty tool name");
        }
        invocations.push(ToolInvocation::new(id, name, entry.input));
    }
    let batch = ExecutionBatch::new(invocations);
    if let Some((index, id)) = batch.duplicate_id() {
        anyhow::bail!("Duplicate call id '{id}' at position {index}");
    }
    Ok(batch)
}

impl<'a> IntoIterator for &'a ExecutionBatch {
    type Item = &'a ToolInvocation;
    type IntoIter = std::slice::Iter<'a, ToolInvocation>;

    fn into_iter(self) -> Self::IntoIter {
        self.invocations.iter()
    }
}

/// What an invocation produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultPayload {
    /// Intermediate output; never final.
    Progress(String),
    /// Tool output. `success` may still be false for soft failures.
    Output(ToolResult),
    /// The producer failed.
    Failed(ToolError),
    /// Cancelled before a final result arrived.
    Cancelled,
}

/// One result attributed to an invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationResult {
    pub invocation_id: String,
    pub tool_name: String,
    pub payload: ResultPayload,
    pub is_final: bool,
}

impl InvocationResult {
    pub fn progress(invocation: &ToolInvocation, output: String) -> Self {
        Self::with_payload(invocation, ResultPayload::Progress(output), false)
    }

    pub fn output(invocation: &ToolInvocation, result: ToolResult) -> Self {
        Self::with_payload(invocation, ResultPayload::Output(result), true)
    }

    pub fn failed(invocation: &ToolInvocation, error: ToolError) -> Self {
        Self::with_payload(invocation, ResultPayload::Failed(error), true)
    }

    pub fn cancelled(invocation: &ToolInvocation) -> Self {
        Self::with_payload(invocation, ResultPayload::Cancelled, true)
    }

    fn with_payload(invocation: &ToolInvocation, payload: ResultPayload, is_final: bool) -> Self {
        Self {
            invocation_id: invocation.id.clone(),
            tool_name: invocation.tool_name.clone(),
            payload,
            is_final,
        }
    }

    /// True when this result should be read as "the call did not succeed".
    pub fn is_error(&self) -> bool {
        match &self.payload {
            ResultPayload::Output(result) => !result.success,
            ResultPayload::Failed(_) | ResultPayload::Cancelled => true,
            ResultPayload::Progress(_) => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.payload, ResultPayload::Cancelled)
    }
}

/// A result tagged with the batch position of its invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedResult {
    pub batch_index: usize,
    pub result: InvocationResult,
}
