//! File tools: `read_file`, `list_dir`, `write_file`, `edit_file`.

use std::path::PathBuf;

use serde::Serialize;
use serde_json::{Value, json};

use super::producer::{self, ToolProducer};
use super::spec::{
    ToolCapability, ToolContext, ToolError, ToolResult, ToolSpec, optional_str, optional_u64,
    required_str,
};

/// Default read cap for `read_file`.
const DEFAULT_MAX_READ_BYTES: u64 = 256 * 1024;

fn io_error(action: &str, path: &std::path::Path, err: std::io::Error) -> ToolError {
    ToolError::execution_failed(format!("Failed to {action} {}: {err}", path.display()))
}

// === read_file ===

pub struct ReadFileTool;

impl ToolSpec for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> &'static str {
        "Read a UTF-8 file from the workspace."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "max_bytes": { "type": "integer", "minimum": 1 }
            },
            "required": ["path"]
        })
    }

    fn capabilities(&self) -> Vec<ToolCapability> {
        vec![ToolCapability::ReadOnly, ToolCapability::Sandboxable]
    }

    fn supports_parallel(&self) -> bool {
        true
    }

    fn start(&self, input: Value, context: &ToolContext) -> Box<dyn ToolProducer> {
        let context = context.clone();
        producer::once(async move {
            let path = context.resolve_path(required_str(&input, "path")?)?;
            let max_bytes = optional_u64(&input, "max_bytes", DEFAULT_MAX_READ_BYTES);
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|err| io_error("read", &path, err))?;
            let truncated = bytes.len() as u64 > max_bytes;
            let keep = usize::try_from(max_bytes).unwrap_or(usize::MAX).min(bytes.len());
            let text = String::from_utf8_lossy(&bytes[..keep]).into_owned();
            Ok(ToolResult::success(text).with_metadata(json!({
                "path": path.display().to_string(),
                "bytes": bytes.len(),
                "truncated": truncated,
            })))
        })
    }
}

// === list_dir ===

pub struct ListDirTool;

impl ToolSpec for ListDirTool {
    fn name(&self) -> &'static str {
        "list_dir"
    }

    fn description(&self) -> &'static str {
        "List entries of a workspace directory. Directories end with '/'."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string" } }
        })
    }

    fn capabilities(&self) -> Vec<ToolCapability> {
        vec![ToolCapability::ReadOnly, ToolCapability::Sandboxable]
    }

    fn supports_parallel(&self) -> bool {
        true
    }

    fn start(&self, input: Value, context: &ToolContext) -> Box<dyn ToolProducer> {
        let context = context.clone();
        producer::once(async move {
            let path = context.resolve_path(optional_str(&input, "path").unwrap_or("."))?;
            let mut reader = tokio::fs::read_dir(&path)
                .await
                .map_err(|err| io_error("list", &path, err))?;
            let mut entries = Vec::new();
            while let Some(entry) = reader
                .next_entry()
                .await
                .map_err(|err| io_error("list", &path, err))?
            {
                let mut name = entry.file_name().to_string_lossy().into_owned();
                if entry.file_type().await.is_ok_and(|kind| kind.is_dir()) {
                    name.push('/');
                }
                entries.push(name);
            }
            entries.sort();
            Ok(ToolResult::success(entries.join("\n")))
        })
    }
}

// === write_file ===

#[derive(Debug, Serialize)]
struct WriteSummary {
    path: String,
    bytes_written: usize,
    created: bool,
}

pub struct WriteFileTool;

impl ToolSpec for WriteFileTool {
    fn name(&self) -> &'static str {
        "write_file"
    }

    fn description(&self) -> &'static str {
        "Create or overwrite a workspace file."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["path", "content"]
        })
    }

    fn capabilities(&self) -> Vec<ToolCapability> {
        vec![ToolCapability::WritesFiles, ToolCapability::Sandboxable]
    }

    fn start(&self, input: Value, context: &ToolContext) -> Box<dyn ToolProducer> {
        let context = context.clone();
        producer::once(async move {
            let path = context.resolve_path(required_str(&input, "path")?)?;
            let content = required_str(&input, "content")?;
            let created = !tokio::fs::try_exists(&path).await.unwrap_or(false);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|err| io_error("create directory for", &path, err))?;
            }
            tokio::fs::write(&path, content)
                .await
                .map_err(|err| io_error("write", &path, err))?;
            ToolResult::json(&WriteSummary {
                path: display_relative(&context, &path),
                bytes_written: content.len(),
                created,
            })
            .map_err(|e| ToolError::execution_failed(e.to_string()))
        })
    }
}

// === edit_file ===

pub struct EditFileTool;

impl ToolSpec for EditFileTool {
    fn name(&self) -> &'static str {
        "edit_file"
    }

    fn description(&self) -> &'static str {
        "Replace exactly one occurrence of `search` with `replace` in a workspace file."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "search": { "type": "string" },
                "replace": { "type": "string" }
            },
            "required": ["path", "search", "replace"]
        })
    }

    fn capabilities(&self) -> Vec<ToolCapability> {
        vec![ToolCapability::WritesFiles, ToolCapability::Sandboxable]
    }

    fn start(&self, input: Value, context: &ToolContext) -> Box<dyn ToolProducer> {
        let context = context.clone();
        producer::once(async move {
            let path = context.resolve_path(required_str(&input, "path")?)?;
            let search = required_str(&input, "search")?;
            let replace = required_str(&input, "replace")?;
            if search.is_empty() {
                return Err(ToolError::invalid_input("`search` must not be empty"));
            }
            let original = tokio::fs::read_to_string(&path)
                .await
                .map_err(|err| io_error("read", &path, err))?;
            let updated = replace_once(&original, search, replace)?;
            tokio::fs::write(&path, updated)
                .await
                .map_err(|err| io_error("write", &path, err))?;
            Ok(ToolResult::success(format!(
                "Edited {}",
                display_relative(&context, &path)
            )))
        })
    }
}

fn replace_once(text: &str, search: &str, replace: &str) -> Result<String, ToolError> {
    match text.matches(search).count() {
        0 => Err(ToolError::execution_failed(
            "search text not found; re-read the file and retry with exact text",
        )),
        1 => Ok(text.replacen(search, replace, 1)),
        n => Err(ToolError::execution_failed(format!(
            "search text matches {n} times; include more context to make it unique"
        ))),
    }
}

fn display_relative(context: &ToolContext, path: &std::path::Path) -> String {
    path.strip_prefix(&context.workspace)
        .map(PathBuf::from)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}
