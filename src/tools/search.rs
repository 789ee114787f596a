//! Regex search across the workspace: `grep_files`.

use std::path::Path;

use ignore::WalkBuilder;
use regex::Regex;
use serde::Serialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use super::producer::{self, ToolProducer, UpdateSink};
use super::spec::{
    ToolCapability, ToolContext, ToolError, ToolResult, ToolSpec, optional_str, optional_u64,
    required_str,
};

const DEFAULT_MAX_MATCHES: u64 = 200;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
struct SearchMatch {
    path: String,
    line: usize,
    text: String,
}

#[derive(Debug, Serialize)]
struct SearchOutput {
    pattern: String,
    matches: Vec<SearchMatch>,
    truncated: bool,
}

pub struct GrepFilesTool;

impl ToolSpec for GrepFilesTool {
    fn name(&self) -> &'static str {
        "grep_files"
    }

    fn description(&self) -> &'static str {
        "Search workspace files for a regex, honouring .gitignore."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string" },
                "path": { "type": "string" },
                "max_matches": { "type": "integer", "minimum": 1 }
            },
            "required": ["pattern"]
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
        producer::streaming(move |sink, cancel| async move {
            let prepared = prepare(&input, &context);
            let (pattern, regex, root, max_matches) = match prepared {
                Ok(prepared) => prepared,
                Err(err) => {
                    sink.finish(Err(err)).await;
                    return;
                }
            };
            let walk_sink = sink.clone();
            let workspace = context.workspace.clone();
            let walked = tokio::task::spawn_blocking(move || {
                search_tree(&root, &workspace, &regex, max_matches, &walk_sink, &cancel)
            })
            .await;
            let result = match walked {
                Ok(Ok((matches, truncated))) => ToolResult::json(&SearchOutput {
                    pattern,
                    matches,
                    truncated,
                })
                .map_err(|e| ToolError::execution_failed(e.to_string())),
                Ok(Err(err)) => Err(err),
                Err(join) => Err(ToolError::execution_failed(format!(
                    "search task failed: {join}"
                ))),
            };
            sink.finish(result).await;
        })
    }
}

fn prepare(
    input: &Value,
    context: &ToolContext,
) -> Result<(String, Regex, std::path::PathBuf, usize), ToolError> {
    let pattern = required_str(input, "pattern")?.to_string();
    let regex = Regex::new(&pattern)
        .map_err(|e| ToolError::invalid_input(format!("Invalid regex: {e}")))?;
    let root = context.resolve_path(optional_str(input, "path").unwrap_or("."))?;
    if !root.exists() {
        return Err(ToolError::execution_failed(format!(
            "search root does not exist: {}",
            root.display()
        )));
    }
    let max_matches = usize::try_from(optional_u64(input, "max_matches", DEFAULT_MAX_MATCHES))
        .unwrap_or(usize::MAX);
    Ok((pattern, regex, root, max_matches))
}

fn search_tree(
    root: &Path,
    workspace: &Path,
    regex: &Regex,
    max_matches: usize,
    sink: &UpdateSink,
    cancel: &CancellationToken,
) -> Result<(Vec<SearchMatch>, bool), ToolError> {
    let mut matches = Vec::new();
    for entry in WalkBuilder::new(root).hidden(false).build() {
        if cancel.is_cancelled() || sink.is_closed() {
            break;
        }
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_some_and(|kind| kind.is_file()) {
            continue;
        }
        let Ok(text) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        let display = entry
            .path()
            .strip_prefix(workspace)
            .unwrap_or(entry.path())
            .display()
            .to_string();
        let before = matches.len();
        for (idx, line) in text.lines().enumerate() {
            if regex.is_match(line) {
                if matches.len() >= max_matches {
                    return Ok((matches, true));
                }
                matches.push(SearchMatch {
                    path: display.clone(),
                    line: idx + 1,
                    text: line.trim_end().to_string(),
                });
            }
        }
        let found = matches.len() - before;
        if found > 0 {
            sink.blocking_progress(format!("{display}: {found} match(es)"));
        }
    }
    Ok((matches, false))
}
