//! Tool contract shared by the registry, the built-in tools, and the engine.

use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use super::producer::ToolProducer;

// === Types ===

/// Capabilities a tool declares about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCapability {
    /// Never alters shared state (files, processes, remote services).
    ReadOnly,
    /// Creates, overwrites, or edits files.
    WritesFiles,
    /// Spawns processes or evaluates code.
    ExecutesCode,
    /// Can run inside a sandbox.
    Sandboxable,
}

/// Execution context handed to every tool.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Root directory all path inputs are resolved against.
    pub workspace: PathBuf,
    /// Default timeout for `exec_shell`.
    pub shell_timeout_secs: u64,
}

impl ToolContext {
    /// Context rooted at `workspace`, made absolute against the current
    /// directory.
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        let workspace = workspace.into();
        let workspace = std::path::absolute(&workspace)
            .ok()
            .and_then(|absolute| normalize_lexically(&absolute))
            .unwrap_or(workspace);
        Self {
            workspace,
            shell_timeout_secs: 120,
        }
    }

    #[must_use]
    pub fn with_shell_timeout(mut self, seconds: u64) -> Self {
        self.shell_timeout_secs = seconds;
        self
    }

    /// Resolve a tool-supplied path inside the workspace.
    ///
    /// Relative paths are joined onto the workspace and `..` components are
    /// folded lexically. Anything that lands outside the root is a
    /// [`ToolError::PathEscape`].
    pub fn resolve_path(&self, raw: &str) -> Result<PathBuf, ToolError> {
        let escape = || ToolError::path_escape(PathBuf::from(raw));
        let root = std::path::absolute(&self.workspace)
            .ok()
            .and_then(|root| normalize_lexically(&root))
            .ok_or_else(escape)?;
        let candidate = Path::new(raw);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            root.join(candidate)
        };
        match normalize_lexically(&joined) {
            Some(normalized) if normalized.starts_with(&root) => Ok(normalized),
            _ => Err(escape()),
        }
    }
}

/// Fold `.` and `..` without touching the filesystem. `None` when a `..`
/// climbs past the root.
fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}

/// Successful (or soft-failed) tool output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub content: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            success: true,
            metadata: None,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            success: false,
            metadata: None,
        }
    }

    /// Serialize `value` as pretty JSON content.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::success(serde_json::to_string_pretty(value)?))
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Errors a tool producer can fail with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("missing required field '{field}'")]
    MissingField { field: String },
    #[error("path escapes workspace: {}", path.display())]
    PathEscape { path: PathBuf },
    #[error("{message}")]
    ExecutionFailed { message: String },
    #[error("timed out after {seconds}s")]
    Timeout { seconds: u64 },
    #[error("not available: {message}")]
    NotAvailable { message: String },
}

impl ToolError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    pub fn path_escape(path: PathBuf) -> Self {
        Self::PathEscape { path }
    }

    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            message: message.into(),
        }
    }

    pub fn not_available(message: impl Into<String>) -> Self {
        Self::NotAvailable {
            message: message.into(),
        }
    }
}

/// A tool the engine can run.
///
/// `start` must not perform the work itself; it returns a lazy producer the
/// scheduler pulls from once the invocation is admitted.
pub trait ToolSpec: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn input_schema(&self) -> Value;

    fn capabilities(&self) -> Vec<ToolCapability>;

    fn supports_parallel(&self) -> bool {
        false
    }

    fn is_read_only(&self) -> bool {
        self.capabilities().contains(&ToolCapability::ReadOnly)
    }

    fn start(&self, input: Value, context: &ToolContext) -> Box<dyn ToolProducer>;
}

// === Input helpers ===

pub fn required_str<'a>(input: &'a Value, field: &str) -> Result<&'a str, ToolError> {
    input
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::missing_field(field))
}

pub fn optional_str<'a>(input: &'a Value, field: &str) -> Option<&'a str> {
    input.get(field).and_then(Value::as_str)
}

pub fn optional_u64(input: &Value, field: &str, default: u64) -> u64 {
    input.get(field).and_then(Value::as_u64).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolve_path_rejects_parent_escape() {
        let ctx = ToolContext::new("/work/repo");
        assert_eq!(
            ctx.resolve_path("src/lib.rs").unwrap(),
            PathBuf::from("/work/repo/src/lib.rs")
        );
        assert_eq!(
            ctx.resolve_path("src/../Cargo.toml").unwrap(),
            PathBuf::from("/work/repo/Cargo.toml")
        );
        assert!(matches!(
            ctx.resolve_path("../outside.txt"),
            Err(ToolError::PathEscape { .. })
        ));
        assert!(ctx.resolve_path("/etc/passwd").is_err());
    }

    #[test]
    fn relative_workspace_still_confines_paths() {
        let ctx = ToolContext::new(".");
        let cwd = std::env::current_dir().unwrap();
        assert!(ctx.workspace.is_absolute());
        assert_eq!(ctx.resolve_path("src/lib.rs").unwrap(), cwd.join("src/lib.rs"));
        assert!(matches!(
            ctx.resolve_path("/etc/passwd"),
            Err(ToolError::PathEscape { .. })
        ));
        assert!(matches!(
            ctx.resolve_path("../secret"),
            Err(ToolError::PathEscape { .. })
        ));
    }

    #[test]
    fn relative_workspace_assigned_after_construction_is_confined() {
        let mut ctx = ToolContext::new("/work/repo");
        ctx.workspace = PathBuf::from("sub");
        assert!(matches!(
            ctx.resolve_path("/etc/passwd"),
            Err(ToolError::PathEscape { .. })
        ));
        assert!(matches!(
            ctx.resolve_path("../../outside"),
            Err(ToolError::PathEscape { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn climbing_past_the_filesystem_root_is_an_escape() {
        let ctx = ToolContext::new("/");
        assert!(matches!(
            ctx.resolve_path("../../etc"),
            Err(ToolError::PathEscape { .. })
        ));
        assert_eq!(ctx.resolve_path("etc").unwrap(), PathBuf::from("/etc"));
    }

    #[test]
    fn input_helpers_report_missing_fields() {
        let input = json!({"path": "a.txt", "limit": 3});
        assert_eq!(required_str(&input, "path").unwrap(), "a.txt");
        assert_eq!(
            required_str(&input, "pattern"),
            Err(ToolError::missing_field("pattern"))
        );
        assert_eq!(optional_u64(&input, "limit", 10), 3);
        assert_eq!(optional_u64(&input, "other", 10), 10);
        assert_eq!(optional_str(&input, "nope"), None);
    }
}
