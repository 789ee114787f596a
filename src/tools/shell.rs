//! Shell execution tool: `exec_shell`.
//!
//! Commands run under the workspace root. Stdout is streamed line by line as
//! progress; the final result carries the exit code and captured output. The
//! child is killed when the invocation is cancelled or times out.

use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;

use super::producer::{self, ToolProducer, UpdateSink};
use super::spec::{
    ToolCapability, ToolContext, ToolError, ToolResult, ToolSpec, optional_u64, required_str,
};

/// Hard cap on captured output kept in the final result.
const MAX_OUTPUT_CHARS: usize = 40_000;
/// Longer stdout lines are split into several progress updates.
const MAX_LINE_BYTES: u64 = 16 * 1024;
/// Upper bound on a caller-supplied timeout.
const MAX_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Serialize)]
struct ShellOutput {
    command: String,
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
    truncated: bool,
}

pub struct ExecShellTool;

impl ToolSpec for ExecShellTool {
    fn name(&self) -> &'static str {
        "exec_shell"
    }

    fn description(&self) -> &'static str {
        "Run a shell command in the workspace and stream its stdout."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string" },
                "timeout_secs": { "type": "integer", "minimum": 1, "maximum": MAX_TIMEOUT_SECS }
            },
            "required": ["command"]
        })
    }

    fn capabilities(&self) -> Vec<ToolCapability> {
        vec![ToolCapability::ExecutesCode, ToolCapability::Sandboxable]
    }

    fn start(&self, input: Value, context: &ToolContext) -> Box<dyn ToolProducer> {
        let context = context.clone();
        producer::streaming(move |sink, cancel| async move {
            let command = match required_str(&input, "command") {
                Ok(command) => command.to_string(),
                Err(err) => {
                    sink.finish(Err(err)).await;
                    return;
                }
            };
            let timeout_secs = optional_u64(&input, "timeout_secs", context.shell_timeout_secs)
                .clamp(1, MAX_TIMEOUT_SECS);
            let result = tokio::select! {
                () = cancel.cancelled() => return,
                outcome = tokio::time::timeout(
                    Duration::from_secs(timeout_secs),
                    run_command(&command, &context, &sink),
                ) => match outcome {
                    Ok(result) => result,
                    Err(_) => Err(ToolError::Timeout { seconds: timeout_secs }),
                },
            };
            sink.finish(result).await;
        })
    }
}

fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

async fn run_command(
    command: &str,
    context: &ToolContext,
    sink: &UpdateSink,
) -> Result<ToolResult, ToolError> {
    let mut child = shell_command(command)
        .current_dir(&context.workspace)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ToolError::execution_failed(format!("Failed to spawn `{command}`: {e}")))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ToolError::execution_failed("stdout was not captured"))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| ToolError::execution_failed("stderr was not captured"))?;

    let stderr_task = tokio::spawn(async move { read_capped(&mut stderr).await });

    let mut captured = CappedText::new(MAX_OUTPUT_CHARS);
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = (&mut reader)
            .take(MAX_LINE_BYTES)
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| ToolError::execution_failed(format!("Failed to read stdout: {e}")))?;
        if read == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf)
            .trim_end_matches(['\n', '\r'])
            .to_string();
        captured.push_line(&line);
        sink.progress(line).await;
    }

    let status = child
        .wait()
        .await
        .map_err(|e| ToolError::execution_failed(format!("Failed to wait for `{command}`: {e}")))?;
    let stderr = stderr_task.await.unwrap_or_default();

    let (stderr, truncated_err) = truncate_chars(&stderr, MAX_OUTPUT_CHARS);
    let output = ShellOutput {
        command: command.to_string(),
        exit_code: status.code(),
        truncated: captured.truncated || truncated_err,
        stdout: captured.text,
        stderr,
    };

    if status.success() {
        ToolResult::json(&output).map_err(|e| ToolError::execution_failed(e.to_string()))
    } else {
        let code = output
            .exit_code
            .map_or_else(|| "signal".to_string(), |code| code.to_string());
        let detail = if output.stderr.trim().is_empty() {
            output.stdout.trim().to_string()
        } else {
            output.stderr.trim().to_string()
        };
        Err(ToolError::execution_failed(format!(
            "Command `{command}` exited with {code}: {detail}"
        )))
    }
}

/// Captured stdout that stops growing at `limit` chars.
struct CappedText {
    text: String,
    chars: usize,
    limit: usize,
    truncated: bool,
}

impl CappedText {
    fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            chars: 0,
            limit,
            truncated: false,
        }
    }

    fn push_line(&mut self, line: &str) {
        if self.truncated {
            return;
        }
        let remaining = self.limit - self.chars;
        let needed = line.chars().count() + 1;
        if needed <= remaining {
            self.text.push_str(line);
            self.text.push('\n');
            self.chars += needed;
        } else {
            self.text.extend(line.chars().take(remaining));
            self.chars = self.limit;
            self.truncated = true;
        }
    }
}

/// Drain `reader` to EOF, keeping only the first bytes up to the output cap.
async fn read_capped(reader: &mut (impl AsyncRead + Unpin)) -> String {
    let cap = MAX_OUTPUT_CHARS * 4;
    let mut kept = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = cap.saturating_sub(kept.len());
                kept.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
    String::from_utf8_lossy(&kept).into_owned()
}

fn truncate_chars(text: &str, limit: usize) -> (String, bool) {
    if text.chars().count() <= limit {
        return (text.to_string(), false);
    }
    (text.chars().take(limit).collect(), true)
}
