//! Lightweight audit trail for dispatched batches.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::{Value, json};

/// Append-only JSON-lines audit log.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.toolexec/audit.log`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".toolexec").join("audit.log"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an event. Best-effort: a failed write is logged, never returned.
    pub fn record(&self, event: &str, details: Value) {
        if let Err(err) = self.append(event, details) {
            crate::logging::warn(format!(
                "audit log write to {} failed: {err}",
                self.path.display()
            ));
        }
    }

    fn append(&self, event: &str, details: Value) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let record = json!({
            "ts": Utc::now().to_rfc3339(),
            "event": event,
            "details": details,
        });
        writeln!(file, "{}", serde_json::to_string(&record)?)?;
        Ok(())
    }
}
