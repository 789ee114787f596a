//! Configuration loading and defaults for toolexec.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::audit::AuditLog;
use crate::core::classifier::{Classification, Classifier};
use crate::core::scheduler::DEFAULT_MAX_CONCURRENCY;
use crate::core::turn::DEFAULT_MAX_STEPS;
use crate::tools::ToolContext;

pub const DEFAULT_SHELL_TIMEOUT_SECS: u64 = 120;

// === Types ===

/// `[scheduler]` table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchedulerConfig {
    pub max_concurrency: Option<usize>,
}

/// `[tools]` table: classification overrides by tool name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub read_only: Vec<String>,
    #[serde(default)]
    pub mutating: Vec<String>,
}

/// `[audit]` table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditConfig {
    pub path: Option<String>,
}

/// Raw configuration loaded from `config.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    pub workspace: Option<String>,
    pub shell_timeout_secs: Option<u64>,
    pub max_steps: Option<u32>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

impl Config {
    /// Load configuration from disk and merge with environment overrides.
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = resolve_load_config_path(path);
        let mut config = match path.as_ref() {
            Some(path) if path.exists() => Self::from_file(path)?,
            _ => Config::default(),
        };
        apply_env_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Reject settings the executor cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_concurrency == Some(0) {
            anyhow::bail!("scheduler.max_concurrency must be at least 1");
        }
        if self.max_steps == Some(0) {
            anyhow::bail!("max_steps must be at least 1");
        }
        if self.shell_timeout_secs == Some(0) {
            anyhow::bail!("shell_timeout_secs must be at least 1");
        }
        if let Some(workspace) = self.workspace.as_deref()
            && workspace.trim().is_empty()
        {
            anyhow::bail!("workspace cannot be empty string");
        }
        let read_only: HashSet<&str> = self.tools.read_only.iter().map(String::as_str).collect();
        if let Some(name) = self
            .tools
            .mutating
            .iter()
            .find(|name| read_only.contains(name.as_str()))
        {
            anyhow::bail!("Tool '{name}' is listed as both read_only and mutating");
        }
        Ok(())
    }

    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.scheduler
            .max_concurrency
            .unwrap_or(DEFAULT_MAX_CONCURRENCY)
    }

    #[must_use]
    pub fn max_steps(&self) -> u32 {
        self.max_steps.unwrap_or(DEFAULT_MAX_STEPS)
    }

    #[must_use]
    pub fn shell_timeout_secs(&self) -> u64 {
        self.shell_timeout_secs
            .unwrap_or(DEFAULT_SHELL_TIMEOUT_SECS)
    }

    /// Configured workspace, or the current directory.
    pub fn workspace(&self) -> Result<PathBuf> {
        match self.workspace.as_deref() {
            Some(raw) => Ok(expand_path(raw)),
            None => std::env::current_dir().context("Failed to resolve current directory"),
        }
    }

    pub fn audit_path(&self) -> Option<PathBuf> {
        self.audit.path.as_deref().map(expand_path)
    }

    pub fn audit_log(&self) -> Option<AuditLog> {
        self.audit_path().map(AuditLog::new)
    }

    pub fn tool_context(&self) -> Result<ToolContext> {
        Ok(ToolContext::new(self.workspace()?).with_shell_timeout(self.shell_timeout_secs()))
    }

    /// `[tools]` overrides as classifier entries.
    pub fn classification_overrides(&self) -> Vec<(String, Classification)> {
        let read_only = self
            .tools
            .read_only
            .iter()
            .map(|name| (name.clone(), Classification::ReadOnly));
        let mutating = self
            .tools
            .mutating
            .iter()
            .map(|name| (name.clone(), Classification::Mutating));
        read_only.chain(mutating).collect()
    }

    /// Apply `[tools]` overrides on top of `classifier`.
    #[must_use]
    pub fn apply_overrides(&self, classifier: Classifier) -> Classifier {
        classifier.with_overrides(self.classification_overrides())
    }
}

// === Environment ===

/// Apply `TOOLEXEC_*` overrides from the process environment.
pub fn apply_env_overrides(config: &mut Config) {
    apply_env_overrides_with(config, |key| std::env::var(key).ok());
}

/// Apply `TOOLEXEC_*` overrides read through `lookup`.
pub fn apply_env_overrides_with<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(value) = non_empty("TOOLEXEC_MAX_CONCURRENCY") {
        match value.trim().parse::<usize>() {
            Ok(parsed) => config.scheduler.max_concurrency = Some(parsed),
            Err(_) => crate::logging::warn(format!(
                "Ignoring TOOLEXEC_MAX_CONCURRENCY={value}: not a number"
            )),
        }
    }
    if let Some(value) = non_empty("TOOLEXEC_WORKSPACE") {
        config.workspace = Some(value);
    }
    if let Some(value) = non_empty("TOOLEXEC_AUDIT_LOG") {
        config.audit.path = Some(value);
    }
}

// === Defaults ===

fn home_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".toolexec").join("config.toml"))
}

fn env_config_path() -> Option<PathBuf> {
    let path = std::env::var("TOOLEXEC_CONFIG_PATH").ok()?;
    let trimmed = path.trim();
    (!trimmed.is_empty()).then(|| expand_path(trimmed))
}

fn resolve_load_config_path(path: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = path {
        return Some(expand_pathbuf(path));
    }
    env_config_path().or_else(home_config_path)
}

fn expand_pathbuf(path: PathBuf) -> PathBuf {
    if let Some(raw) = path.to_str() {
        return expand_path(raw);
    }
    path
}

fn expand_path(path: &str) -> PathBuf {
    let expanded = shellexpand::tilde(path);
    PathBuf::from(expanded.as_ref())
}
