//! Tool name → read-only / mutating classification.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::tools::ToolRegistry;

/// Whether a tool can alter shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    ReadOnly,
    Mutating,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::ReadOnly => f.write_str("read-only"),
            Classification::Mutating => f.write_str("mutating"),
        }
    }
}

/// Classifies tool names. Names it has never heard of are `Mutating`.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    known: HashMap<String, Classification>,
}

impl Classifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from registered tools: read-only iff the tool declares
    /// `ReadOnly` and supports parallel execution.
    pub fn from_registry(registry: &ToolRegistry) -> Self {
        let known = registry
            .specs()
            .map(|spec| {
                let class = if spec.is_read_only() && spec.supports_parallel() {
                    Classification::ReadOnly
                } else {
                    Classification::Mutating
                };
                (spec.name().to_string(), class)
            })
            .collect();
        Self { known }
    }

    /// Force a classification for `name`, overriding what the registry says.
    #[must_use]
    pub fn with_override(mut self, name: impl Into<String>, class: Classification) -> Self {
        self.known.insert(name.into(), class);
        self
    }

    #[must_use]
    pub fn with_overrides<I>(self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (String, Classification)>,
    {
        overrides
            .into_iter()
            .fold(self, |acc, (name, class)| acc.with_override(name, class))
    }

    pub fn classify(&self, tool_name: &str) -> Classification {
        self.known
            .get(tool_name)
            .copied()
            .unwrap_or(Classification::Mutating)
    }
}
