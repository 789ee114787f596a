//! Tool registry: name → spec lookup and producer construction.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use super::file::{EditFileTool, ListDirTool, ReadFileTool, WriteFileTool};
use super::producer::{self, ToolProducer};
use super::search::GrepFilesTool;
use super::shell::ExecShellTool;
use super::spec::{ToolContext, ToolError, ToolSpec};

/// Registered tools plus the context they execute in.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn ToolSpec>>,
    context: ToolContext,
}

impl ToolRegistry {
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolSpec>> {
        self.tools.get(name)
    }

    pub fn context(&self) -> &ToolContext {
        &self.context
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn specs(&self) -> impl Iterator<Item = &Arc<dyn ToolSpec>> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Build the producer for one invocation.
    ///
    /// Unknown tools still get a producer so the failure surfaces as that
    /// invocation's result instead of aborting the batch.
    pub fn start(&self, name: &str, input: Value) -> Box<dyn ToolProducer> {
        match self.tools.get(name) {
            Some(spec) => spec.start(input, &self.context),
            None => producer::failed(ToolError::not_available(format!(
                "tool '{name}' is not registered"
            ))),
        }
    }
}

/// Builder for [`ToolRegistry`].
pub struct ToolRegistryBuilder {
    tools: BTreeMap<String, Arc<dyn ToolSpec>>,
    context: ToolContext,
}

impl ToolRegistryBuilder {
    pub fn new(context: ToolContext) -> Self {
        Self {
            tools: BTreeMap::new(),
            context,
        }
    }

    /// Register a tool, replacing any previous tool with the same name.
    #[must_use]
    pub fn with_tool(mut self, tool: impl ToolSpec + 'static) -> Self {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
        self
    }

    #[must_use]
    pub fn with_read_only_file_tools(self) -> Self {
        self.with_tool(ReadFileTool)
            .with_tool(ListDirTool)
            .with_tool(GrepFilesTool)
    }

    #[must_use]
    pub fn with_file_tools(self) -> Self {
        self.with_read_only_file_tools()
            .with_tool(WriteFileTool)
            .with_tool(EditFileTool)
    }

    #[must_use]
    pub fn with_shell_tools(self) -> Self {
        self.with_tool(ExecShellTool)
    }

    /// Every built-in tool.
    #[must_use]
    pub fn with_builtin_tools(self) -> Self {
        self.with_file_tools().with_shell_tools()
    }

    pub fn build(self) -> ToolRegistry {
        ToolRegistry {
            tools: self.tools,
            context: self.context,
        }
    }
}
