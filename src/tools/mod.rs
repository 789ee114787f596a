//! Tool system modules and re-exports.

// === Modules ===

pub mod file;
pub mod producer;
pub mod registry;
pub mod search;
pub mod shell;
pub mod spec;

// === Re-exports ===

// Re-export commonly used types from spec
pub use spec::{ToolCapability, ToolContext, ToolError, ToolResult, ToolSpec};

// Re-export producer types
pub use producer::{ToolProducer, ToolUpdate, UpdateSink};

// Re-export registry types
pub use registry::{ToolRegistry, ToolRegistryBuilder};

// Re-export file tools
pub use file::{EditFileTool, ListDirTool, ReadFileTool, WriteFileTool};

// Re-export search tools
pub use search::GrepFilesTool;

// Re-export shell tools
pub use shell::ExecShellTool;
