//! Tool registry and builtin sandbox tools.

pub mod builtin;
pub mod registry;

pub use builtin::{PythonTool, ShellTool};
pub use registry::{Tool, ToolContext, ToolGate, ToolRegistry};
