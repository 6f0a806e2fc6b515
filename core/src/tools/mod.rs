//! Tool Registry: canonical names, the runtime-mutable alias map, the hook
//! chain, and the built-in tools wired against the rest of the crate.

pub mod builtins;
pub mod hooks;
pub mod registry;
pub mod spec;

pub use builtins::BashTool;
pub use builtins::EditTool;
pub use builtins::FetchTool;
pub use builtins::FileContextStore;
pub use builtins::JobKillTool;
pub use builtins::JobOutputTool;
pub use builtins::ViewTool;
pub use registry::Tool;
pub use registry::ToolInvocationContext;
pub use registry::ToolKind;
pub use registry::ToolRegistry;
