//! Shared data model for the Nexora session agent core.
//!
//! Every type here is inert: construction, validation and persistence live
//! in `nexora-core`. Keeping the model in its own crate lets the edit
//! matcher, the tool registry and the session agent share one vocabulary
//! without a dependency cycle back into `nexora-core`.

pub mod edit_context;
pub mod ids;
pub mod message;
pub mod session;
pub mod shell;
pub mod state_machine;

pub use edit_context::EditContext;
pub use ids::MessageId;
pub use ids::SessionId;
pub use ids::ToolCallId;
pub use message::AssistantPart;
pub use message::ContentPart;
pub use message::FinishRecord;
pub use message::FinishReason;
pub use message::Message;
pub use message::MessageBody;
pub use message::Role;
pub use message::ToolCallPart;
pub use message::ToolResultContent;
pub use message::ToolResultPart;
pub use message::UserPart;
pub use session::Session;
pub use shell::BackgroundShell;
pub use shell::ShellState;
pub use state_machine::SessionState;
pub use state_machine::StateRecord;
pub use state_machine::ToolOutcome;
