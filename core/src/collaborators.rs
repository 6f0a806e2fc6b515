//! External collaborator contracts. The Session Agent Core
//! consumes these as pure traits; concrete language-model adapters, UI
//! permission prompts, and persistence layers are out of scope.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use nexora_protocol::Message;
use nexora_protocol::MessageId;
use nexora_protocol::Session;
use nexora_protocol::SessionId;
use nexora_protocol::ToolCallId;
use nexora_protocol::ToolResultContent;
use serde_json::Value;

pub use nexora_edit::DiagnosticsProvider;
pub use nexora_edit::ExternalResolver;
pub use nexora_edit::FileHistory;
use nexora_protocol::ToolOutcome;

use crate::error::Result;

#[derive(Debug, Clone)]
pub enum ModelEvent {
    ReasoningStart,
    ReasoningDelta { text: String },
    ReasoningEnd { signature: Option<String> },
    TextDelta { text: String },
    ToolInputStart { tool_name: String },
    ToolCall { id: ToolCallId, tool_name: String, input: Value },
    ToolResult { id: ToolCallId, content: ToolResultContent },
    StepFinish { reason: ProviderFinishReason, prompt_tokens: u64, completion_tokens: u64, cost: f64, cache_metadata: Option<String> },
    Retry { status_code: Option<u16>, delay: Option<Duration> },
    /// The stream ended abnormally before a `StepFinish` arrived. The
    /// Session Agent synthesizes tool-results for every pending tool-call
    /// and maps this to a finish reason.
    Error(StreamErrorReason),
}

#[derive(Debug, Clone)]
pub enum StreamErrorReason {
    Canceled,
    PermissionDenied,
    Provider { title: String, detail: String },
}

/// Raw finish-reason vocabulary as reported by a provider, before the
/// Session Agent maps it onto [`nexora_protocol::FinishReason`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFinishReason {
    MaxTokens,
    EndTurn,
    ToolUse,
    Unknown,
}

#[derive(Debug, Clone, Default)]
pub struct SamplingParams {
    pub temperature: Option<f64>,
    pub max_output_tokens: Option<u64>,
    pub extra: Value,
}

/// Language-model collaborator: streams events for one request.

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn stream(&self, system_prompt: Option<&str>, history: &[Message], sampling: &SamplingParams) -> async_channel::Receiver<ModelEvent>;
}

#[derive(Debug, Clone)]
pub struct PermissionRequest {
    pub session_id: SessionId,
    pub path: Option<std::path::PathBuf>,
    pub tool_call_id: Option<ToolCallId>,
    pub tool_name: String,
    pub action: String,
    pub description: String,
    pub params: Value,
}

/// Permission service collaborator: blocking yes/no per request.

#[async_trait]
pub trait PermissionService: Send + Sync {
    async fn request(&self, request: PermissionRequest) -> bool;
}

/// Message store collaborator.

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create(&self, message: Message) -> Result<()>;
    async fn update(&self, message: Message) -> Result<()>;
    async fn list(&self, session_id: SessionId) -> Result<Vec<Message>>;
    async fn delete(&self, id: MessageId) -> Result<()>;
    async fn get_by_path_and_session(&self, session_id: SessionId, path: &Path) -> Result<Vec<Message>>;
}

/// Session store collaborator.

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session_id: SessionId) -> Result<Session>;
    async fn get(&self, session_id: SessionId) -> Result<Option<Session>>;
    async fn save(&self, session: &Session) -> Result<()>;
}

/// Advisory loop detector. Detections surface a system message but never
/// halt the step on their own.
#[async_trait]
pub trait LoopDetector: Send + Sync {
    async fn detect(&self, recent_outcomes: &[ToolOutcome]) -> Option<String>;
}

/// Advisory drift detector.
#[async_trait]
pub trait DriftDetector: Send + Sync {
    async fn detect(&self, recent_text: &str, task_context: &str) -> Option<String>;
}

/// HTTP fetch collaborator: the `fetch` tool is a thin wrapper around this
/// contract rather than a concrete HTTP client, since the wire format and
/// redirect/robots policy are deliberately out of scope.

#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> std::result::Result<String, String>;
}
