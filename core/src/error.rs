use std::io;

use nexora_edit::EditError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, NexoraErr>;

/// Whether the caller should retry an operation that failed with this error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retryability {
    Retryable,
    NonRetryable,
}

#[derive(Error, Debug)]
pub enum NexoraErr {
    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("no session id present in context")]
    SessionMissing,

    #[error("session is busy processing a previous request")]
    SessionBusy,

    #[error("session queue is full")]
    QueueFull,

    #[error("permission denied for tool {tool_name}")]
    PermissionDenied { tool_name: String },

    #[error("tool {tool_name} timed out after {elapsed_ms}ms")]
    ToolTimeout { tool_name: String, elapsed_ms: u64 },

    #[error("tool {tool_name} failed: {detail}")]
    ToolExecutionFailed { tool_name: String, detail: String },

    #[error(transparent)]
    Edit(#[from] EditError),

    #[error("command blocked for security reasons: {reason}")]
    ShellBlocked { reason: String },

    #[error("failed to start shell command: {0}")]
    ShellStartupFailed(String),

    #[error("shell command interrupted")]
    ShellInterrupted,

    #[error("operation canceled")]
    ContextCanceled,

    #[error("operation exceeded its deadline")]
    ContextDeadlineExceeded,

    #[error("connection to {target} failed: {detail}")]
    ConnectionFailed { target: String, detail: String },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("no conversation with id: {0}")]
    SessionNotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl NexoraErr {
    /// Stable string tag for this error kind, used by callers that need to
    /// branch on error identity without matching the whole enum.
    pub fn kind(&self) -> &'static str {
        match self {
            NexoraErr::EmptyPrompt => "EmptyPrompt",
            NexoraErr::SessionMissing => "SessionMissing",
            NexoraErr::SessionBusy => "SessionBusy",
            NexoraErr::QueueFull => "QueueFull",
            NexoraErr::PermissionDenied { .. } => "PermissionDenied",
            NexoraErr::ToolTimeout { .. } => "ToolTimeout",
            NexoraErr::ToolExecutionFailed { .. } => "ToolExecutionFailed",
            NexoraErr::Edit(e) => e.kind(),
            NexoraErr::ShellBlocked { .. } => "ShellBlocked",
            NexoraErr::ShellStartupFailed(_) => "ShellStartupFailed",
            NexoraErr::ShellInterrupted => "ShellInterrupted",
            NexoraErr::ContextCanceled => "ContextCanceled",
            NexoraErr::ContextDeadlineExceeded => "ContextDeadlineExceeded",
            NexoraErr::ConnectionFailed { .. } => "ConnectionFailed",
            NexoraErr::Io(_) => "Io",
            NexoraErr::Json(_) => "Json",
            NexoraErr::SessionNotFound(_) => "SessionNotFound",
            NexoraErr::Internal(_) => "Internal",
        }
    }

    /// Classification used by the Recovery Layer to decide whether a
    /// bounded retry makes sense.
    pub fn retryability(&self) -> Retryability {
        match self {
            NexoraErr::ToolTimeout { .. } | NexoraErr::ConnectionFailed { .. } | NexoraErr::ContextDeadlineExceeded => {
                Retryability::Retryable
            }
            NexoraErr::Edit(EditError::Stale) => Retryability::Retryable,
            _ => Retryability::NonRetryable,
        }
    }
}
