//! Recovery Layer: classifies errors into kinds with a retry
//! policy and attempts one in-band recovery action before handing control
//! back to the Session Agent.

use std::time::Duration;

use nexora_edit::EditError;
use nexora_protocol::SessionId;

use crate::error::NexoraErr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryKind {
    FileOutdated,
    EditFailed,
    Timeout,
    ResourceLimit,
    LoopDetected,
    Generic,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RecoveryKind {
    pub fn classify(err: &NexoraErr) -> Self {
        match err {
            NexoraErr::Edit(EditError::Stale) => RecoveryKind::FileOutdated,
            NexoraErr::Edit(_) => RecoveryKind::EditFailed,
            NexoraErr::ToolTimeout { .. } | NexoraErr::ContextDeadlineExceeded => RecoveryKind::Timeout,
            NexoraErr::Internal(msg) if msg.contains("resource") => RecoveryKind::ResourceLimit,
            _ => RecoveryKind::Generic,
        }
    }

    pub fn retry_policy(self) -> RetryPolicy {
        match self {
            RecoveryKind::FileOutdated => RetryPolicy { max_attempts: 1, backoff: Duration::from_millis(0) },
            RecoveryKind::EditFailed => RetryPolicy { max_attempts: 0, backoff: Duration::from_millis(0) },
            RecoveryKind::Timeout => RetryPolicy { max_attempts: 2, backoff: Duration::from_secs(2) },
            RecoveryKind::ResourceLimit => RetryPolicy { max_attempts: 1, backoff: Duration::from_secs(5) },
            RecoveryKind::LoopDetected => RetryPolicy { max_attempts: 0, backoff: Duration::from_millis(0) },
            RecoveryKind::Generic => RetryPolicy { max_attempts: 1, backoff: Duration::from_secs(1) },
        }
    }
}

/// What the recovery layer decided to do with a failed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// The caller must re-read the file before retrying.
    RequireReread,
    /// Schedule a retry with the same inputs after the kind's backoff.
    Retry,
    /// Defer to the state machine; the recovery layer does not retry loops itself.
    DeferToStateMachine,
    /// No recovery is possible; surface the error.
    GiveUp,
}

/// A pending retry for a session, produced by a successful recovery and
/// consumed by the next `Run` entry point as a continuation.

#[derive(Debug, Clone)]
pub struct RetryRequest {
    pub session_id: SessionId,
    pub kind: RecoveryKind,
}

pub fn recover(err: &NexoraErr) -> RecoveryAction {
    match RecoveryKind::classify(err) {
        RecoveryKind::FileOutdated => RecoveryAction::RequireReread,
        RecoveryKind::Timeout | RecoveryKind::ResourceLimit => RecoveryAction::Retry,
        RecoveryKind::LoopDetected => RecoveryAction::DeferToStateMachine,
        RecoveryKind::EditFailed | RecoveryKind::Generic => RecoveryAction::GiveUp,
    }
}
