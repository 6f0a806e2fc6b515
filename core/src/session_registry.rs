//! Per-session concurrency bookkeeping: cancellation handles and
//! the bounded FIFO prompt queue, protected by a concurrent-safe map so the
//! streaming task and any background detector can share them.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use nexora_protocol::SessionId;
use tokio_util::sync::CancellationToken;

use crate::error::NexoraErr;
use crate::error::Result;

/// One queued prompt awaiting its turn once the session's active step
/// finishes.

#[derive(Debug, Clone)]
pub struct QueuedPrompt {
    pub text: String,
    pub attachments: Vec<String>,
}

struct SessionEntry {
    cancel: CancellationToken,
    /// Keyed by a `sessionID + "-summarize"` convention in the source spec;
    /// modeled here as a sibling token rather than a string-keyed lookup.
    summarize_cancel: CancellationToken,
    queue: VecDeque<QueuedPrompt>,
}

pub struct SessionRegistry {
    queue_cap: usize,
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new(queue_cap: usize) -> Self {
        Self { queue_cap, sessions: Mutex::new(HashMap::new()) }
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Returns this session's cancellation token, creating a fresh entry if
    /// this is the first time the session has been seen.
    pub fn cancel_token(&self, session_id: SessionId) -> CancellationToken {
        let mut guard = self.guard();
        guard
            .entry(session_id)
            .or_insert_with(|| SessionEntry { cancel: CancellationToken::new(), summarize_cancel: CancellationToken::new(), queue: VecDeque::new() })
            .cancel
            .clone()
    }

    pub fn summarize_cancel_token(&self, session_id: SessionId) -> CancellationToken {
        let mut guard = self.guard();
        guard
            .entry(session_id)
            .or_insert_with(|| SessionEntry { cancel: CancellationToken::new(), summarize_cancel: CancellationToken::new(), queue: VecDeque::new() })
            .summarize_cancel
            .clone()
    }

    pub fn enqueue(&self, session_id: SessionId, prompt: QueuedPrompt) -> Result<()> {
        let mut guard = self.guard();
        let entry = guard.entry(session_id).or_insert_with(|| SessionEntry { cancel: CancellationToken::new(), summarize_cancel: CancellationToken::new(), queue: VecDeque::new() });
        if entry.queue.len() >= self.queue_cap {
            return Err(NexoraErr::QueueFull);
        }
        entry.queue.push_back(prompt);
        Ok(())
    }

    pub fn dequeue(&self, session_id: SessionId) -> Option<QueuedPrompt> {
        self.guard().get_mut(&session_id).and_then(|e| e.queue.pop_front())
    }

    pub fn queue_len(&self, session_id: SessionId) -> usize {
        self.guard().get(&session_id).map(|e| e.queue.len()).unwrap_or(0)
    }

    /// Cancels the active request, its summarization sibling, and clears
    /// the queue.
    pub fn cancel(&self, session_id: SessionId) {
        let mut guard = self.guard();
        if let Some(entry) = guard.get_mut(&session_id) {
            entry.cancel.cancel();
            entry.summarize_cancel.cancel();
            entry.queue.clear();
            entry.cancel = CancellationToken::new();
            entry.summarize_cancel = CancellationToken::new();
        }
    }

    /// Best-effort cancels every active session.
    pub fn cancel_all(&self) {
        let guard = self.guard();
        for entry in guard.values() {
            entry.cancel.cancel();
            entry.summarize_cancel.cancel();
        }
    }
}
