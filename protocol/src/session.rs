use serde::Deserialize;
use serde::Serialize;

use crate::ids::MessageId;
use crate::ids::SessionId;

/// A persistent conversation thread. Created on first user input by the
/// session agent that owns its stream; never destroyed by the core —
/// archival is an external concern.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub title: Option<String>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost: f64,
    pub summary_message_id: Option<MessageId>,
    pub message_count: u64,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            title: None,
            prompt_tokens: 0,
            completion_tokens: 0,
            cost: 0.0,
            summary_message_id: None,
            message_count: 0,
        }
    }

    /// Applies a step's usage. Token and cost counters are monotonically
    /// nondecreasing within a session; this is the only place they are
    /// mutated, so the invariant holds by construction as long as callers
    /// always pass nonnegative deltas.
    pub fn accumulate_usage(&mut self, prompt_delta: u64, completion_delta: u64, cost_delta: f64) {
        self.prompt_tokens += prompt_delta;
        self.completion_tokens += completion_delta;
        self.cost += cost_delta.max(0.0);
    }

    pub fn record_message(&mut self) {
        self.message_count += 1;
    }

    /// Sets the summary anchor and resets the prompt-token counter: after
    /// summarizing, `prompt_tokens` is reset and `completion_tokens` is set
    /// to the summary's own output token count.
    pub fn apply_summary(&mut self, summary_message_id: MessageId, summary_completion_tokens: u64) {
        self.summary_message_id = Some(summary_message_id);
        self.prompt_tokens = 0;
        self.completion_tokens = summary_completion_tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_accumulates_monotonically() {
        let mut session = Session::new(SessionId::new());
        session.accumulate_usage(100, 50, 0.01);
        session.accumulate_usage(20, 5, 0.002);
        assert_eq!(session.prompt_tokens, 120);
        assert_eq!(session.completion_tokens, 55);
        assert!((session.cost - 0.012).abs() < 1e-9);
    }

    #[test]
    fn summary_resets_prompt_tokens_only() {
        let mut session = Session::new(SessionId::new());
        session.accumulate_usage(5_000, 400, 0.5);
        session.apply_summary(MessageId::new(), 120);
        assert_eq!(session.prompt_tokens, 0);
        assert_eq!(session.completion_tokens, 120);
        assert!(session.summary_message_id.is_some());
    }
}
