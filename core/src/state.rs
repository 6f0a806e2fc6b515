//! Session state orchestration: wraps the protocol-level
//! [`StateRecord`] transition table with the stuck-detection heuristics and
//! resource-pause bookkeeping that decide when to emit those transitions.

pub use nexora_protocol::ToolOutcome;
use nexora_protocol::SessionState;
use nexora_protocol::StateRecord;

use crate::config::Config;

const DEFAULT_HISTORY_CAPACITY: usize = 20;

/// Why the agent considers a session stuck.

#[derive(Debug, Clone, PartialEq)]
pub enum StuckReason {
    ConsecutiveSameToolFailures(usize),
    RepeatedCall,
    HighFailureRatio(f64),
}

impl StuckReason {
    pub fn message(&self) -> String {
        match self {
            StuckReason::ConsecutiveSameToolFailures(n) => format!("the same tool has failed {n} times in a row; pausing for guidance"),
            StuckReason::RepeatedCall => "the same tool call has repeated without making progress; pausing for guidance".to_string(),
            StuckReason::HighFailureRatio(ratio) => format!("recent tool calls are failing at a {:.0}% rate; pausing for guidance", ratio * 100.0),
        }
    }
}

pub struct SessionStateMachine {
    record: StateRecord,
    stuck_consecutive_threshold: usize,
    stuck_repeated_threshold: usize,
    stuck_failure_ratio_threshold: f64,
}

impl SessionStateMachine {
    pub fn new(config: &Config) -> Self {
        Self {
            record: StateRecord::new(DEFAULT_HISTORY_CAPACITY),
            stuck_consecutive_threshold: config.stuck_consecutive_same_tool_failures,
            stuck_repeated_threshold: config.stuck_repeated_call_threshold,
            stuck_failure_ratio_threshold: config.stuck_failure_ratio_threshold,
        }
    }

    pub fn state(&self) -> SessionState {
        self.record.state
    }

    pub fn transition(&mut self, next: SessionState) -> bool {
        self.record.transition(next)
    }

    pub fn pause_reason(&self) -> Option<&str> {
        self.record.pause_reason.as_deref()
    }

    pub fn mark_file_modified(&mut self, path: String) {
        self.record.files_modified.insert(path);
    }

    pub fn files_modified(&self) -> impl Iterator<Item = &String> {
        self.record.files_modified.iter()
    }

    /// Records a tool outcome and evaluates the stuck-detection heuristics.
    /// Returns a reason when the session should transition to `Stuck`.
    pub fn record_outcome_and_check_stuck(&mut self, outcome: ToolOutcome) -> Option<StuckReason> {
        self.record.push_outcome(outcome);

        let consecutive = self.record.consecutive_same_tool_failures();
        if consecutive >= self.stuck_consecutive_threshold {
            return Some(StuckReason::ConsecutiveSameToolFailures(consecutive));
        }
        if self.record.repeats_same_call_at_least(self.stuck_repeated_threshold) {
            return Some(StuckReason::RepeatedCall);
        }
        let ratio = self.record.recent_failure_ratio();
        if ratio > self.stuck_failure_ratio_threshold {
            return Some(StuckReason::HighFailureRatio(ratio));
        }
        None
    }

    /// Resource monitor callback: pauses the session with a
    /// human-readable reason. Returns false if the current state cannot
    /// transition to `ResourcePaused` (e.g. already terminated).
    pub fn pause_for_resource(&mut self, reason: String) -> bool {
        if !self.record.transition(SessionState::ResourcePaused) {
            return false;
        }
        self.record.pause_reason = Some(reason);
        true
    }

    pub fn clear_pause(&mut self) {
        self.record.pause_reason = None;
    }
}
