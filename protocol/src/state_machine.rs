use std::collections::BTreeSet;
use std::collections::VecDeque;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    ProcessingPrompt,
    Streaming,
    WaitingForTool,
    RecoveringError,
    Summarizing,
    ResourcePaused,
    Stuck,
    Terminated,
}

impl SessionState {
    /// The session-state transition table. `RecoveringError`, `Summarizing`
    /// and `ResourcePaused` are reachable from any non-terminal state and
    /// return to the state they interrupted, so they are checked first.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        if self == Terminated {
            return false;
        }
        if next == Terminated {
            return true;
        }
        match next {
            RecoveringError | Summarizing | ResourcePaused => true,
            Stuck => true,
            Idle => matches!(self, ProcessingPrompt | Stuck | RecoveringError | Summarizing | ResourcePaused),
            ProcessingPrompt => matches!(self, Idle | RecoveringError | Summarizing | ResourcePaused),
            Streaming => matches!(self, ProcessingPrompt | WaitingForTool | RecoveringError | Summarizing | ResourcePaused),
            WaitingForTool => matches!(self, Streaming | RecoveringError | Summarizing | ResourcePaused),
            Terminated => unreachable!("handled above"),
        }
    }
}

/// One outcome in the bounded tool-call ring used for stuck detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub tool_name: String,
    pub argument_hash: u64,
    pub succeeded: bool,
}

/// Per-session bookkeeping the state machine maintains alongside the current
/// state: a bounded ring of recent tool outcomes, files touched this
/// session, and the reason the session is currently paused, if any.
#[derive(Debug, Clone)]
pub struct StateRecord {
    pub state: SessionState,
    history: VecDeque<ToolOutcome>,
    history_capacity: usize,
    pub files_modified: BTreeSet<String>,
    pub pause_reason: Option<String>,
    pub last_transition: DateTime<Utc>,
}

impl StateRecord {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            state: SessionState::Idle,
            history: VecDeque::with_capacity(history_capacity),
            history_capacity,
            files_modified: BTreeSet::new(),
            pause_reason: None,
            last_transition: Utc::now(),
        }
    }

    pub fn transition(&mut self, next: SessionState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        self.last_transition = Utc::now();
        true
    }

    pub fn push_outcome(&mut self, outcome: ToolOutcome) {
        if self.history.len() == self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(outcome);
    }

    pub fn history(&self) -> impl Iterator<Item = &ToolOutcome> {
        self.history.iter()
    }

    pub fn recent_failure_ratio(&self) -> f64 {
        if self.history.is_empty() {
            return 0.0;
        }
        let failures = self.history.iter().filter(|o| !o.succeeded).count();
        failures as f64 / self.history.len() as f64
    }

    /// Stuck detection: true when the last `k` outcomes are all failures on
    /// the same tool.
    pub fn consecutive_same_tool_failures(&self) -> usize {
        let mut count = 0;
        let mut last_tool: Option<&str> = None;
        for outcome in self.history.iter().rev() {
            if outcome.succeeded {
                break;
            }
            match last_tool {
                None => {
                    last_tool = Some(&outcome.tool_name);
                    count = 1;
                }
                Some(tool) if tool == outcome.tool_name => count += 1,
                Some(_) => break,
            }
        }
        count
    }

    /// True when `(tool, argument_hash)` repeats at least `m` times within
    /// the retained history, regardless of success.
    pub fn repeats_same_call_at_least(&self, m: usize) -> bool {
        use std::collections::HashMap;
        let mut counts: HashMap<(&str, u64), usize> = HashMap::new();
        for outcome in &self.history {
            let entry = counts.entry((outcome.tool_name.as_str(), outcome.argument_hash)).or_insert(0);
            *entry += 1;
            if *entry >= m {
                return true;
            }
        }
        false
    }
}
