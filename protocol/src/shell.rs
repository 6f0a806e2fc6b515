use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Observable state of a background shell. `Starting` is implicit (the
/// record is only created once the child has spawned) so it is not
/// represented as a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ShellState {
    Running,
    Done { exit_code: Option<i32>, signal: Option<i32> },
    Canceled,
    Backgrounded,
}

impl ShellState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ShellState::Done { .. } | ShellState::Canceled)
    }
}

/// A shell command whose lifecycle can outlive the tool call that spawned
/// it. Owned by the process-wide Background Shell Manager.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundShell {
    pub id: String,
    pub cwd: PathBuf,
    pub description: Option<String>,
    pub command: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub stdout: String,
    pub stderr: String,
    pub state: ShellState,
}

impl BackgroundShell {
    pub fn new(id: String, cwd: PathBuf, description: Option<String>, command: Vec<String>) -> Self {
        Self {
            id,
            cwd,
            description,
            command,
            started_at: Utc::now(),
            stdout: String::new(),
            stderr: String::new(),
            state: ShellState::Running,
        }
    }
}
