//! Background Shell Manager: owns subprocess handles for shells that
//! outlived the synchronous wait window. `remove` and `kill` are
//! deliberately distinct operations — `kill` cancels the detached process and
//! corrupts exit-code tracking, `remove` only forgets a process that has
//! already finished on its own.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use nexora_protocol::BackgroundShell;
use nexora_protocol::ShellState;
use tokio::process::Child;
use uuid::Uuid;

use crate::error::NexoraErr;
use crate::error::Result;

struct Tracked {
    shell: BackgroundShell,
    child: Option<Child>,
    stdout_buf: Arc<Mutex<Vec<u8>>>,
    stderr_buf: Arc<Mutex<Vec<u8>>>,
}

#[derive(Default)]
pub struct BackgroundShellManager {
    shells: Mutex<HashMap<String, Tracked>>,
}

impl BackgroundShellManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, cwd: PathBuf, description: Option<String>, command: Vec<String>, child: Child, stdout_buf: Arc<Mutex<Vec<u8>>>, stderr_buf: Arc<Mutex<Vec<u8>>>) -> String {
        let id = Uuid::new_v4().to_string();
        let mut shell = BackgroundShell::new(id.clone(), cwd, description, command);
        shell.state = ShellState::Running;
        let mut guard = self.shells.lock().unwrap_or_else(|p| p.into_inner());
        guard.insert(id.clone(), Tracked { shell, child: Some(child), stdout_buf, stderr_buf });
        id
    }

    /// Returns a snapshot of the shell's current state, refreshing its
    /// buffered output and checking for process exit without blocking.
    pub fn snapshot(&self, id: &str) -> Option<BackgroundShell> {
        let mut guard = self.shells.lock().unwrap_or_else(|p| p.into_inner());
        let tracked = guard.get_mut(id)?;
        tracked.shell.stdout = String::from_utf8_lossy(&tracked.stdout_buf.lock().unwrap_or_else(|p| p.into_inner())).into_owned();
        tracked.shell.stderr = String::from_utf8_lossy(&tracked.stderr_buf.lock().unwrap_or_else(|p| p.into_inner())).into_owned();
        if let Some(child) = tracked.child.as_mut() {
            if let Ok(Some(status)) = child.try_wait() {
                tracked.shell.state = exit_state(&status);
                tracked.child = None;
            }
        }
        Some(tracked.shell.clone())
    }

    pub fn list(&self) -> Vec<BackgroundShell> {
        let guard = self.shells.lock().unwrap_or_else(|p| p.into_inner());
        guard.values().map(|t| t.shell.clone()).collect()
    }

    /// Forgets a finished process without touching it. Must not be called on
    /// a shell that is still running.
    pub fn remove(&self, id: &str) -> Option<BackgroundShell> {
        let mut guard = self.shells.lock().unwrap_or_else(|p| p.into_inner());
        guard.remove(id).map(|t| t.shell)
    }

    /// Terminates a running shell. Cancels the detached process, so the
    /// recorded exit state becomes `Canceled` rather than a real exit code.
    pub fn kill(&self, id: &str) -> Result<BackgroundShell> {
        let mut guard = self.shells.lock().unwrap_or_else(|p| p.into_inner());
        let tracked = guard.get_mut(id).ok_or_else(|| NexoraErr::Internal(format!("no background shell {id}")))?;
        if let Some(child) = tracked.child.as_mut() {
            let _ = child.start_kill();
        }
        tracked.shell.state = ShellState::Canceled;
        tracked.child = None;
        Ok(tracked.shell.clone())
    }
}

fn exit_state(status: &std::process::ExitStatus) -> ShellState {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ShellState::Done { exit_code: None, signal: Some(signal) };
        }
    }
    ShellState::Done { exit_code: status.code(), signal: None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    async fn spawn_sleep(secs: u64) -> Child {
        Command::new("sleep").arg(secs.to_string()).stdout(Stdio::null()).stderr(Stdio::null()).spawn().expect("spawn sleep")
    }

    #[tokio::test]
    async fn remove_does_not_touch_the_process() {
        let manager = BackgroundShellManager::new();
        let child = spawn_sleep(30).await;
        let pid = child.id().expect("pid");
        let id = manager.register(PathBuf::from("/tmp"), None, vec!["sleep".into(), "30".into()], child, Arc::new(Mutex::new(Vec::new())), Arc::new(Mutex::new(Vec::new())));

        let removed = manager.remove(&id).expect("removed");
        assert_eq!(removed.state, ShellState::Running);

        // best-effort: the process is still alive since remove never kills it.
        let alive = unsafe { libc::kill(pid as i32, 0) == 0 };
        assert!(alive);
        unsafe {
            libc::kill(pid as i32, libc::SIGKILL);
        }
    }

    #[tokio::test]
    async fn kill_marks_the_shell_canceled() {
        let manager = BackgroundShellManager::new();
        let child = spawn_sleep(30).await;
        let id = manager.register(PathBuf::from("/tmp"), None, vec!["sleep".into(), "30".into()], child, Arc::new(Mutex::new(Vec::new())), Arc::new(Mutex::new(Vec::new())));

        let killed = manager.kill(&id).expect("kill");
        assert_eq!(killed.state, ShellState::Canceled);
    }

    #[tokio::test]
    async fn snapshot_reflects_buffered_output() {
        let manager = BackgroundShellManager::new();
        let child = spawn_sleep(30).await;
        let stdout_buf = Arc::new(Mutex::new(b"hello".to_vec()));
        let id = manager.register(PathBuf::from("/tmp"), None, vec!["sleep".into(), "30".into()], child, stdout_buf, Arc::new(Mutex::new(Vec::new())));

        let snap = manager.snapshot(&id).expect("snapshot");
        assert_eq!(snap.stdout, "hello");
        manager.kill(&id).expect("cleanup kill");
    }
}
