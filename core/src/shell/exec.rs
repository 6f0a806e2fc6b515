//! Shell Executor: the single `run` operation, covering the
//! synchronous path, the auto-background transition after a polling
//! threshold, and explicit background with a short grace period.

use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use nexora_protocol::SessionId;
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::NexoraErr;
use crate::error::Result;
use crate::output::format_tool_output;
use crate::safety;
use crate::shell::background::BackgroundShellManager;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct ShellRequest {
    pub session_id: Option<SessionId>,
    pub cwd: PathBuf,
    pub command: Vec<String>,
    pub description: Option<String>,
    pub background: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellOutcome {
    Completed { formatted_output: String, exit_code: Option<i32>, interrupted: bool },
    Backgrounded { shell_id: String },
}

fn spawn_piped(program: &str, args: &[String], cwd: &Path) -> std::io::Result<Child> {
    Command::new(program).args(args).current_dir(cwd).stdout(Stdio::piped()).stderr(Stdio::piped()).spawn()
}

async fn drain_into(mut reader: impl tokio::io::AsyncRead + Unpin, buf: Arc<Mutex<Vec<u8>>>) {
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.lock().unwrap_or_else(|p| p.into_inner()).extend_from_slice(&chunk[..n]),
        }
    }
}

/// Runs `request.command`, honoring the safety gate and the collaborator
/// permission decision, then following the sync-or-background contract.
pub async fn run(request: ShellRequest, cancel: CancellationToken, manager: &BackgroundShellManager, config: &Config, permission_granted: bool) -> Result<ShellOutcome> {
    if request.command.is_empty() || request.command[0].is_empty() {
        return Err(NexoraErr::ShellStartupFailed("command must not be empty".into()));
    }
    if request.session_id.is_none() {
        return Err(NexoraErr::SessionMissing);
    }
    if !config.safety_gate_enabled {
        // fallthrough: gate disabled only in tests/embedders that pre-authorize everything.
    } else if safety::blocked(&request.command) {
        return Err(NexoraErr::ShellBlocked { reason: "command is not allowed for security reasons".into() });
    }
    if !safety::is_safe_readonly(&request.command) && !permission_granted {
        return Err(NexoraErr::PermissionDenied { tool_name: "bash".into() });
    }

    let (program, args) = request.command.split_first().expect("checked non-empty above");
    let mut child = spawn_piped(program, args, &request.cwd).map_err(|e| NexoraErr::ShellStartupFailed(e.to_string()))?;

    let stdout_buf: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let stderr_buf: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let stdout = child.stdout.take().ok_or_else(|| NexoraErr::ShellStartupFailed("stdout pipe unavailable".into()))?;
    let stderr = child.stderr.take().ok_or_else(|| NexoraErr::ShellStartupFailed("stderr pipe unavailable".into()))?;
    tokio::spawn(drain_into(stdout, stdout_buf.clone()));
    tokio::spawn(drain_into(stderr, stderr_buf.clone()));

    if request.background {
        run_explicit_background(request, child, cancel, manager, config, stdout_buf, stderr_buf).await
    } else {
        run_synchronous(request, child, cancel, manager, config, stdout_buf, stderr_buf).await
    }
}

async fn run_synchronous(request: ShellRequest, mut child: Child, cancel: CancellationToken, manager: &BackgroundShellManager, config: &Config, stdout_buf: Arc<Mutex<Vec<u8>>>, stderr_buf: Arc<Mutex<Vec<u8>>>) -> Result<ShellOutcome> {
    let deadline = tokio::time::sleep(config.shell_auto_background_threshold);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(NexoraErr::from)?;
                let exit_code = status.code();
                let formatted = format_tool_output(
                    &String::from_utf8_lossy(&stdout_buf.lock().unwrap_or_else(|p| p.into_inner())),
                    &String::from_utf8_lossy(&stderr_buf.lock().unwrap_or_else(|p| p.into_inner())),
                    exit_code,
                    &request.cwd,
                );
                return Ok(ShellOutcome::Completed { formatted_output: formatted, exit_code, interrupted: false });
            }
            _ = cancel.cancelled() => {
                let _ = child.start_kill();
                return Err(NexoraErr::ContextCanceled);
            }
            _ = &mut deadline => {
                let shell_id = manager.register(request.cwd.clone(), request.description.clone(), request.command.clone(), child, stdout_buf, stderr_buf);
                return Ok(ShellOutcome::Backgrounded { shell_id });
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {
                // keep polling; buffers are filled by the reader tasks concurrently.
            }
        }
    }
}

async fn run_explicit_background(request: ShellRequest, mut child: Child, _cancel: CancellationToken, manager: &BackgroundShellManager, config: &Config, stdout_buf: Arc<Mutex<Vec<u8>>>, stderr_buf: Arc<Mutex<Vec<u8>>>) -> Result<ShellOutcome> {
    tokio::select! {
        status = child.wait() => {
            let status = status.map_err(NexoraErr::from)?;
            let exit_code = status.code();
            let formatted = format_tool_output(
                &String::from_utf8_lossy(&stdout_buf.lock().unwrap_or_else(|p| p.into_inner())),
                &String::from_utf8_lossy(&stderr_buf.lock().unwrap_or_else(|p| p.into_inner())),
                exit_code,
                &request.cwd,
            );
            Ok(ShellOutcome::Completed { formatted_output: formatted, exit_code, interrupted: false })
        }
        _ = tokio::time::sleep(config.shell_explicit_background_grace) => {
            let shell_id = manager.register(request.cwd.clone(), request.description.clone(), request.command.clone(), child, stdout_buf, stderr_buf);
            Ok(ShellOutcome::Backgrounded { shell_id })
        }
    }
}
