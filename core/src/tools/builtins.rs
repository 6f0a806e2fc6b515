//! Concrete built-in tools. Everything that talks to a real model provider
//! or a sandboxed UI stays a collaborator trait; `bash`, `job_output`, and
//! `job_kill` wrap machinery this crate already owns, and `fetch` is a thin
//! pass-through to the [`crate::collaborators::HttpFetcher`] contract.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;

use async_trait::async_trait;
use nexora_edit::EditCircuitBreaker;
use nexora_edit::EditMatcher;
use nexora_protocol::EditContext;
use nexora_protocol::SessionId;
use nexora_protocol::ShellState;
use nexora_protocol::ToolResultContent;
use serde_json::Value;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::collaborators::HttpFetcher;
use crate::config::Config;
use crate::error::NexoraErr;
use crate::error::Result;
use crate::output;
use crate::output::BudgetTier;
use crate::shell;
use crate::shell::BackgroundShellManager;
use crate::tools::registry::Tool;
use crate::tools::registry::ToolInvocationContext;
use crate::tools::registry::ToolKind;
use crate::tools::spec::ToolSpec;

fn str_field<'a>(input: &'a Value, key: &str) -> Result<&'a str> {
    input.get(key).and_then(Value::as_str).ok_or_else(|| NexoraErr::ToolExecutionFailed { tool_name: key.to_string(), detail: format!("missing required field `{key}`") })
}

/// Per-session, per-file read/write bookkeeping shared by [`ViewTool`] and
/// [`EditTool`]/[`WriteTool`], mirroring the precondition the edit matcher
/// enforces directly when called from tests.

#[derive(Default)]
pub struct FileContextStore {
    contexts: Mutex<HashMap<(SessionId, PathBuf), EditContext>>,
}

impl FileContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_context<T>(&self, session_id: SessionId, path: &Path, f: impl FnOnce(&mut EditContext) -> T) -> T {
        let mut guard = self.contexts.lock().unwrap_or_else(|p| p.into_inner());
        let ctx = guard.entry((session_id, path.to_path_buf())).or_insert_with(|| EditContext::unread(path.to_path_buf()));
        f(ctx)
    }
}

pub struct BashTool {
    manager: Arc<BackgroundShellManager>,
}

impl BashTool {
    pub fn new(manager: Arc<BackgroundShellManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn spec(&self) -> &ToolSpec {
        static SPEC: OnceLock<ToolSpec> = OnceLock::new();
        SPEC.get_or_init(|| {
            ToolSpec::new(
                "bash",
                "Runs a shell command, synchronously or in the background.",
                json!({
                    "type": "object",
                    "properties": {
                        "command": {"type": "array", "items": {"type": "string"}},
                        "cwd": {"type": "string"},
                        "description": {"type": "string"},
                        "background": {"type": "boolean"}
                    },
                    "required": ["command", "cwd"]
                }),
            )
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Bash
    }

    async fn invoke(&self, ctx: &ToolInvocationContext, input: Value) -> Result<ToolResultContent> {
        let command: Vec<String> = input
            .get("command")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .ok_or_else(|| NexoraErr::ToolExecutionFailed { tool_name: "bash".into(), detail: "missing required field `command`".into() })?;

        let request = shell::ShellRequest {
            session_id: Some(ctx.session_id),
            cwd: input.get("cwd").and_then(Value::as_str).map(PathBuf::from).unwrap_or_else(|| ctx.cwd.clone()),
            command,
            description: input.get("description").and_then(Value::as_str).map(str::to_string),
            background: input.get("background").and_then(Value::as_bool).unwrap_or(false),
        };

        let outcome = shell::run(request, CancellationToken::new(), &self.manager, &Config::default(), ctx.permission_granted).await?;
        match outcome {
            shell::ShellOutcome::Completed { formatted_output, .. } => Ok(ToolResultContent::Text(formatted_output)),
            shell::ShellOutcome::Backgrounded { shell_id } => Ok(ToolResultContent::Text(format!("started background shell {shell_id}"))),
        }
    }
}

fn format_job_snapshot(shell: &nexora_protocol::BackgroundShell) -> String {
    let exit_code = match shell.state {
        ShellState::Done { exit_code, .. } => exit_code,
        _ => None,
    };
    let state = match shell.state {
        ShellState::Running => "running".to_string(),
        ShellState::Backgrounded => "backgrounded".to_string(),
        ShellState::Canceled => "canceled".to_string(),
        ShellState::Done { exit_code: Some(code), .. } => format!("done (exit code {code})"),
        ShellState::Done { exit_code: None, signal: Some(signal) } => format!("done (signal {signal})"),
        ShellState::Done { exit_code: None, signal: None } => "done".to_string(),
    };
    format!("state: {state}\n{}", output::format_tool_output(&shell.stdout, &shell.stderr, exit_code, &shell.cwd))
}

/// Polls a backgrounded shell for its accumulated output without blocking.
pub struct JobOutputTool {
    manager: Arc<BackgroundShellManager>,
}

impl JobOutputTool {
    pub fn new(manager: Arc<BackgroundShellManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for JobOutputTool {
    fn spec(&self) -> &ToolSpec {
        static SPEC: OnceLock<ToolSpec> = OnceLock::new();
        SPEC.get_or_init(|| ToolSpec::new("job_output", "Returns the accumulated output and state of a background shell.", json!({"type": "object", "properties": {"shell_id": {"type": "string"}}, "required": ["shell_id"]})))
    }

    fn kind(&self) -> ToolKind {
        ToolKind::ReadOnly
    }

    async fn invoke(&self, _ctx: &ToolInvocationContext, input: Value) -> Result<ToolResultContent> {
        let shell_id = str_field(&input, "shell_id")?;
        let snapshot = self.manager.snapshot(shell_id).ok_or_else(|| NexoraErr::ToolExecutionFailed { tool_name: "job_output".into(), detail: format!("no background shell {shell_id}") })?;
        Ok(ToolResultContent::Text(format_job_snapshot(&snapshot)))
    }
}

/// Terminates a backgrounded shell.
pub struct JobKillTool {
    manager: Arc<BackgroundShellManager>,
}

impl JobKillTool {
    pub fn new(manager: Arc<BackgroundShellManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for JobKillTool {
    fn spec(&self) -> &ToolSpec {
        static SPEC: OnceLock<ToolSpec> = OnceLock::new();
        SPEC.get_or_init(|| ToolSpec::new("job_kill", "Cancels a running background shell.", json!({"type": "object", "properties": {"shell_id": {"type": "string"}}, "required": ["shell_id"]})))
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Bash
    }

    async fn invoke(&self, _ctx: &ToolInvocationContext, input: Value) -> Result<ToolResultContent> {
        let shell_id = str_field(&input, "shell_id")?;
        let killed = self.manager.kill(shell_id)?;
        Ok(ToolResultContent::Text(format_job_snapshot(&killed)))
    }
}

pub struct ViewTool {
    contexts: std::sync::Arc<FileContextStore>,
}

impl ViewTool {
    pub fn new(contexts: std::sync::Arc<FileContextStore>) -> Self {
        Self { contexts }
    }
}

#[async_trait]
impl Tool for ViewTool {
    fn spec(&self) -> &ToolSpec {
        static SPEC: OnceLock<ToolSpec> = OnceLock::new();
        SPEC.get_or_init(|| ToolSpec::new("view", "Reads a file's contents, recording it as read for later edits.", json!({"type": "object", "properties": {"path": {"type": "string"}}, "required": ["path"]})))
    }

    fn kind(&self) -> ToolKind {
        ToolKind::ReadOnly
    }

    async fn invoke(&self, _ctx: &ToolInvocationContext, input: Value) -> Result<ToolResultContent> {
        let path = PathBuf::from(str_field(&input, "path")?);
        let raw = std::fs::read(&path)?;
        let mtime = std::fs::metadata(&path)?.modified()?;
        let crlf = raw.windows(2).any(|w| w == b"\r\n");
        let content = String::from_utf8_lossy(&raw).into_owned();

        self.contexts.with_context(_ctx.session_id, &path, |c| c.mark_read(mtime, crlf));

        let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%3f").to_string();
        let decision = output::manage_output(&content, "view", BudgetTier::Medium, &_ctx.cwd, _ctx.session_id, &timestamp)?;
        Ok(ToolResultContent::Text(match decision {
            output::OutputDecision::Returned(text) | output::OutputDecision::Truncated(text) => text,
            output::OutputDecision::WrittenToFile(path) => format!("output written to {}", path.display()),
        }))
    }
}

pub struct EditTool {
    contexts: std::sync::Arc<FileContextStore>,
    breaker: EditCircuitBreaker,
}

impl EditTool {
    pub fn new(contexts: std::sync::Arc<FileContextStore>, breaker: EditCircuitBreaker) -> Self {
        Self { contexts, breaker }
    }
}

#[async_trait]
impl Tool for EditTool {
    fn spec(&self) -> &ToolSpec {
        static SPEC: OnceLock<ToolSpec> = OnceLock::new();
        SPEC.get_or_init(|| {
            ToolSpec::new(
                "edit",
                "Replaces old_text with new_text in a file that has been viewed this session.",
                json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string"},
                        "old_text": {"type": "string"},
                        "new_text": {"type": "string"},
                        "replace_all": {"type": "boolean"}
                    },
                    "required": ["path", "old_text", "new_text"]
                }),
            )
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Edit
    }

    async fn invoke(&self, ctx: &ToolInvocationContext, input: Value) -> Result<ToolResultContent> {
        let path = PathBuf::from(str_field(&input, "path")?);
        let old_text = str_field(&input, "old_text")?;
        let new_text = str_field(&input, "new_text")?;
        let replace_all = input.get("replace_all").and_then(Value::as_bool).unwrap_or(false);

        let matcher = EditMatcher { breaker: Some(&self.breaker), external: None, history: None, diagnostics: None };
        let outcome = self.contexts.with_context(ctx.session_id, &path, |file_ctx| matcher.apply(ctx.session_id, &path, file_ctx, old_text, new_text, replace_all))?;

        Ok(ToolResultContent::Text(format!("applied edit: +{} -{} lines", outcome.additions, outcome.removals)))
    }
}

pub struct FetchTool {
    fetcher: std::sync::Arc<dyn HttpFetcher>,
}

impl FetchTool {
    pub fn new(fetcher: std::sync::Arc<dyn HttpFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl Tool for FetchTool {
    fn spec(&self) -> &ToolSpec {
        static SPEC: OnceLock<ToolSpec> = OnceLock::new();
        SPEC.get_or_init(|| ToolSpec::new("fetch", "Fetches the body of a URL.", json!({"type": "object", "properties": {"url": {"type": "string"}}, "required": ["url"]})))
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Fetch
    }

    async fn invoke(&self, _ctx: &ToolInvocationContext, input: Value) -> Result<ToolResultContent> {
        let url = str_field(&input, "url")?;
        match self.fetcher.fetch(url).await {
            Ok(body) => Ok(ToolResultContent::Text(body)),
            Err(detail) => Err(NexoraErr::ToolExecutionFailed { tool_name: "fetch".into(), detail }),
        }
    }
}
