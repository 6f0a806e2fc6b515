//! Session Agent: the streaming `Run`/`Summarize` loop,
//! wiring together the tool registry, state machine, recovery layer and
//! session registry built elsewhere in this crate.

pub mod history;
pub mod step;
pub mod step_prep;
pub mod title;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use nexora_protocol::FinishReason;
use nexora_protocol::FinishRecord;
use nexora_protocol::Message;
use nexora_protocol::MessageBody;
use nexora_protocol::SessionId;
use nexora_protocol::SessionState;
use nexora_protocol::ToolCallId;
use nexora_protocol::ToolResultContent;
use nexora_protocol::ToolResultPart;
use nexora_protocol::UserPart;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::collaborators::DriftDetector;
use crate::collaborators::LanguageModel;
use crate::collaborators::LoopDetector;
use crate::collaborators::MessageStore;
use crate::collaborators::PermissionRequest;
use crate::collaborators::PermissionService;
use crate::collaborators::SamplingParams;
use crate::collaborators::SessionStore;
use crate::collaborators::StreamErrorReason;
use crate::config::Config;
use crate::error::NexoraErr;
use crate::error::Result;
use crate::safety;
use crate::session_registry::QueuedPrompt;
use crate::session_registry::SessionRegistry;
use crate::state::SessionStateMachine;
use crate::tools::ToolInvocationContext;
use crate::tools::ToolRegistry;
use step::StepOutcome;
use step::ToolExecutor;

const SUMMARY_PROMPT: &str = "Summarize the conversation so far into a concise brief that preserves open tasks, decisions made, and file state. Reply with the summary only, no preamble.";
/// Fraction of the large model's context window past which `summarize`
/// falls back to the small model, to avoid provider-specific degradation
/// near the upper limit.

const SUMMARIZE_SMALL_MODEL_FALLBACK_FRACTION: f64 = 0.9;

/// One queued or incoming request. Uses an explicit `RunMode` discriminant
/// rather than a magic continuation string.

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub session_id: SessionId,
    pub prompt: String,
    pub attachments: Vec<PathBuf>,
    pub sampling: SamplingParams,
    pub mode: RunMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    NewPrompt,
    ContinueAfterToolExecution,
}

struct PendingTurn {
    prompt: String,
    attachments: Vec<PathBuf>,
    sampling: SamplingParams,
    interruption_note: Option<String>,
}

pub struct SessionAgent {
    config: Config,
    registry: Arc<ToolRegistry>,
    large_model: Arc<dyn LanguageModel>,
    small_model: Arc<dyn LanguageModel>,
    permissions: Arc<dyn PermissionService>,
    messages: Arc<dyn MessageStore>,
    sessions: Arc<dyn SessionStore>,
    loop_detector: Option<Arc<dyn LoopDetector>>,
    drift_detector: Option<Arc<dyn DriftDetector>>,
    session_registry: Arc<SessionRegistry>,
    states: Mutex<HashMap<SessionId, SessionStateMachine>>,
    working_dir: PathBuf,
    system_prefix: Option<String>,
    cache_annotator: Option<Arc<dyn step_prep::CacheAnnotator>>,
}

impl SessionAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        registry: Arc<ToolRegistry>,
        large_model: Arc<dyn LanguageModel>,
        small_model: Arc<dyn LanguageModel>,
        permissions: Arc<dyn PermissionService>,
        messages: Arc<dyn MessageStore>,
        sessions: Arc<dyn SessionStore>,
        loop_detector: Option<Arc<dyn LoopDetector>>,
        drift_detector: Option<Arc<dyn DriftDetector>>,
        working_dir: PathBuf,
    ) -> Self {
        let session_registry = Arc::new(SessionRegistry::new(config.session_queue_cap));
        Self {
            config,
            registry,
            large_model,
            small_model,
            permissions,
            messages,
            sessions,
            loop_detector,
            drift_detector,
            session_registry,
            states: Mutex::new(HashMap::new()),
            working_dir,
            system_prefix: None,
            cache_annotator: None,
        }
    }

    /// Text prepended ahead of the base system prompt on every step.
    pub fn with_system_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.system_prefix = Some(prefix.into());
        self
    }

    pub fn with_cache_annotator(mut self, annotator: Arc<dyn step_prep::CacheAnnotator>) -> Self {
        self.cache_annotator = Some(annotator);
        self
    }

    pub fn session_registry(&self) -> Arc<SessionRegistry> {
        self.session_registry.clone()
    }

    fn state_of(&self, session_id: SessionId) -> SessionState {
        self.states.lock().unwrap_or_else(|p| p.into_inner()).get(&session_id).map(SessionStateMachine::state).unwrap_or(SessionState::Idle)
    }

    fn transition(&self, session_id: SessionId, next: SessionState) {
        let mut states = self.states.lock().unwrap_or_else(|p| p.into_inner());
        states.entry(session_id).or_insert_with(|| SessionStateMachine::new(&self.config)).transition(next);
    }

    fn reset(&self, session_id: SessionId) {
        let mut states = self.states.lock().unwrap_or_else(|p| p.into_inner());
        states.insert(session_id, SessionStateMachine::new(&self.config));
    }

    fn take_state(&self, session_id: SessionId) -> SessionStateMachine {
        let mut states = self.states.lock().unwrap_or_else(|p| p.into_inner());
        states.remove(&session_id).unwrap_or_else(|| SessionStateMachine::new(&self.config))
    }

    fn put_state(&self, session_id: SessionId, state: SessionStateMachine) {
        let mut states = self.states.lock().unwrap_or_else(|p| p.into_inner());
        states.insert(session_id, state);
    }

    /// Cancels a session's active request, its summarize sibling, and
    /// clears its queue.
    pub fn cancel(&self, session_id: SessionId) {
        self.session_registry.cancel(session_id);
    }

    pub fn cancel_all(&self) {
        self.session_registry.cancel_all();
    }

    async fn persist_system_message(&self, session_id: SessionId, text: String) -> Result<()> {
        self.messages.create(Message::new(session_id, MessageBody::System { text })).await
    }

    fn build_user_message(&self, session_id: SessionId, prompt: &str, attachments: &[PathBuf]) -> Message {
        let mut parts = Vec::new();
        if !prompt.is_empty() {
            parts.push(UserPart::Text { text: prompt.to_string() });
        }
        for path in attachments {
            match std::fs::read(path) {
                Ok(bytes) => parts.push(UserPart::Attachment { filename: path.display().to_string(), media_type: guess_media_type(path), bytes }),
                Err(err) => tracing::warn!(path = %path.display(), error = %err, "attachment could not be read"),
            }
        }
        Message::new(session_id, MessageBody::User { parts })
    }

    /// Drives the streaming loop for a single run request through
    /// auto-continuation, auto-summarize-and-requeue, and queue drain
    /// without recursing.
    pub async fn run(&self, request: RunRequest) -> Result<()> {
        if request.mode == RunMode::NewPrompt && request.prompt.trim().is_empty() && request.attachments.is_empty() {
            return Err(NexoraErr::EmptyPrompt);
        }

        if request.mode == RunMode::NewPrompt {
            let busy = matches!(self.state_of(request.session_id), SessionState::ProcessingPrompt | SessionState::Streaming | SessionState::WaitingForTool | SessionState::Summarizing);
            if busy {
                let attachments = request.attachments.iter().map(|p| p.display().to_string()).collect();
                self.session_registry.enqueue(request.session_id, QueuedPrompt { text: request.prompt, attachments })?;
                return Ok(());
            }
            self.reset(request.session_id);
        }

        let mut pending = Some(PendingTurn { prompt: request.prompt, attachments: request.attachments, sampling: request.sampling, interruption_note: None });

        while let Some(turn) = pending.take() {
            pending = self.run_one_turn(request.session_id, turn).await?;
        }

        Ok(())
    }

    async fn run_one_turn(&self, session_id: SessionId, turn: PendingTurn) -> Result<Option<PendingTurn>> {
        let prompt_text = match &turn.interruption_note {
            Some(note) => format!("{note}\n\n{}", turn.prompt),
            None => turn.prompt.clone(),
        };

        if self.sessions.get(session_id).await?.is_none() {
            self.sessions.create(session_id).await?;
        }

        if !prompt_text.is_empty() || !turn.attachments.is_empty() {
            let existing = self.messages.list(session_id).await?;
            if existing.is_empty() {
                title::spawn(self.small_model.clone(), self.sessions.clone(), session_id, prompt_text.clone());
            }
            let user_message = self.build_user_message(session_id, &prompt_text, &turn.attachments);
            self.messages.create(user_message).await?;
        }

        self.transition(session_id, SessionState::ProcessingPrompt);

        let mut session = self.sessions.get(session_id).await?.ok_or_else(|| NexoraErr::SessionNotFound(session_id.to_string()))?;
        let history = self.messages.list(session_id).await?;
        let prepared = history::prepare(&history, session.summary_message_id);

        self.transition(session_id, SessionState::Streaming);
        let prepared_step = step_prep::prepare_step(None, self.system_prefix.as_deref(), prepared, self.config.disable_prompt_caching, self.cache_annotator.as_deref());
        let sampling = self.with_cache_annotations(&turn.sampling, &prepared_step.cache_annotations);
        let events = self.large_model.stream(prepared_step.system_prompt.as_deref(), &prepared_step.history, &sampling).await;

        let cancel = self.session_registry.cancel_token(session_id);
        let executor = LiveToolExecutor { registry: self.registry.clone(), permissions: self.permissions.clone(), config: self.config.clone(), session_id, cwd: self.working_dir.clone() };

        // Taken out of the map for the duration of the step: a std Mutex
        // guard cannot be held across the `.await` points inside run_step.
        let mut state = self.take_state(session_id);
        let outcome = step::run_step(events, cancel, &executor, &mut state, self.loop_detector.as_deref(), self.drift_detector.as_deref(), &prompt_text).await;
        self.put_state(session_id, state);

        session.accumulate_usage(outcome.prompt_tokens, outcome.completion_tokens, outcome.cost);
        session.record_message();

        let assistant_message = {
            let mut message = Message::new(session_id, MessageBody::Assistant { parts: outcome.parts.clone() });
            message.finish = Some(FinishRecord::new(outcome.finish_reason));
            message
        };
        self.messages.create(assistant_message).await?;

        if !outcome.tool_results.is_empty() {
            self.messages.create(Message::new(session_id, MessageBody::Tool { results: outcome.tool_results.clone() })).await?;
        }

        for notice in &outcome.system_notices {
            self.persist_system_message(session_id, notice.clone()).await?;
        }

        if let Some(reason) = &outcome.stuck {
            self.persist_system_message(session_id, reason.message()).await?;
            self.transition(session_id, SessionState::Stuck);
            self.sessions.save(&session).await?;
            return Ok(None);
        }

        if let Some(stream_err) = &outcome.stream_error {
            self.finish_with_stream_error(session_id, &outcome, stream_err).await?;
            self.transition(session_id, SessionState::RecoveringError);
            self.sessions.save(&session).await?;
            return Ok(None);
        }

        self.sessions.save(&session).await?;

        let remaining = self.config.context_window.saturating_sub(session.prompt_tokens);
        let should_summarize = self.config.auto_summarize_enabled && remaining <= self.config.summarize_threshold();

        if should_summarize {
            let had_pending_tool_calls = !outcome.pending_tool_call_ids.is_empty();
            self.summarize(session_id).await?;
            if had_pending_tool_calls {
                return Ok(Some(PendingTurn { prompt: prompt_text, attachments: Vec::new(), sampling: turn.sampling, interruption_note: Some("interrupted, continuing".to_string()) }));
            }
        }

        let continuation_needed = !outcome.pending_tool_call_ids.is_empty() || outcome.continuation_signal;
        if continuation_needed {
            self.transition(session_id, SessionState::ProcessingPrompt);
            return Ok(Some(PendingTurn { prompt: String::new(), attachments: Vec::new(), sampling: turn.sampling, interruption_note: None }));
        }

        if let Some(queued) = self.session_registry.dequeue(session_id) {
            let attachments = queued.attachments.into_iter().map(PathBuf::from).collect();
            return Ok(Some(PendingTurn { prompt: queued.text, attachments, sampling: SamplingParams::default(), interruption_note: None }));
        }

        self.transition(session_id, SessionState::Idle);
        Ok(None)
    }

    /// Folds the prepared step's opaque cache-control tags into `extra` for
    /// the model adapter to pick up; the core itself never reads them back.
    fn with_cache_annotations(&self, sampling: &SamplingParams, annotations: &[(nexora_protocol::MessageId, String)]) -> SamplingParams {
        if annotations.is_empty() {
            return sampling.clone();
        }
        let mut extended = sampling.clone();
        let tags: Vec<Value> = annotations.iter().map(|(id, tag)| serde_json::json!({ "message_id": id.to_string(), "tag": tag })).collect();
        extended.extra = serde_json::json!({ "cache_annotations": tags });
        extended
    }

    async fn finish_with_stream_error(&self, session_id: SessionId, outcome: &StepOutcome, reason: &StreamErrorReason) -> Result<()> {
        let (text, finish) = match reason {
            StreamErrorReason::Canceled => ("canceled", FinishReason::Canceled),
            StreamErrorReason::PermissionDenied => ("permission denied", FinishReason::PermissionDenied),
            StreamErrorReason::Provider { title, detail } => {
                tracing::warn!(session = %session_id, title, detail, "stream ended with a provider error");
                ("error executing tool", FinishReason::Error)
            }
        };

        if !outcome.pending_tool_call_ids.is_empty() {
            let results = outcome.pending_tool_call_ids.iter().map(|id| ToolResultPart { tool_call_id: *id, content: ToolResultContent::synthetic(text), metadata: None }).collect();
            self.messages.create(Message::new(session_id, MessageBody::Tool { results })).await?;
        }

        let mut finish_record = FinishRecord::new(finish);
        if let StreamErrorReason::Provider { title, detail } = reason {
            finish_record.title = Some(title.clone());
            finish_record.detail = Some(detail.clone());
        }
        self.messages.create(Message { finish: Some(finish_record), ..Message::new(session_id, MessageBody::System { text: format!("stream ended: {text}") }) }).await
    }

    /// Runs the agent with an embedded summary prompt over the current
    /// history. Falls back to the small model near the large model's upper
    /// context limit; deletes the partial summary message if canceled
    /// mid-run.
    pub async fn summarize(&self, session_id: SessionId) -> Result<()> {
        self.transition(session_id, SessionState::Summarizing);

        let mut session = self.sessions.get(session_id).await?.ok_or_else(|| NexoraErr::SessionNotFound(session_id.to_string()))?;
        let history = self.messages.list(session_id).await?;
        let prepared = history::prepare(&history, session.summary_message_id);

        let near_upper_limit = session.prompt_tokens as f64 >= self.config.context_window as f64 * SUMMARIZE_SMALL_MODEL_FALLBACK_FRACTION;
        let model: &Arc<dyn LanguageModel> = if near_upper_limit { &self.small_model } else { &self.large_model };

        let prepared_step = step_prep::prepare_step(Some(SUMMARY_PROMPT), self.system_prefix.as_deref(), prepared, self.config.disable_prompt_caching, self.cache_annotator.as_deref());
        let sampling = self.with_cache_annotations(&SamplingParams::default(), &prepared_step.cache_annotations);
        let events = model.stream(prepared_step.system_prompt.as_deref(), &prepared_step.history, &sampling).await;
        let cancel = self.session_registry.summarize_cancel_token(session_id);
        let executor = LiveToolExecutor { registry: self.registry.clone(), permissions: self.permissions.clone(), config: self.config.clone(), session_id, cwd: self.working_dir.clone() };

        let mut state = self.take_state(session_id);
        let outcome = step::run_step(events, cancel, &executor, &mut state, None, None, "summarize").await;
        self.put_state(session_id, state);

        let summary_message = Message::new(session_id, MessageBody::Assistant { parts: outcome.parts });

        if matches!(outcome.stream_error, Some(StreamErrorReason::Canceled)) {
            return Ok(());
        }

        self.messages.create(summary_message.clone()).await?;
        session.apply_summary(summary_message.id, outcome.completion_tokens);
        self.sessions.save(&session).await?;
        Ok(())
    }
}

fn guess_media_type(path: &std::path::Path) -> String {
    match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("pdf") => "application/pdf",
        Some("txt") | Some("md") => "text/plain",
        _ => "application/octet-stream",
    }
    .to_string()
}

/// Wraps the Tool Registry with the safety gate and the permission service
/// so [`step::run_step`] never has to know about either.
struct LiveToolExecutor {
    registry: Arc<ToolRegistry>,
    permissions: Arc<dyn PermissionService>,
    config: Config,
    session_id: SessionId,
    cwd: PathBuf,
}

impl LiveToolExecutor {
    fn argv_from(input: &Value) -> Vec<String> {
        input.get("command").and_then(Value::as_array).map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect()).unwrap_or_default()
    }

    async fn permission_granted(&self, id: ToolCallId, tool_name: &str, input: &Value) -> std::result::Result<bool, String> {
        if tool_name != "bash" {
            return Ok(true);
        }
        let argv = Self::argv_from(input);
        if safety::blocked(&argv) {
            return Err("command blocked for security reasons".to_string());
        }
        if !self.config.require_permission_for_unsafe_commands || safety::is_safe_readonly(&argv) {
            return Ok(true);
        }
        let request = PermissionRequest { session_id: self.session_id, path: None, tool_call_id: Some(id), tool_name: tool_name.to_string(), action: "execute".to_string(), description: argv.join(" "), params: input.clone() };
        Ok(self.permissions.request(request).await)
    }
}

#[async_trait]
impl ToolExecutor for LiveToolExecutor {
    async fn execute(&self, id: ToolCallId, tool_name: &str, input: &Value) -> ToolResultContent {
        let permission_granted = match self.permission_granted(id, tool_name, input).await {
            Ok(granted) => granted,
            Err(blocked_reason) => return ToolResultContent::Error(blocked_reason),
        };
        if !permission_granted {
            return ToolResultContent::Error("permission denied".to_string());
        }

        let ctx = ToolInvocationContext { session_id: self.session_id, cwd: self.cwd.clone(), permission_granted };
        match self.registry.invoke(&ctx, &self.config, tool_name, input.clone()).await {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!(tool = tool_name, error = %err, "tool call failed");
                ToolResultContent::Error(err.to_string())
            }
        }
    }
}
