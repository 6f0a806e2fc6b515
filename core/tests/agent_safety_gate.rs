//! Exercises the safety gate and the permission-service collaborator as
//! `SessionAgent::run` actually reaches them through a `bash` tool call,
//! rather than unit-testing `safety::blocked` or `LiveToolExecutor` in
//! isolation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use nexora_core::agent::RunMode;
use nexora_core::agent::RunRequest;
use nexora_core::agent::SessionAgent;
use nexora_core::collaborators::LanguageModel;
use nexora_core::collaborators::MessageStore;
use nexora_core::collaborators::ModelEvent;
use nexora_core::collaborators::PermissionRequest;
use nexora_core::collaborators::PermissionService;
use nexora_core::collaborators::ProviderFinishReason;
use nexora_core::collaborators::SamplingParams;
use nexora_core::collaborators::SessionStore;
use nexora_core::config::Config;
use nexora_core::error::Result;
use nexora_core::message_store::InMemoryMessageStore;
use nexora_core::shell::BackgroundShellManager;
use nexora_core::tools::BashTool;
use nexora_core::tools::ToolRegistry;
use nexora_protocol::Message;
use nexora_protocol::MessageBody;
use nexora_protocol::Role;
use nexora_protocol::Session;
use nexora_protocol::SessionId;
use nexora_protocol::ToolCallId;
use nexora_protocol::ToolResultContent;
use serde_json::json;
use tempfile::tempdir;

struct SingleBashCallModel {
    argv: Vec<&'static str>,
}

#[async_trait]
impl LanguageModel for SingleBashCallModel {
    async fn stream(&self, _system_prompt: Option<&str>, _history: &[Message], _sampling: &SamplingParams) -> async_channel::Receiver<ModelEvent> {
        let (tx, rx) = async_channel::unbounded();
        let argv: Vec<String> = self.argv.iter().map(|s| s.to_string()).collect();
        tokio::spawn(async move {
            let id = ToolCallId::new();
            let _ = tx.send(ModelEvent::ToolCall { id, tool_name: "bash".to_string(), input: json!({"command": argv, "cwd": "/tmp"}) }).await;
            let _ = tx.send(ModelEvent::StepFinish { reason: ProviderFinishReason::EndTurn, prompt_tokens: 10, completion_tokens: 4, cost: 0.0, cache_metadata: None }).await;
        });
        rx
    }
}

struct RecordingPermissions {
    requested: Mutex<Vec<String>>,
    grant: bool,
}

#[async_trait]
impl PermissionService for RecordingPermissions {
    async fn request(&self, request: PermissionRequest) -> bool {
        self.requested.lock().unwrap().push(request.description);
        self.grant
    }
}

#[derive(Default)]
struct InMemorySessions {
    sessions: Mutex<HashMap<SessionId, Session>>,
}

#[async_trait]
impl SessionStore for InMemorySessions {
    async fn create(&self, session_id: SessionId) -> Result<Session> {
        let session = Session::new(session_id);
        self.sessions.lock().unwrap().insert(session_id, session.clone());
        Ok(session)
    }

    async fn get(&self, session_id: SessionId) -> Result<Option<Session>> {
        Ok(self.sessions.lock().unwrap().get(&session_id).cloned())
    }

    async fn save(&self, session: &Session) -> Result<()> {
        self.sessions.lock().unwrap().insert(session.id, session.clone());
        Ok(())
    }
}

fn tool_results(messages: &[Message]) -> Vec<ToolResultContent> {
    messages
        .iter()
        .filter_map(|m| match &m.body {
            MessageBody::Tool { results } => Some(results.clone()),
            _ => None,
        })
        .flatten()
        .map(|part| part.content)
        .collect()
}

#[tokio::test]
async fn a_recursive_force_remove_never_reaches_the_permission_service() {
    let dir = tempdir().expect("tempdir");
    let registry = Arc::new(ToolRegistry::new(vec![Arc::new(BashTool::new(Arc::new(BackgroundShellManager::new())))]));
    let model: Arc<dyn LanguageModel> = Arc::new(SingleBashCallModel { argv: vec!["rm", "-rf", "/"] });
    let permissions = Arc::new(RecordingPermissions { requested: Mutex::new(Vec::new()), grant: true });
    let messages = Arc::new(InMemoryMessageStore::new());

    let agent = SessionAgent::new(Config::default(), registry, model.clone(), model, permissions.clone(), messages.clone(), Arc::new(InMemorySessions::default()), None, None, dir.path().to_path_buf());

    let session_id = SessionId::new();
    agent.run(RunRequest { session_id, prompt: "clean up".into(), attachments: vec![], sampling: SamplingParams::default(), mode: RunMode::NewPrompt }).await.expect("run should complete");

    assert!(permissions.requested.lock().unwrap().is_empty(), "the safety gate should short-circuit before the permission prompt");

    let stored = messages.list(session_id).await.expect("list");
    let results = tool_results(&stored);
    assert_eq!(results.len(), 1);
    assert!(matches!(&results[0], ToolResultContent::Error(detail) if detail.contains("blocked")));
}

#[tokio::test]
async fn an_unsafe_command_outside_the_block_list_goes_through_the_permission_service() {
    let dir = tempdir().expect("tempdir");
    let registry = Arc::new(ToolRegistry::new(vec![Arc::new(BashTool::new(Arc::new(BackgroundShellManager::new())))]));
    let model: Arc<dyn LanguageModel> = Arc::new(SingleBashCallModel { argv: vec!["npm", "install"] });
    let permissions = Arc::new(RecordingPermissions { requested: Mutex::new(Vec::new()), grant: false });
    let messages = Arc::new(InMemoryMessageStore::new());

    let agent = SessionAgent::new(Config::default(), registry, model.clone(), model, permissions.clone(), messages.clone(), Arc::new(InMemorySessions::default()), None, None, dir.path().to_path_buf());

    let session_id = SessionId::new();
    agent.run(RunRequest { session_id, prompt: "install deps".into(), attachments: vec![], sampling: SamplingParams::default(), mode: RunMode::NewPrompt }).await.expect("run should complete");

    assert_eq!(permissions.requested.lock().unwrap().len(), 1, "an ordinary unsafe command must be routed through the permission service");

    let stored = messages.list(session_id).await.expect("list");
    let results = tool_results(&stored);
    assert_eq!(results.len(), 1);
    assert!(matches!(&results[0], ToolResultContent::Error(detail) if detail.contains("permission denied")));

    let assistant_message = stored.iter().find(|m| m.role() == Role::Assistant).expect("assistant message persisted");
    assert!(assistant_message.finish.is_some());
}

#[tokio::test]
async fn a_recognized_safe_readonly_command_skips_the_permission_prompt() {
    let dir = tempdir().expect("tempdir");
    let registry = Arc::new(ToolRegistry::new(vec![Arc::new(BashTool::new(Arc::new(BackgroundShellManager::new())))]));
    let model: Arc<dyn LanguageModel> = Arc::new(SingleBashCallModel { argv: vec!["echo", "hi"] });
    let permissions = Arc::new(RecordingPermissions { requested: Mutex::new(Vec::new()), grant: false });
    let messages = Arc::new(InMemoryMessageStore::new());

    let agent = SessionAgent::new(Config::default(), registry, model.clone(), model, permissions.clone(), messages.clone(), Arc::new(InMemorySessions::default()), None, None, dir.path().to_path_buf());

    let session_id = SessionId::new();
    agent.run(RunRequest { session_id, prompt: "say hi".into(), attachments: vec![], sampling: SamplingParams::default(), mode: RunMode::NewPrompt }).await.expect("run should complete");

    assert!(permissions.requested.lock().unwrap().is_empty(), "a recognized read-only command bypasses the permission prompt entirely");

    let stored = messages.list(session_id).await.expect("list");
    let results = tool_results(&stored);
    assert_eq!(results.len(), 1);
    assert!(!results[0].is_error());
}
