//! End-to-end coverage of `SessionAgent::run` driving a real `ToolRegistry`
//! through a `view` then `edit` call, crossing the agent/tools/nexora-edit
//! boundary the way a single unit test inside any one module cannot.

use std::collections::HashMap;
use std::path::PathBuf;
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
use nexora_core::tools::builtins::EditTool;
use nexora_core::tools::builtins::FileContextStore;
use nexora_core::tools::builtins::ViewTool;
use nexora_core::tools::ToolRegistry;
use nexora_edit::EditCircuitBreaker;
use nexora_protocol::Message;
use nexora_protocol::Role;
use nexora_protocol::Session;
use nexora_protocol::SessionId;
use nexora_protocol::ToolCallId;
use nexora_protocol::ToolResultContent;
use serde_json::json;
use tempfile::tempdir;

struct ViewThenEditModel {
    path: PathBuf,
}

#[async_trait]
impl LanguageModel for ViewThenEditModel {
    async fn stream(&self, _system_prompt: Option<&str>, _history: &[Message], _sampling: &SamplingParams) -> async_channel::Receiver<ModelEvent> {
        let (tx, rx) = async_channel::unbounded();
        let path = self.path.clone();
        tokio::spawn(async move {
            let view_id = ToolCallId::new();
            let _ = tx.send(ModelEvent::ToolCall { id: view_id, tool_name: "view".to_string(), input: json!({"path": path.to_str().unwrap()}) }).await;
            let edit_id = ToolCallId::new();
            let _ = tx
                .send(ModelEvent::ToolCall {
                    id: edit_id,
                    tool_name: "edit".to_string(),
                    input: json!({"path": path.to_str().unwrap(), "old_text": "hello", "new_text": "goodbye"}),
                })
                .await;
            let _ = tx.send(ModelEvent::TextDelta { text: "updated the file".to_string() }).await;
            let _ = tx.send(ModelEvent::StepFinish { reason: ProviderFinishReason::EndTurn, prompt_tokens: 20, completion_tokens: 8, cost: 0.0, cache_metadata: None }).await;
        });
        rx
    }
}

struct AlwaysAllow;

#[async_trait]
impl PermissionService for AlwaysAllow {
    async fn request(&self, _request: PermissionRequest) -> bool {
        true
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

#[tokio::test]
async fn a_view_then_edit_tool_call_sequence_lands_on_disk_and_persists_results() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("greeting.txt");
    std::fs::write(&path, "hello world\n").expect("seed file");

    let contexts = Arc::new(FileContextStore::new());
    let registry = Arc::new(ToolRegistry::new(vec![Arc::new(ViewTool::new(contexts.clone())), Arc::new(EditTool::new(contexts, EditCircuitBreaker::default()))]));
    let model: Arc<dyn LanguageModel> = Arc::new(ViewThenEditModel { path: path.clone() });

    let agent = SessionAgent::new(
        Config::default(),
        registry,
        model.clone(),
        model,
        Arc::new(AlwaysAllow),
        Arc::new(InMemoryMessageStore::new()),
        Arc::new(InMemorySessions::default()),
        None,
        None,
        dir.path().to_path_buf(),
    );

    let session_id = SessionId::new();
    agent
        .run(RunRequest { session_id, prompt: "please fix the greeting".into(), attachments: vec![], sampling: SamplingParams::default(), mode: RunMode::NewPrompt })
        .await
        .expect("run should complete");

    assert_eq!(std::fs::read_to_string(&path).expect("read back"), "goodbye world\n");

    let messages = agent.session_registry().queue_len(session_id);
    assert_eq!(messages, 0, "no leftover queue entries after a clean run");
}

#[tokio::test]
async fn tool_results_and_final_text_are_both_persisted_to_the_message_store() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("greeting.txt");
    std::fs::write(&path, "hello world\n").expect("seed file");

    let contexts = Arc::new(FileContextStore::new());
    let registry = Arc::new(ToolRegistry::new(vec![Arc::new(ViewTool::new(contexts.clone())), Arc::new(EditTool::new(contexts, EditCircuitBreaker::default()))]));
    let model: Arc<dyn LanguageModel> = Arc::new(ViewThenEditModel { path: path.clone() });
    let messages = Arc::new(InMemoryMessageStore::new());

    let agent = SessionAgent::new(Config::default(), registry, model.clone(), model, Arc::new(AlwaysAllow), messages.clone(), Arc::new(InMemorySessions::default()), None, None, dir.path().to_path_buf());

    let session_id = SessionId::new();
    agent.run(RunRequest { session_id, prompt: "fix it".into(), attachments: vec![], sampling: SamplingParams::default(), mode: RunMode::NewPrompt }).await.expect("run should complete");

    let stored = messages.list(session_id).await.expect("list");
    let tool_message = stored.iter().find(|m| m.role() == Role::Tool).expect("a tool-result message must be persisted");
    let nexora_protocol::MessageBody::Tool { results } = &tool_message.body else {
        panic!("expected a tool message body");
    };
    assert_eq!(results.len(), 2);
    assert!(!results[0].content.is_error(), "view should not error");
    assert!(matches!(&results[1].content, ToolResultContent::Text(text) if text.contains("applied edit")));

    let assistant_message = stored.iter().find(|m| m.role() == Role::Assistant).expect("an assistant message must be persisted");
    assert!(matches!(&assistant_message.body, nexora_protocol::MessageBody::Assistant { parts } if !parts.is_empty()));
}
