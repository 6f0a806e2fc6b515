//! In-memory Message Store: an append-only per-session
//! conversation log satisfying the linearized-append ordering guarantee.
//! Embedders that need durability implement [`MessageStore`] themselves;
//! this is the default used by tests and by [`crate::agent`] when no
//! external store is wired in.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use nexora_protocol::Message;
use nexora_protocol::MessageId;
use nexora_protocol::SessionId;

use crate::collaborators::MessageStore;
use crate::error::NexoraErr;
use crate::error::Result;

#[derive(Default)]
pub struct InMemoryMessageStore {
    by_session: Mutex<HashMap<SessionId, Vec<Message>>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn create(&self, message: Message) -> Result<()> {
        let mut guard = self.by_session.lock().unwrap_or_else(|p| p.into_inner());
        guard.entry(message.session_id).or_default().push(message);
        Ok(())
    }

    async fn update(&self, message: Message) -> Result<()> {
        let mut guard = self.by_session.lock().unwrap_or_else(|p| p.into_inner());
        let list = guard.get_mut(&message.session_id).ok_or(NexoraErr::SessionNotFound(message.session_id.to_string()))?;
        let existing = list.iter_mut().find(|m| m.id == message.id).ok_or_else(|| NexoraErr::Internal(format!("message {} not found", message.id)))?;
        *existing = message;
        Ok(())
    }

    async fn list(&self, session_id: SessionId) -> Result<Vec<Message>> {
        let guard = self.by_session.lock().unwrap_or_else(|p| p.into_inner());
        Ok(guard.get(&session_id).cloned().unwrap_or_default())
    }

    async fn delete(&self, id: MessageId) -> Result<()> {
        let mut guard = self.by_session.lock().unwrap_or_else(|p| p.into_inner());
        for list in guard.values_mut() {
            list.retain(|m| m.id != id);
        }
        Ok(())
    }

    async fn get_by_path_and_session(&self, session_id: SessionId, path: &std::path::Path) -> Result<Vec<Message>> {
        let guard = self.by_session.lock().unwrap_or_else(|p| p.into_inner());
        let Some(list) = guard.get(&session_id) else { return Ok(Vec::new()) };
        let filename = path.file_name().and_then(|f| f.to_str()).unwrap_or_default();
        let matches = list
            .iter()
            .filter(|m| match &m.body {
                nexora_protocol::MessageBody::User { parts } => parts.iter().any(|p| matches!(p, nexora_protocol::UserPart::Attachment { filename: f, .. } if f == filename)),
                _ => false,
            })
            .cloned()
            .collect();
        Ok(matches)
    }
}
