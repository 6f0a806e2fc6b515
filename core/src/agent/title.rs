//! Title-generation task: fire-and-forget, runs off the
//! small model, never blocks or fails the calling `Run`.

use std::sync::Arc;

use nexora_protocol::Message;
use nexora_protocol::MessageBody;
use nexora_protocol::SessionId;
use nexora_protocol::UserPart;

use crate::collaborators::LanguageModel;
use crate::collaborators::ModelEvent;
use crate::collaborators::SamplingParams;
use crate::collaborators::SessionStore;

const TITLE_PROMPT: &str = "Summarize the user's first message as a short conversation title, five words or fewer. Reply with the title only, no punctuation at the end.";

/// Spawns a background task that asks the small model for a short title and
/// writes it back to the session. Any failure is logged and swallowed; the
/// caller never awaits this.
pub fn spawn(small_model: Arc<dyn LanguageModel>, sessions: Arc<dyn SessionStore>, session_id: SessionId, first_user_text: String) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = generate_and_store(small_model.as_ref(), sessions.as_ref(), session_id, &first_user_text).await {
            tracing::warn!(session = %session_id, error = %err, "title generation failed");
        }
    })
}

async fn generate_and_store(small_model: &dyn LanguageModel, sessions: &dyn SessionStore, session_id: SessionId, first_user_text: &str) -> crate::error::Result<()> {
    let prompt_message = Message::new(session_id, MessageBody::User { parts: vec![UserPart::Text { text: first_user_text.to_string() }] });
    let events = small_model.stream(Some(TITLE_PROMPT), std::slice::from_ref(&prompt_message), &SamplingParams::default()).await;

    let mut title = String::new();
    while let Ok(event) = events.recv().await {
        match event {
            ModelEvent::TextDelta { text } => title.push_str(&text),
            ModelEvent::StepFinish { .. } | ModelEvent::Error(_) => break,
            _ => {}
        }
    }
    let title = title.trim();
    if title.is_empty() {
        return Ok(());
    }

    let Some(mut session) = sessions.get(session_id).await? else {
        return Ok(());
    };
    session.title = Some(title.to_string());
    sessions.save(&session).await
}
