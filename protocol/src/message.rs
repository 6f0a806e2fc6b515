use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::ids::MessageId;
use crate::ids::SessionId;
use crate::ids::ToolCallId;

/// A role-tagged message body. Each role carries exactly the parts the role
/// is allowed to carry, encoding that constraint in the type rather than
/// validating it at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum MessageBody {
    System { text: String },
    User { parts: Vec<UserPart> },
    Assistant { parts: Vec<AssistantPart> },
    Tool { results: Vec<ToolResultPart> },
}

impl MessageBody {
    pub fn role(&self) -> Role {
        match self {
            MessageBody::System { .. } => Role::System,
            MessageBody::User { .. } => Role::User,
            MessageBody::Assistant { .. } => Role::Assistant,
            MessageBody::Tool { .. } => Role::Tool,
        }
    }

    /// Tool-call ids in an assistant message that have not yet closed
    /// `finished = true`. Empty for every other role.
    pub fn pending_tool_call_ids(&self) -> Vec<ToolCallId> {
        match self {
            MessageBody::Assistant { parts } => parts
                .iter()
                .filter_map(|p| match p {
                    AssistantPart::ToolCall(call) if !call.finished => Some(call.id),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn tool_call_ids(&self) -> Vec<ToolCallId> {
        match self {
            MessageBody::Assistant { parts } => parts
                .iter()
                .filter_map(|p| match p {
                    AssistantPart::ToolCall(call) => Some(call.id),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// True when the body carries no meaningful content — an assistant step
    /// that produced nothing is dropped from history before it is sent back
    /// to the model.
    pub fn is_empty(&self) -> bool {
        match self {
            MessageBody::System { text } => text.is_empty(),
            MessageBody::User { parts } => parts.is_empty(),
            MessageBody::Assistant { parts } => parts.is_empty(),
            MessageBody::Tool { results } => results.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserPart {
    Text {
        text: String,
    },
    Attachment {
        filename: String,
        media_type: String,
        #[serde(with = "base64_bytes")]
        bytes: Vec<u8>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantPart {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
        /// Opaque, provider-keyed signature. The core never introspects this
        /// beyond pass-through.
        signature: Option<String>,
    },
    ToolCall(ToolCallPart),
}

/// A `ContentPart` is the common supertype used by components (the Output
/// Manager, the tool registry) that operate on text regardless of which
/// role produced it.
#[derive(Debug, Clone)]
pub enum ContentPart<'a> {
    Text(&'a str),
    Reasoning(&'a str),
    Attachment { filename: &'a str, media_type: &'a str },
    ToolCall(&'a ToolCallPart),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallPart {
    pub id: ToolCallId,
    pub tool_name: String,
    pub input: serde_json::Value,
    pub finished: bool,
    pub provider_executed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultPart {
    pub tool_call_id: ToolCallId,
    pub content: ToolResultContent,
    pub metadata: Option<serde_json::Value>,
}

/// Exhaustively-matched tool output. Modeled as a tagged variant rather than
/// a loosely-typed payload with a runtime-checked discriminant, per the
/// "event-driven tool result handling" design note.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolResultContent {
    Text(String),
    Error(String),
    Media {
        media_type: String,
        #[serde(with = "base64_bytes")]
        bytes: Vec<u8>,
    },
}

impl ToolResultContent {
    pub fn is_error(&self) -> bool {
        matches!(self, ToolResultContent::Error(_))
    }

    pub fn synthetic(text: impl Into<String>) -> Self {
        ToolResultContent::Text(text.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    MaxTokens,
    EndTurn,
    ToolUse,
    Canceled,
    PermissionDenied,
    Error,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishRecord {
    pub reason: FinishReason,
    pub title: Option<String>,
    pub detail: Option<String>,
}

impl FinishRecord {
    pub fn new(reason: FinishReason) -> Self {
        Self { reason, title: None, detail: None }
    }

    pub fn with_detail(reason: FinishReason, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self { reason, title: Some(title.into()), detail: Some(detail.into()) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    pub body: MessageBody,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub finish: Option<FinishRecord>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(session_id: SessionId, body: MessageBody) -> Self {
        Self {
            id: MessageId::new(),
            session_id,
            body,
            model: None,
            provider: None,
            finish: None,
            created_at: Utc::now(),
        }
    }

    pub fn role(&self) -> Role {
        self.body.role()
    }
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_pending_tool_calls_excludes_finished() {
        let body = MessageBody::Assistant {
            parts: vec![
                AssistantPart::ToolCall(ToolCallPart {
                    id: ToolCallId::new(),
                    tool_name: "bash".into(),
                    input: serde_json::json!({}),
                    finished: true,
                    provider_executed: false,
                }),
                AssistantPart::ToolCall(ToolCallPart {
                    id: ToolCallId::new(),
                    tool_name: "edit".into(),
                    input: serde_json::json!({}),
                    finished: false,
                    provider_executed: false,
                }),
            ],
        };
        assert_eq!(body.pending_tool_call_ids().len(), 1);
        assert_eq!(body.tool_call_ids().len(), 2);
    }

    #[test]
    fn empty_assistant_message_is_empty() {
        let body = MessageBody::Assistant { parts: vec![] };
        assert!(body.is_empty());
    }
}
