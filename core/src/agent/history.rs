//! Conversation-history preparation: drop empty
//! assistant messages, and when a summary anchor is set, start the
//! conversation from it and relabel it as a user message so the model
//! treats the summary as grounding context rather than its own prior turn.

use nexora_protocol::Message;
use nexora_protocol::MessageBody;
use nexora_protocol::MessageId;
use nexora_protocol::UserPart;

/// Builds the message list to send upstream from the full persisted log.
pub fn prepare(messages: &[Message], summary_message_id: Option<MessageId>) -> Vec<Message> {
    let windowed: Vec<&Message> = match summary_message_id {
        Some(id) => {
            let start = messages.iter().position(|m| m.id == id).unwrap_or(0);
            messages[start..].iter().collect()
        }
        None => messages.iter().collect(),
    };

    windowed
        .into_iter()
        .enumerate()
        .filter(|(_, m)| !matches!(&m.body, MessageBody::Assistant { .. } if m.body.is_empty()))
        .map(|(i, m)| {
            if i == 0 && summary_message_id == Some(m.id) {
                relabel_as_user(m)
            } else {
                m.clone()
            }
        })
        .collect()
}

fn relabel_as_user(summary: &Message) -> Message {
    let text = match &summary.body {
        MessageBody::Assistant { parts } => parts
            .iter()
            .filter_map(|p| match p {
                nexora_protocol::message::AssistantPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        MessageBody::System { text } => text.clone(),
        _ => String::new(),
    };
    let mut relabeled = summary.clone();
    relabeled.body = MessageBody::User { parts: vec![UserPart::Text { text }] };
    relabeled
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexora_protocol::SessionId;
    use nexora_protocol::message::AssistantPart;

    fn assistant(text: &str) -> Message {
        Message::new(SessionId::new(), MessageBody::Assistant { parts: vec![AssistantPart::Text { text: text.into() }] })
    }

    fn empty_assistant() -> Message {
        Message::new(SessionId::new(), MessageBody::Assistant { parts: vec![] })
    }

    #[test]
    fn empty_assistant_messages_are_dropped() {
        let messages = vec![assistant("hi"), empty_assistant(), assistant("bye")];
        let prepared = prepare(&messages, None);
        assert_eq!(prepared.len(), 2);
    }

    #[test]
    fn summary_anchor_starts_the_window_and_is_relabeled_as_user() {
        let summary = assistant("condensed history");
        let summary_id = summary.id;
        let messages = vec![assistant("earlier turn, dropped"), summary.clone(), assistant("latest turn")];

        let prepared = prepare(&messages, Some(summary_id));
        assert_eq!(prepared.len(), 2);
        assert_eq!(prepared[0].role(), nexora_protocol::Role::User);
    }
}
