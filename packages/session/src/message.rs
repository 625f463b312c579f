// ABOUTME: Conversation messages and the append-only message log of a build session
// ABOUTME: Only an unfinished working turn may be edited after it is appended

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const ACKNOWLEDGEMENT: &str =
    "Thanks! I've got your brief and I'm starting on your project now.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Brief,
    Acknowledgement,
    Event,
    Chat,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: MessageRole,
    pub kind: MessageKind,
    pub node: Option<String>,
    pub content: String,
    /// Job event this message was derived from.
    pub event_id: Option<String>,
    pub finished: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    fn new(role: MessageRole, kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            kind,
            node: None,
            content: content.into(),
            event_id: None,
            finished: true,
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn brief(rendered: impl Into<String>) -> Self {
        Self::new(MessageRole::User, MessageKind::Brief, rendered)
    }

    pub fn acknowledgement() -> Self {
        Self::new(
            MessageRole::Assistant,
            MessageKind::Acknowledgement,
            ACKNOWLEDGEMENT,
        )
    }

    pub fn event(event_id: impl Into<String>, node: Option<String>, content: impl Into<String>) -> Self {
        Self {
            event_id: Some(event_id.into()),
            node,
            ..Self::new(MessageRole::Assistant, MessageKind::Event, content)
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, MessageKind::Chat, content)
    }

    /// An empty assistant turn that is filled in while a reply streams.
    pub fn working(node: impl Into<String>) -> Self {
        Self {
            node: Some(node.into()),
            finished: false,
            ..Self::new(MessageRole::Assistant, MessageKind::Chat, "")
        }
    }

    pub fn system_error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            error: Some(message.clone()),
            ..Self::new(MessageRole::System, MessageKind::Error, message)
        }
    }
}

/// Messages in insertion order. Entries are never removed or reordered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageLog {
    messages: Vec<ChatMessage>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and return its id.
    pub fn push(&mut self, message: ChatMessage) -> String {
        let id = message.id.clone();
        self.messages.push(message);
        id
    }

    pub fn get(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.id == id)
    }

    /// Edit the unfinished message `id` in place. Returns false when the
    /// message is unknown or already finished.
    pub fn update_working<F>(&mut self, id: &str, update: F) -> bool
    where
        F: FnOnce(&mut ChatMessage),
    {
        match self
            .messages
            .iter_mut()
            .rev()
            .find(|m| m.id == id && !m.finished)
        {
            Some(message) => {
                update(message);
                true
            }
            None => false,
        }
    }

    pub fn as_slice(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Messages appended after the first `count`.
    pub fn since(&self, count: usize) -> &[ChatMessage] {
        self.messages.get(count..).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unfinished_turn_is_editable() {
        let mut log = MessageLog::new();
        let ack = log.push(ChatMessage::acknowledgement());
        let turn = log.push(ChatMessage::working("assistant"));

        assert!(!log.update_working(&ack, |m| m.content.push_str("edited")));
        assert!(log.update_working(&turn, |m| {
            m.content.push_str("Hello");
            m.finished = true;
        }));
        assert!(!log.update_working(&turn, |m| m.content.push_str(" again")));

        assert_eq!(log.get(&turn).unwrap().content, "Hello");
        assert_eq!(log.get(&ack).unwrap().content, ACKNOWLEDGEMENT);
        assert!(!log.update_working("missing", |_| {}));
    }

    #[test]
    fn test_since_is_bounded() {
        let mut log = MessageLog::new();
        log.push(ChatMessage::user("one"));
        log.push(ChatMessage::user("two"));

        assert_eq!(log.since(1).len(), 1);
        assert_eq!(log.since(1)[0].content, "two");
        assert!(log.since(5).is_empty());
    }
}
