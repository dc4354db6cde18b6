use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::{Citation, WireMessage};

/// Content shown for an assistant reply that was cancelled before any text arrived.
pub const CANCELLED_MARKER: &str = "(cancelled)";

/// Title of a conversation before its first reply completes.
pub const DEFAULT_TITLE: &str = "New conversation";

const TITLE_MAX_CHARS: usize = 50;

/// Message role in a conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// A message in the transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
    /// True while an assistant reply is still being received
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            reasoning: String::new(),
            citations: Vec::new(),
            streaming: false,
            cancelled: false,
            model: None,
            trace_id: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Empty assistant reply that is filled in as frames arrive.
    pub fn placeholder() -> Self {
        Self {
            streaming: true,
            ..Self::new(MessageRole::Assistant, "")
        }
    }

    /// A finalized, empty reply that was cancelled before any content.
    pub fn cancelled(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cancelled: true,
            ..Self::new(MessageRole::Assistant, CANCELLED_MARKER)
        }
    }

    /// Whether this message is sent back to the model as context.
    ///
    /// Replies that were cancelled, failed, or are still streaming are left out.
    pub fn is_context(&self) -> bool {
        !self.streaming && !self.cancelled && self.error.is_none() && !self.content.is_empty()
    }

    pub fn to_wire(&self) -> WireMessage {
        WireMessage {
            role: self.role.as_str().to_string(),
            content: self.content.clone(),
        }
    }
}

/// A conversation with message history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<ChatMessage>,
    pub created_at: String,
    pub updated_at: String,
}

impl Conversation {
    pub fn new(id: String) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id,
            title: DEFAULT_TITLE.to_string(),
            messages: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Generate title from first user message (truncated to 50 chars)
    pub fn generate_title(&mut self) {
        if let Some(first) = self.messages.iter().find(|m| m.role == MessageRole::User) {
            let text = first.content.trim();
            self.title = if text.chars().count() > TITLE_MAX_CHARS {
                let mut title: String = text.chars().take(TITLE_MAX_CHARS - 3).collect();
                title.push_str("...");
                title
            } else {
                text.to_string()
            };
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now().to_rfc3339();
    }

    pub fn message(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn message_mut(&mut self, id: &str) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    /// Messages to send as context for the next reply.
    pub fn wire_messages(&self) -> Vec<WireMessage> {
        self.messages
            .iter()
            .filter(|m| m.is_context())
            .map(ChatMessage::to_wire)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_title() {
        let mut conv = Conversation::new("c1".to_string());
        conv.messages.push(ChatMessage::user("What changed on the pricing page?"));
        conv.generate_title();
        assert_eq!(conv.title, "What changed on the pricing page?");

        let mut long = Conversation::new("c2".to_string());
        long.messages.push(ChatMessage::user("é".repeat(60)));
        long.generate_title();
        assert_eq!(long.title.chars().count(), 50);
        assert!(long.title.ends_with("..."));
    }

    #[test]
    fn test_wire_messages_skip_unfinished_replies() {
        let mut conv = Conversation::new("c1".to_string());
        conv.messages.push(ChatMessage::user("first"));
        let mut cancelled = ChatMessage::placeholder();
        cancelled.streaming = false;
        cancelled.cancelled = true;
        cancelled.content = CANCELLED_MARKER.to_string();
        conv.messages.push(cancelled);
        conv.messages.push(ChatMessage::user("second"));
        conv.messages.push(ChatMessage::placeholder());

        let wire = conv.wire_messages();
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0].role, "user");
        assert_eq!(wire[1].content, "second");
    }
}
