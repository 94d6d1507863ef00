//! Conversation history owned by one assistant
//!
//! The session is append-only between resets; the dispatch loop is its only
//! writer.

use chrono::{DateTime, Utc};
use capsule_core::ChatMessage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One turn of history, in the completion request's message shape
pub type ConversationMessage = ChatMessage;

/// Unique session identifier
pub type SessionId = String;

/// An ordered conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    messages: Vec<ConversationMessage>,
}

impl Session {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        }
    }

    /// Append a message
    pub fn push(&mut self, message: ConversationMessage) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Last message, if any
    pub fn last(&self) -> Option<&ConversationMessage> {
        self.messages.last()
    }

    /// Drop all history
    pub fn reset(&mut self) {
        self.messages.clear();
        self.updated_at = Utc::now();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_appends_in_order() {
        let mut session = Session::new();
        assert!(session.is_empty());

        session.push(ConversationMessage::system("be brief"));
        session.push(ConversationMessage::user("hi"));
        session.push(ConversationMessage::function("add", r#"{"result":"5"}"#));

        assert_eq!(session.len(), 3);
        assert_eq!(session.messages()[1].content, "hi");
        assert_eq!(session.last().unwrap().name.as_deref(), Some("add"));
        assert!(session.updated_at >= session.created_at);
    }

    #[test]
    fn test_reset_keeps_identity() {
        let mut session = Session::new();
        let id = session.id.clone();
        session.push(ConversationMessage::user("hi"));

        session.reset();
        assert!(session.is_empty());
        assert_eq!(session.id, id);
    }

    #[test]
    fn test_message_shape_matches_request() {
        let json = serde_json::to_value(ConversationMessage::function("memory", "{}")).unwrap();
        assert_eq!(json["role"], "function");
        assert_eq!(json["name"], "memory");
        assert_eq!(json["content"], "{}");
    }
}
