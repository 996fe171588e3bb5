//! Chat message types shared between templates and the completion service.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// The author of a [`ChatMessage`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions that frame the whole conversation.
    System,

    /// The person chatting with the model.
    User,

    /// The model's own replies.
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        })
    }
}

/// One turn of a conversation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who authored this turn.
    pub role: Role,

    /// The turn's text.
    pub content: String,

    /// Unix timestamp (seconds) of when the message was created.
    #[serde(default)]
    pub timestamp: u64,

    /// Whether this message is still receiving streamed fragments.
    #[serde(skip)]
    pub is_streaming: bool,
}

impl ChatMessage {
    /// Creates a message stamped with the current wall-clock time.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Self {
            role,
            content: content.into(),
            timestamp,
            is_streaming: false,
        }
    }

    /// A [`Role::System`] message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// A [`Role::User`] message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// A [`Role::Assistant`] message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Appends a streamed fragment to this message's content.
    pub fn append(&mut self, fragment: &str) {
        self.content.push_str(fragment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_display_in_lowercase() {
        assert_eq!(Role::System.to_string(), "system");
        assert_eq!(Role::User.to_string(), "user");
        assert_eq!(Role::Assistant.to_string(), "assistant");
    }

    #[test]
    fn serde_round_trip_preserves_role_and_content() {
        let message = ChatMessage::user("hello");
        let json = serde_json::to_string(&message).unwrap();

        assert!(json.contains("\"role\":\"user\""));

        let back: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, Role::User);
        assert_eq!(back.content, "hello");
        assert_eq!(back.timestamp, message.timestamp);
        assert!(!back.is_streaming);
    }

    #[test]
    fn append_extends_content() {
        let mut message = ChatMessage::assistant("Hel");
        message.append("lo");
        assert_eq!(message.content, "Hello");
    }
}
