use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Opaque, unique identifier for a transcript message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Who produced a message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Text the user submitted.
    Question,

    /// Text the service streamed back.
    Answer,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::Question => f.write_str("question"),
            MessageRole::Answer => f.write_str("answer"),
        }
    }
}

/// A finalized transcript entry.
///
/// Messages are immutable once created; the transcript only ever appends them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique identifier.
    pub id: MessageId,

    /// Question or answer.
    pub role: MessageRole,

    /// Message text.
    pub content: String,

    /// When the message was created.  Stored in UTC; the year must lie in 0000 through 9999.
    #[serde(with = "crate::utils::time")]
    pub created_at: OffsetDateTime,

    /// For answers, the question that was pending when the answer began streaming.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<MessageId>,
}

impl Message {
    /// Creates a question message stamped with the current time.
    pub fn question(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            role: MessageRole::Question,
            content: content.into(),
            created_at: OffsetDateTime::now_utc(),
            in_reply_to: None,
        }
    }

    /// Creates an answer message stamped with the current time.
    pub fn answer(content: impl Into<String>, in_reply_to: Option<MessageId>) -> Self {
        Self {
            id: MessageId::generate(),
            role: MessageRole::Answer,
            content: content.into(),
            created_at: OffsetDateTime::now_utc(),
            in_reply_to,
        }
    }

    /// Returns true for question messages.
    pub fn is_question(&self) -> bool {
        self.role == MessageRole::Question
    }

    /// Returns true for answer messages.
    pub fn is_answer(&self) -> bool {
        self.role == MessageRole::Answer
    }
}
