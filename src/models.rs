//! Core data models used throughout mealbot.
//!
//! These types represent the documents, chunks, and chat messages that flow
//! through the ingestion and answer pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Raw document produced by the loader before chunking.
#[derive(Debug, Clone)]
pub struct Document {
    /// Stable identifier within its source: a relative file path or a URL.
    pub source_id: String,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

/// A chunk of a document's body text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// A chunk returned from a similarity lookup.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    pub score: f32,
    pub source_id: String,
}

/// Who authored a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry in a session's conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Validate an untyped JSON value into a message at the boundary.
    ///
    /// Accepts only `{"role": "user"|"assistant", "content": "<text>"}`.
    /// Anything else is a [`ChatError::UnsupportedMessageFormat`] — raised
    /// before any network call is made on the turn.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ChatError> {
        let obj = value.as_object().ok_or_else(|| {
            ChatError::UnsupportedMessageFormat(format!("expected an object, got {}", value))
        })?;

        let role = match obj.get("role").and_then(|r| r.as_str()) {
            Some("user") => Role::User,
            Some("assistant") => Role::Assistant,
            Some(other) => {
                return Err(ChatError::UnsupportedMessageFormat(format!(
                    "unknown role '{}'",
                    other
                )))
            }
            None => {
                return Err(ChatError::UnsupportedMessageFormat(
                    "missing 'role' field".to_string(),
                ))
            }
        };

        let content = obj.get("content").and_then(|c| c.as_str()).ok_or_else(|| {
            ChatError::UnsupportedMessageFormat("missing or non-string 'content' field".to_string())
        })?;

        Ok(Self {
            role,
            content: content.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_user() {
        let msg = ChatMessage::from_value(&json!({"role": "user", "content": "hi"})).unwrap();
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "hi");
    }

    #[test]
    fn test_from_value_assistant() {
        let msg =
            ChatMessage::from_value(&json!({"role": "assistant", "content": "hello"})).unwrap();
        assert_eq!(msg.role, Role::Assistant);
    }

    #[test]
    fn test_from_value_missing_role() {
        let err = ChatMessage::from_value(&json!({"content": "hi"})).unwrap_err();
        assert!(matches!(err, ChatError::UnsupportedMessageFormat(_)));
    }

    #[test]
    fn test_from_value_missing_content() {
        let err = ChatMessage::from_value(&json!({"role": "user"})).unwrap_err();
        assert!(matches!(err, ChatError::UnsupportedMessageFormat(_)));
    }

    #[test]
    fn test_from_value_unknown_role() {
        let err = ChatMessage::from_value(&json!({"role": "system", "content": "x"})).unwrap_err();
        assert!(matches!(err, ChatError::UnsupportedMessageFormat(_)));
    }

    #[test]
    fn test_from_value_not_an_object() {
        let err = ChatMessage::from_value(&json!("just a string")).unwrap_err();
        assert!(matches!(err, ChatError::UnsupportedMessageFormat(_)));
    }

    #[test]
    fn test_role_serde_lowercase() {
        let msg = ChatMessage::user("hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
    }
}
