//! Conversation persistence contract and message records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ChartsmithError, Result};

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub metadata: Value,
    /// False while an execution it describes is still in flight
    pub is_complete: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn new(
        id: impl Into<String>,
        conversation_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
        metadata: Value,
        is_complete: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
            metadata,
            is_complete,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a finalization: new content and metadata, marked complete.
    pub fn finalize(&mut self, content: impl Into<String>, metadata: Value) {
        self.content = content.into();
        self.metadata = metadata;
        self.is_complete = true;
        self.updated_at = Utc::now();
    }
}

/// Persistence collaborator for conversation history.
///
/// Messages come back from `read_history` in append order.
pub trait ConversationStore: Send + Sync {
    /// Append a message and return its id.
    fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        metadata: Value,
        is_complete: bool,
    ) -> Result<String>;

    /// Replace a message's content and metadata and mark it complete.
    fn finalize_message(&self, conversation_id: &str, message_id: &str, content: &str, metadata: Value) -> Result<()>;

    /// All messages of a conversation; empty for an unknown conversation.
    fn read_history(&self, conversation_id: &str) -> Result<Vec<StoredMessage>>;
}

/// Conversation ids become file names, so they must be a single plain path segment.
pub fn validate_conversation_id(conversation_id: &str) -> Result<()> {
    let bad = conversation_id.is_empty()
        || conversation_id == "."
        || conversation_id.contains("..")
        || conversation_id.contains(['/', '\\'])
        || conversation_id.chars().any(char::is_control);
    if bad {
        return Err(ChartsmithError::Storage(format!(
            "Invalid conversation id: '{}'",
            conversation_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_value(Role::Assistant).unwrap(), json!("assistant"));
        assert_eq!(Role::User.to_string(), "user");
    }

    #[test]
    fn test_finalize_marks_complete() {
        let mut msg = StoredMessage::new("m1", "c1", Role::Assistant, "running", json!({"stage": "dispatched"}), false);
        let created = msg.created_at;
        msg.finalize("done", json!({"stage": "complete"}));
        assert!(msg.is_complete);
        assert_eq!(msg.content, "done");
        assert_eq!(msg.metadata["stage"], "complete");
        assert_eq!(msg.created_at, created);
        assert!(msg.updated_at >= created);
    }

    #[test]
    fn test_validate_conversation_id() {
        assert!(validate_conversation_id("conv-123_abc").is_ok());
        for bad in ["", ".", "..", "a/b", "a\\b", "../etc", "x\ny"] {
            assert!(validate_conversation_id(bad).is_err(), "expected '{}' rejected", bad.escape_debug());
        }
    }
}
