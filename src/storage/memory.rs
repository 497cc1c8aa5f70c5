//! In-memory conversation store.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;

use super::traits::{ConversationStore, Role, StoredMessage, validate_conversation_id};
use crate::error::{ChartsmithError, Result};
use crate::id::generate_message_id;

/// Keeps every conversation in a map; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    conversations: RwLock<HashMap<String, Vec<StoredMessage>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of conversations with at least one message.
    pub fn conversation_count(&self) -> usize {
        self.conversations.read().map(|c| c.len()).unwrap_or_default()
    }
}

impl ConversationStore for MemoryStore {
    fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        metadata: Value,
        is_complete: bool,
    ) -> Result<String> {
        validate_conversation_id(conversation_id)?;
        let message = StoredMessage::new(
            generate_message_id(),
            conversation_id,
            role,
            content,
            metadata,
            is_complete,
        );
        let id = message.id.clone();

        let mut conversations = self
            .conversations
            .write()
            .map_err(|e| ChartsmithError::Storage(e.to_string()))?;
        conversations.entry(conversation_id.to_string()).or_default().push(message);
        Ok(id)
    }

    fn finalize_message(&self, conversation_id: &str, message_id: &str, content: &str, metadata: Value) -> Result<()> {
        let mut conversations = self
            .conversations
            .write()
            .map_err(|e| ChartsmithError::Storage(e.to_string()))?;
        let message = conversations
            .get_mut(conversation_id)
            .and_then(|messages| messages.iter_mut().find(|m| m.id == message_id))
            .ok_or_else(|| {
                ChartsmithError::Storage(format!("Message not found: {}/{}", conversation_id, message_id))
            })?;
        message.finalize(content, metadata);
        Ok(())
    }

    fn read_history(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        let conversations = self
            .conversations
            .read()
            .map_err(|e| ChartsmithError::Storage(e.to_string()))?;
        Ok(conversations.get(conversation_id).cloned().unwrap_or_default())
    }
}
