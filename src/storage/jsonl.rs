//! JSONL-backed conversation store with in-memory caching.
//!
//! One append-only file per conversation. Finalizing a message appends its new
//! version; on load, later versions of an id replace earlier ones in place.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde_json::Value;

use super::traits::{ConversationStore, Role, StoredMessage, validate_conversation_id};
use crate::error::{ChartsmithError, Result};
use crate::id::generate_message_id;

/// Conversation store writing `{base}/{conversation_id}.jsonl`.
#[derive(Debug)]
pub struct JsonlConversationStore {
    base_path: PathBuf,
    cache: RwLock<HashMap<String, Vec<StoredMessage>>>,
}

impl JsonlConversationStore {
    /// Create a store rooted at the given directory, creating it if needed.
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn conversation_path(&self, conversation_id: &str) -> PathBuf {
        self.base_path.join(format!("{}.jsonl", conversation_id))
    }

    /// Load a conversation into cache if not already loaded.
    fn ensure_loaded(&self, conversation_id: &str) -> Result<()> {
        validate_conversation_id(conversation_id)?;
        {
            let cache = self.cache.read().map_err(|e| ChartsmithError::Storage(e.to_string()))?;
            if cache.contains_key(conversation_id) {
                return Ok(());
            }
        }

        let mut cache = self.cache.write().map_err(|e| ChartsmithError::Storage(e.to_string()))?;
        if cache.contains_key(conversation_id) {
            return Ok(());
        }

        let path = self.conversation_path(conversation_id);
        let mut messages: Vec<StoredMessage> = Vec::new();
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for (lineno, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let message: StoredMessage = serde_json::from_str(&line).map_err(|e| {
                    ChartsmithError::Storage(format!("{}:{}: {}", path.display(), lineno + 1, e))
                })?;
                match messages.iter_mut().find(|m| m.id == message.id) {
                    Some(existing) => *existing = message,
                    None => messages.push(message),
                }
            }
            log::debug!("Loaded {} messages for conversation {}", messages.len(), conversation_id);
        }

        cache.insert(conversation_id.to_string(), messages);
        Ok(())
    }

    /// Append one message version to the conversation file.
    fn append_to_file(&self, message: &StoredMessage) -> Result<()> {
        let path = self.conversation_path(&message.conversation_id);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{}", serde_json::to_string(message)?)?;
        Ok(())
    }
}

impl ConversationStore for JsonlConversationStore {
    fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        metadata: Value,
        is_complete: bool,
    ) -> Result<String> {
        self.ensure_loaded(conversation_id)?;

        let message = StoredMessage::new(
            generate_message_id(),
            conversation_id,
            role,
            content,
            metadata,
            is_complete,
        );

        // File first (source of truth), then cache
        self.append_to_file(&message)?;

        let id = message.id.clone();
        let mut cache = self.cache.write().map_err(|e| ChartsmithError::Storage(e.to_string()))?;
        cache.entry(conversation_id.to_string()).or_default().push(message);
        Ok(id)
    }

    fn finalize_message(&self, conversation_id: &str, message_id: &str, content: &str, metadata: Value) -> Result<()> {
        self.ensure_loaded(conversation_id)?;

        let mut cache = self.cache.write().map_err(|e| ChartsmithError::Storage(e.to_string()))?;
        let message = cache
            .get_mut(conversation_id)
            .and_then(|messages| messages.iter_mut().find(|m| m.id == message_id))
            .ok_or_else(|| {
                ChartsmithError::Storage(format!("Message not found: {}/{}", conversation_id, message_id))
            })?;

        let mut updated = message.clone();
        updated.finalize(content, metadata);
        self.append_to_file(&updated)?;
        *message = updated;
        Ok(())
    }

    fn read_history(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        self.ensure_loaded(conversation_id)?;

        let cache = self.cache.read().map_err(|e| ChartsmithError::Storage(e.to_string()))?;
        Ok(cache.get(conversation_id).cloned().unwrap_or_default())
    }
}
