//! Per-conversation mutual exclusion

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::conversation::ConversationState;
use crate::error::{ChartsmithError, Result};

type Slot = Arc<AsyncMutex<ConversationState>>;

/// One async mutex per conversation, created on first use and dropped once idle
///
/// Turns on different conversations never contend; a second turn on a busy
/// conversation is rejected rather than queued. Idle conversations are not kept in
/// memory: their state lives in the persisted history and is restored on the next turn.
#[derive(Debug, Default)]
pub struct ConversationLocks {
    slots: Mutex<HashMap<String, Slot>>,
}

/// Exclusive access to one conversation's state; evicts the idle slot on drop
#[derive(Debug)]
pub struct ConversationGuard<'a> {
    locks: &'a ConversationLocks,
    conversation_id: String,
    guard: OwnedMutexGuard<ConversationState>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take exclusive access to a conversation's state without waiting
    pub fn try_acquire(&self, conversation_id: &str) -> Result<ConversationGuard<'_>> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots
                .entry(conversation_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(ConversationState::new(conversation_id))))
                .clone()
        };
        let guard = slot.try_lock_owned().map_err(|_| {
            log::debug!("Conversation {} already has a turn in progress", conversation_id);
            ChartsmithError::ConcurrentConversationConflict(conversation_id.to_string())
        })?;
        Ok(ConversationGuard {
            locks: self,
            conversation_id: conversation_id.to_string(),
            guard,
        })
    }

    /// Number of conversations currently held or being acquired
    pub fn len(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Deref for ConversationGuard<'_> {
    type Target = ConversationState;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for ConversationGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl Drop for ConversationGuard<'_> {
    fn drop(&mut self) {
        let mut slots = self.locks.slots.lock().unwrap_or_else(|e| e.into_inner());
        let mutex = OwnedMutexGuard::mutex(&self.guard);
        // Held only by the map and this guard: nobody else is waiting on it
        let idle = slots
            .get(&self.conversation_id)
            .is_some_and(|slot| Arc::ptr_eq(slot, mutex) && Arc::strong_count(slot) == 2);
        if idle {
            slots.remove(&self.conversation_id);
            log::debug!("Conversation {} idle, lock slot released", self.conversation_id);
        }
    }
}
