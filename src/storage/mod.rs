//! Storage layer for Chartsmith - conversation history persistence.
//!
//! The orchestrator talks to a [`ConversationStore`]; two implementations ship:
//! an in-memory map for tests and embedding, and append-only JSONL files.

mod jsonl;
mod memory;
mod traits;

pub use jsonl::JsonlConversationStore;
pub use memory::MemoryStore;
pub use traits::{ConversationStore, Role, StoredMessage, validate_conversation_id};
