//! ID generation utilities for Chartsmith
//!
//! Provides functions for generating identifiers for conversations, messages, and engine runs.

use rand::Rng;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn stamped(prefix: &str) -> String {
    let timestamp = now_ms();
    let random: u32 = rand::rng().random();
    format!("{}-{}-{:08x}", prefix, timestamp, random)
}

/// Generate a conversation ID
///
/// Format: `conv-{timestamp_ms}-{random_hex}`
pub fn generate_conversation_id() -> String {
    stamped("conv")
}

/// Generate a message ID
///
/// Format: `msg-{timestamp_ms}-{random_hex}`
/// Example: `msg-1738300800123-a1b2c3d4`
pub fn generate_message_id() -> String {
    stamped("msg")
}

/// Generate an ID for a single engine invocation
///
/// Format: `run-{tool_name}-{timestamp_ms}-{random_hex}`
pub fn generate_run_id(tool_name: &str) -> String {
    stamped(&format!("run-{}", tool_name))
}
