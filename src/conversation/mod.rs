//! Conversation state: accumulating a chart request across dialogue turns

mod request;
mod state;

pub use request::{DialogueTurnResult, ToolRequest, ValidatedRequest};
pub use state::{CHART_TYPE_PARAM, ConversationState, Phase, StateSnapshot};
