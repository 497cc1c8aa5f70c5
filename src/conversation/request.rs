//! Tool requests and the two-state dialogue outcome

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::engine::EngineKind;
use crate::tools::ToolDefinition;

/// A chart request as accumulated from the conversation
///
/// Built incrementally; only dispatchable once wrapped in a [`ValidatedRequest`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Tool path key, `"{category}/{tool_name}"`
    pub chart_type: String,
    /// Explicit engine selection; None means the tool's default
    pub engine: Option<EngineKind>,
    /// Inline data payload handed to the rendering script
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub params: Map<String, Value>,
    #[serde(default)]
    pub justification: String,
}

/// A request whose parameters have been resolved against its tool's schema
///
/// Only the parameter resolver constructs these, so every request reaching the
/// dispatcher has all required parameters present.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    request: ToolRequest,
    tool: Arc<ToolDefinition>,
}

impl ValidatedRequest {
    pub(crate) fn new(request: ToolRequest, tool: Arc<ToolDefinition>) -> Self {
        Self { request, tool }
    }

    pub fn request(&self) -> &ToolRequest {
        &self.request
    }

    pub fn tool(&self) -> &Arc<ToolDefinition> {
        &self.tool
    }

    pub fn chart_type(&self) -> &str {
        &self.request.chart_type
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.request.params
    }

    pub fn into_request(self) -> ToolRequest {
        self.request
    }
}

/// Outcome of feeding one user turn into the conversation state
#[derive(Debug, Clone)]
pub enum DialogueTurnResult {
    /// More information is required before anything can be dispatched
    NeedsInfo {
        missing_params: Vec<String>,
        suggestions: Vec<String>,
        /// Why supplied values were rejected, if any were
        notes: Vec<String>,
    },
    /// A complete request is ready for dispatch
    Ready(ValidatedRequest),
    /// The turn carried nothing actionable; the conversation stays where it was
    Unchanged { chart_type: Option<String> },
}

impl DialogueTurnResult {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn missing_params(&self) -> &[String] {
        match self {
            Self::NeedsInfo { missing_params, .. } => missing_params,
            Self::Ready(_) | Self::Unchanged { .. } => &[],
        }
    }
}
