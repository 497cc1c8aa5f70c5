//! Free-text interpretation into candidate chart type, parameters, and engine
//!
//! The orchestrator treats interpretation as an external capability; this module
//! defines the seam and ships a deterministic keyword-based implementation.

mod keyword;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::engine::EngineKind;
use crate::error::Result;
use crate::storage::StoredMessage;
use crate::tools::CatalogIndex;

pub use keyword::KeywordInterpreter;

/// What an interpreter extracted from one user message
///
/// Every field is a candidate; the conversation state decides what is valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Interpretation {
    /// Tool path key or reference, possibly unresolvable
    #[serde(default)]
    pub chart_type: Option<String>,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub engine: Option<EngineKind>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub justification: String,
}

impl Interpretation {
    pub fn is_empty(&self) -> bool {
        self.chart_type.is_none() && self.params.is_empty() && self.engine.is_none() && self.data.is_none()
    }
}

/// What an interpreter may consult besides the message itself
pub struct InterpretContext<'a> {
    pub catalog: &'a CatalogIndex,
    pub history: &'a [StoredMessage],
    pub current_chart_type: Option<&'a str>,
}

/// Turns free text into an [`Interpretation`]
#[async_trait]
pub trait Interpreter: Send + Sync {
    async fn interpret(&self, message: &str, context: &InterpretContext<'_>) -> Result<Interpretation>;
}
