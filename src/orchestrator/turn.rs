//! Turn input and response shapes

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::engine::EngineKind;
use crate::error::ChartsmithError;
use crate::output::{Execution, ImageRef};

/// An already-authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl UserIdentity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: None,
        }
    }
}

/// One user turn
///
/// `params`, `engine`, and `chart_type` are structured inputs that override whatever
/// the interpreter extracts from `message`.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub conversation_id: String,
    pub user: UserIdentity,
    pub message: String,
    pub params: Map<String, Value>,
    pub engine: Option<EngineKind>,
    pub chart_type: Option<String>,
}

impl TurnInput {
    pub fn new(conversation_id: impl Into<String>, user: UserIdentity, message: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user,
            message: message.into(),
            params: Map::new(),
            engine: None,
            chart_type: None,
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params.extend(params);
        self
    }

    pub fn with_engine(mut self, engine: EngineKind) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_chart_type(mut self, chart_type: impl Into<String>) -> Self {
        self.chart_type = Some(chart_type.into());
        self
    }
}

/// What the caller gets back for a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnResponse {
    Clarification {
        message: String,
        missing_params: Vec<String>,
        suggestions: Vec<String>,
    },
    Execution {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image: Option<ImageRef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chart: Option<Value>,
        params_used: Map<String, Value>,
        message: String,
        retryable: bool,
    },
}

impl TurnResponse {
    pub(crate) fn succeeded(execution: Execution, message: String) -> Self {
        Self::Execution {
            success: true,
            data: execution.payload.data,
            image: execution.payload.image,
            chart: execution.payload.chart,
            params_used: execution.params_used,
            message,
            retryable: false,
        }
    }

    pub(crate) fn failed(error: &ChartsmithError, params_used: Map<String, Value>) -> Self {
        Self::Execution {
            success: false,
            data: None,
            image: None,
            chart: None,
            params_used,
            message: error.to_string(),
            retryable: error.is_retryable(),
        }
    }

    pub fn is_clarification(&self) -> bool {
        matches!(self, Self::Clarification { .. })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Execution { success: true, .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Clarification { message, .. } | Self::Execution { message, .. } => message,
        }
    }

    pub fn missing_params(&self) -> &[String] {
        match self {
            Self::Clarification { missing_params, .. } => missing_params,
            Self::Execution { .. } => &[],
        }
    }
}
