//! Normalized execution results

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::engine::EngineKind;
use crate::error::Result;

/// Where a rendered image can be found
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ImageRef {
    /// A content-addressed copy in the artifact directory
    File {
        path: PathBuf,
        media_type: String,
        sha256: String,
    },
    /// A data URI or remote URL passed through as-is
    Uri { uri: String },
}

/// Up to three result kinds; whatever the backend did not produce stays None
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart: Option<Value>,
}

impl Payload {
    pub fn is_empty(&self) -> bool {
        self.data.is_none() && self.image.is_none() && self.chart.is_none()
    }

    /// Names of the kinds present, for logging and persistence metadata
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds = Vec::new();
        if self.data.is_some() {
            kinds.push("data");
        }
        if self.image.is_some() {
            kinds.push("image");
        }
        if self.chart.is_some() {
            kinds.push("chart");
        }
        kinds
    }
}

/// A successful dispatch
#[derive(Debug, Clone, Serialize)]
pub struct Execution {
    pub run_id: String,
    pub chart_type: String,
    pub engine: EngineKind,
    pub params_used: Map<String, Value>,
    pub payload: Payload,
    pub elapsed_ms: u64,
}

pub type ExecutionOutcome = Result<Execution>;
