//! Parameter resolution: merge supplied values over defaults and find what is missing

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::conversation::{ToolRequest, ValidatedRequest};
use crate::engine::EngineKind;
use crate::error::{ChartsmithError, Result};
use crate::tools::ToolDefinition;

/// A supplied value that failed schema validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidParam {
    pub name: String,
    pub reason: String,
}

/// Result of resolving supplied parameters against a tool's schema
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Resolution {
    /// Defaults overlaid with valid supplied values
    pub params: Map<String, Value>,
    /// Required parameters with no usable value, plus any that failed validation
    pub missing_required: Vec<String>,
    pub invalid: Vec<InvalidParam>,
    /// Supplied names the schema does not declare
    pub ignored: Vec<String>,
}

impl Resolution {
    pub fn is_complete(&self) -> bool {
        self.missing_required.is_empty()
    }

    /// Turn a complete resolution into a dispatchable request
    pub fn into_request(
        self,
        tool: Arc<ToolDefinition>,
        engine: Option<EngineKind>,
        data: Option<Value>,
        justification: impl Into<String>,
    ) -> Result<ValidatedRequest> {
        if !self.is_complete() {
            return Err(ChartsmithError::MissingRequiredParameter(self.missing_required));
        }
        let request = ToolRequest {
            chart_type: tool.key(),
            engine,
            data,
            params: self.params,
            justification: justification.into(),
        };
        Ok(ValidatedRequest::new(request, tool))
    }
}

/// Resolve supplied parameters for a tool
///
/// Supplied values override defaults. A supplied value that fails validation is reported
/// as missing even when a default exists, so the user is asked again rather than having
/// their input silently replaced. Null values count as not supplied.
pub fn resolve(definition: &ToolDefinition, supplied: &Map<String, Value>) -> Resolution {
    let mut resolution = Resolution {
        params: definition.defaults.clone(),
        ..Default::default()
    };

    for (name, value) in supplied {
        if value.is_null() {
            continue;
        }
        let Some(spec) = definition.params.get(name) else {
            log::debug!("Ignoring undeclared parameter '{}' for {}", name, definition.key());
            resolution.ignored.push(name.clone());
            continue;
        };
        match spec.validate(value) {
            Ok(coerced) => {
                resolution.params.insert(name.clone(), coerced);
            }
            Err(reason) => {
                resolution.params.remove(name);
                resolution.invalid.push(InvalidParam {
                    name: name.clone(),
                    reason,
                });
            }
        }
    }

    for (name, spec) in &definition.params {
        let invalid = resolution.invalid.iter().any(|i| &i.name == name);
        let absent = spec.required && !resolution.params.contains_key(name);
        if invalid || absent {
            resolution.missing_required.push(name.clone());
        }
    }

    resolution
}

/// Validate caller-structured parameters, failing on the first problem
///
/// Used when a caller addresses a tool directly rather than through free text, where
/// a bad value is a caller error instead of a reason to ask again.
pub fn validate_strict(definition: &ToolDefinition, supplied: &Map<String, Value>) -> Result<()> {
    for (name, value) in supplied {
        let spec = definition.params.get(name).ok_or_else(|| ChartsmithError::InvalidParameter {
            name: name.clone(),
            reason: format!("not a parameter of {}", definition.key()),
        })?;
        if value.is_null() {
            continue;
        }
        spec.validate(value)
            .map_err(|reason| ChartsmithError::InvalidParameter {
                name: name.clone(),
                reason,
            })?;
    }
    Ok(())
}
