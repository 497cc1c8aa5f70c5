//! Parameter schema: declared types, constraints, and value validation

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// Declared type of a tool parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    #[default]
    String,
    Integer,
    Number,
    Boolean,
    Enum,
    Array,
    Object,
    Color,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Enum => "enum",
            Self::Array => "array",
            Self::Object => "object",
            Self::Color => "color",
        }
    }
}

/// Schema entry for one parameter
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type", default)]
    pub kind: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_items: Option<usize>,
    /// Inline default; folded into the tool's defaults map at load time
    #[serde(default, skip_serializing)]
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn new(kind: ParamType) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_choices(mut self, choices: Vec<Value>) -> Self {
        self.choices = choices;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Validate a value against this spec, returning the (possibly coerced) value
    ///
    /// Strings that parse as the declared numeric or boolean type are coerced, since
    /// parameters extracted from free text arrive as strings.
    pub fn validate(&self, value: &Value) -> Result<Value, String> {
        if value.is_null() {
            return Err("value is null".to_string());
        }

        let coerced = match self.kind {
            ParamType::String => match value {
                Value::String(_) => value.clone(),
                Value::Number(n) => Value::String(n.to_string()),
                Value::Bool(b) => Value::String(b.to_string()),
                _ => return Err(format!("expected string, got {}", type_name(value))),
            },
            ParamType::Integer => {
                let n = as_f64(value).ok_or_else(|| format!("expected integer, got {}", type_name(value)))?;
                if n.fract() != 0.0 {
                    return Err(format!("expected integer, got {}", n));
                }
                // i64::MAX as f64 rounds up to 2^63, which is itself out of range
                if n < i64::MIN as f64 || n >= i64::MAX as f64 {
                    return Err(format!("{} is outside the integer range", n));
                }
                self.check_range(n)?;
                Value::Number(Number::from(n as i64))
            }
            ParamType::Number => {
                let n = as_f64(value).ok_or_else(|| format!("expected number, got {}", type_name(value)))?;
                self.check_range(n)?;
                Number::from_f64(n)
                    .map(Value::Number)
                    .ok_or_else(|| "number is not finite".to_string())?
            }
            ParamType::Boolean => match value {
                Value::Bool(_) => value.clone(),
                Value::String(s) => match s.trim().to_lowercase().as_str() {
                    "true" | "yes" | "on" | "1" => Value::Bool(true),
                    "false" | "no" | "off" | "0" => Value::Bool(false),
                    _ => return Err(format!("expected boolean, got '{}'", s)),
                },
                _ => return Err(format!("expected boolean, got {}", type_name(value))),
            },
            ParamType::Enum => value.clone(),
            ParamType::Array => {
                let items = value
                    .as_array()
                    .ok_or_else(|| format!("expected array, got {}", type_name(value)))?;
                if let Some(min_items) = self.min_items {
                    if items.len() < min_items {
                        return Err(format!("expected at least {} items, got {}", min_items, items.len()));
                    }
                }
                value.clone()
            }
            ParamType::Object => {
                if !value.is_object() {
                    return Err(format!("expected object, got {}", type_name(value)));
                }
                value.clone()
            }
            ParamType::Color => {
                let s = value
                    .as_str()
                    .ok_or_else(|| format!("expected color, got {}", type_name(value)))?;
                if !is_color(s) {
                    return Err(format!("'{}' is not a color", s));
                }
                Value::String(s.trim().to_string())
            }
        };

        if !self.choices.is_empty() && !self.choices.contains(&coerced) {
            let allowed: Vec<String> = self.choices.iter().map(render_choice).collect();
            return Err(format!("must be one of: {}", allowed.join(", ")));
        }

        Ok(coerced)
    }

    /// One-line human description used in clarification prompts
    pub fn hint(&self, name: &str) -> String {
        let mut hint = format!("{} ({})", name, self.kind.as_str());
        if !self.choices.is_empty() {
            let allowed: Vec<String> = self.choices.iter().map(render_choice).collect();
            hint.push_str(&format!(" one of [{}]", allowed.join(", ")));
        }
        match (self.min, self.max) {
            (Some(min), Some(max)) => hint.push_str(&format!(" in {}..={}", min, max)),
            (Some(min), None) => hint.push_str(&format!(" >= {}", min)),
            (None, Some(max)) => hint.push_str(&format!(" <= {}", max)),
            (None, None) => {}
        }
        if let Some(desc) = &self.description {
            hint.push_str(": ");
            hint.push_str(desc);
        }
        hint
    }

    fn check_range(&self, n: f64) -> Result<(), String> {
        if self.min.is_some_and(|min| n < min) {
            return Err(format!("{} is below the minimum {}", n, self.min.unwrap_or_default()));
        }
        if self.max.is_some_and(|max| n > max) {
            return Err(format!("{} is above the maximum {}", n, self.max.unwrap_or_default()));
        }
        Ok(())
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn render_choice(choice: &Value) -> String {
    match choice {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_color(s: &str) -> bool {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix('#') {
        return matches!(hex.len(), 3 | 6 | 8) && hex.chars().all(|c| c.is_ascii_hexdigit());
    }
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphabetic())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_accepts_scalars() {
        let spec = ParamSpec::new(ParamType::String);
        assert_eq!(spec.validate(&json!("title")).unwrap(), json!("title"));
        assert_eq!(spec.validate(&json!(3)).unwrap(), json!("3"));
        assert!(spec.validate(&json!([1])).is_err());
    }

    #[test]
    fn test_integer_coerces_numeric_strings() {
        let spec = ParamSpec::new(ParamType::Integer);
        assert_eq!(spec.validate(&json!("12")).unwrap(), json!(12));
        assert_eq!(spec.validate(&json!(4.0)).unwrap(), json!(4));
        assert!(spec.validate(&json!(4.5)).is_err());
        assert!(spec.validate(&json!("twelve")).is_err());
    }

    #[test]
    fn test_integer_out_of_range_rejected() {
        let spec = ParamSpec::new(ParamType::Integer);
        let err = spec.validate(&json!(1e30)).unwrap_err();
        assert!(err.contains("outside the integer range"));
        assert!(spec.validate(&json!(-1e30)).is_err());
        assert!(spec.validate(&json!("9223372036854775808")).is_err());
        assert_eq!(spec.validate(&json!(-9007199254740992i64)).unwrap(), json!(-9007199254740992i64));
    }

    #[test]
    fn test_number_range() {
        let spec = ParamSpec::new(ParamType::Number).with_range(Some(0.0), Some(1.0));
        assert_eq!(spec.validate(&json!(0.05)).unwrap(), json!(0.05));
        let err = spec.validate(&json!(1.5)).unwrap_err();
        assert!(err.contains("above the maximum"));
        let err = spec.validate(&json!("-1")).unwrap_err();
        assert!(err.contains("below the minimum"));
    }

    #[test]
    fn test_boolean_words() {
        let spec = ParamSpec::new(ParamType::Boolean);
        assert_eq!(spec.validate(&json!("yes")).unwrap(), json!(true));
        assert_eq!(spec.validate(&json!("off")).unwrap(), json!(false));
        assert!(spec.validate(&json!("maybe")).is_err());
    }

    #[test]
    fn test_enum_choices() {
        let spec = ParamSpec::new(ParamType::Enum).with_choices(vec![json!("linear"), json!("log")]);
        assert!(spec.validate(&json!("log")).is_ok());
        let err = spec.validate(&json!("sqrt")).unwrap_err();
        assert_eq!(err, "must be one of: linear, log");
    }

    #[test]
    fn test_array_min_items() {
        let mut spec = ParamSpec::new(ParamType::Array);
        spec.min_items = Some(2);
        assert!(spec.validate(&json!([1, 2])).is_ok());
        assert!(spec.validate(&json!([1])).is_err());
        assert!(spec.validate(&json!("1,2")).is_err());
    }

    #[test]
    fn test_color() {
        let spec = ParamSpec::new(ParamType::Color);
        assert!(spec.validate(&json!("#ff0000")).is_ok());
        assert!(spec.validate(&json!("#abc")).is_ok());
        assert!(spec.validate(&json!("steelblue")).is_ok());
        assert!(spec.validate(&json!("#zzzzzz")).is_err());
        assert!(spec.validate(&json!("rgb(1,2,3)")).is_err());
    }

    #[test]
    fn test_null_rejected() {
        let spec = ParamSpec::new(ParamType::String);
        assert!(spec.validate(&Value::Null).is_err());
    }

    #[test]
    fn test_hint() {
        let spec = ParamSpec::new(ParamType::Number)
            .with_range(Some(0.0), None)
            .with_description("log2 fold change cutoff");
        assert_eq!(spec.hint("fc"), "fc (number) >= 0: log2 fold change cutoff");
    }

    #[test]
    fn test_spec_deserialization_defaults() {
        let spec: ParamSpec = serde_json::from_str(r#"{"type": "integer", "min": 1}"#).unwrap();
        assert_eq!(spec.kind, ParamType::Integer);
        assert!(!spec.required);
        assert_eq!(spec.min, Some(1.0));

        let spec: ParamSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(spec.kind, ParamType::String);
    }
}
