//! Deterministic keyword interpreter

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::engine::EngineKind;
use crate::error::Result;
use crate::tools::{CatalogIndex, PATH_SEPARATOR, ToolPath};

use super::{InterpretContext, Interpretation, Interpreter};

const TRAILING_PUNCTUATION: &[char] = &[',', '.', ';', ':', '!', '?'];

/// Recognises tool paths, unique tool names, `key=value` pairs, engine words, and inline JSON data
#[derive(Debug, Clone, Default)]
pub struct KeywordInterpreter;

impl KeywordInterpreter {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous core, usable without a runtime
    pub fn extract(&self, message: &str, catalog: &CatalogIndex) -> Interpretation {
        let mut interpretation = Interpretation::default();
        let mut reasons = Vec::new();

        let (text, data) = extract_data(message);
        if let Some(data) = data {
            interpretation.data = Some(data);
            reasons.push("inline data".to_string());
        }

        let names = unique_names(catalog);
        let mut named_tool = None;

        for token in tokenize(&text) {
            if let Some((key, raw)) = split_assignment(&token) {
                interpretation.params.insert(key.to_string(), parse_value(raw));
                continue;
            }
            let word = token.trim_end_matches(TRAILING_PUNCTUATION);
            if word.contains(PATH_SEPARATOR) {
                if interpretation.chart_type.is_none() && ToolPath::parse(word).is_some() {
                    reasons.push(format!("tool path '{}'", word));
                    interpretation.chart_type = Some(word.to_string());
                }
                continue;
            }
            let lowered = word.to_lowercase();
            if lowered == "script" || lowered == "markup" {
                interpretation.engine = EngineKind::from_str(&lowered);
                continue;
            }
            if named_tool.is_none() {
                if let Some(key) = names.get(&lowered) {
                    named_tool = Some((word.to_string(), key.clone()));
                }
            }
        }

        if interpretation.chart_type.is_none() {
            if let Some((word, key)) = named_tool {
                reasons.push(format!("tool name '{}'", word));
                interpretation.chart_type = Some(key);
            }
        }
        if !interpretation.params.is_empty() {
            let keys: Vec<&str> = interpretation.params.keys().map(|k| k.as_str()).collect();
            reasons.push(format!("parameters {}", keys.join(", ")));
        }
        if let Some(engine) = interpretation.engine {
            reasons.push(format!("{} engine", engine));
        }

        interpretation.justification = if reasons.is_empty() {
            "nothing recognised".to_string()
        } else {
            reasons.join("; ")
        };
        interpretation
    }
}

#[async_trait]
impl Interpreter for KeywordInterpreter {
    async fn interpret(&self, message: &str, context: &InterpretContext<'_>) -> Result<Interpretation> {
        let interpretation = self.extract(message, context.catalog);
        log::debug!("Interpreted '{}' as {}", message, interpretation.justification);
        Ok(interpretation)
    }
}

/// Tool names that identify exactly one tool, lowercased
fn unique_names(catalog: &CatalogIndex) -> HashMap<String, String> {
    let mut seen: HashMap<String, Vec<String>> = HashMap::new();
    for tool in catalog.list(None) {
        seen.entry(tool.path.name.to_lowercase()).or_default().push(tool.key());
    }
    seen.into_iter()
        .filter_map(|(name, mut keys)| if keys.len() == 1 { keys.pop().map(|k| (name, k)) } else { None })
        .collect()
}

/// Pull a fenced block or a standalone JSON array out of the message
fn extract_data(message: &str) -> (String, Option<Value>) {
    if let Some(start) = message.find("```") {
        let body_start = start + 3;
        if let Some(len) = message[body_start..].find("```") {
            let body = &message[body_start..body_start + len];
            let body = body.strip_prefix("json").unwrap_or(body);
            if let Ok(value) = serde_json::from_str::<Value>(body.trim()) {
                if value.is_array() || value.is_object() {
                    let rest = format!("{} {}", &message[..start], &message[body_start + len + 3..]);
                    return (rest, Some(value));
                }
            }
        }
    }

    let Some(end) = message.rfind(']') else {
        return (message.to_string(), None);
    };
    for (start, c) in message.char_indices() {
        if start > end {
            break;
        }
        if c != '[' {
            continue;
        }
        let standalone = message[..start].chars().next_back().is_none_or(char::is_whitespace);
        if !standalone {
            continue;
        }
        if let Ok(value @ Value::Array(_)) = serde_json::from_str::<Value>(&message[start..=end]) {
            let rest = format!("{} {}", &message[..start], &message[end + 1..]);
            return (rest, Some(value));
        }
    }
    (message.to_string(), None)
}

/// Split on whitespace outside double quotes
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in text.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn split_assignment(token: &str) -> Option<(&str, &str)> {
    let (key, value) = token.split_once('=')?;
    let valid_key = !key.is_empty() && key.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-');
    if !valid_key || value.is_empty() {
        return None;
    }
    Some((key, value))
}

/// JSON when it parses, otherwise the bare string
fn parse_value(raw: &str) -> Value {
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        return value;
    }
    let trimmed = raw.trim_end_matches(TRAILING_PUNCTUATION);
    serde_json::from_str::<Value>(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}
