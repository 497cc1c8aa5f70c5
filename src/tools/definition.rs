//! Tool definitions and path-key addressing
//!
//! A tool is addressed by exactly one form: `"{category}/{tool_name}"`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::engine::EngineKind;
use crate::params::ParamSpec;

/// Canonical separator between category and tool name
pub const PATH_SEPARATOR: char = '/';

/// A parsed `(category, tool_name)` pair
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ToolPath {
    pub category: String,
    pub name: String,
}

impl ToolPath {
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
        }
    }

    /// Parse a lookup key
    ///
    /// Returns None unless the key splits on the separator into exactly two non-empty
    /// segments. No normalization or fuzzy matching is attempted.
    pub fn parse(key: &str) -> Option<Self> {
        let mut parts = key.split(PATH_SEPARATOR);
        let category = parts.next()?;
        let name = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        if !valid_segment(category) || !valid_segment(name) {
            return None;
        }
        Some(Self::new(category, name))
    }

    /// The slash-joined index key
    pub fn key(&self) -> String {
        format!("{}{}{}", self.category, PATH_SEPARATOR, self.name)
    }
}

impl fmt::Display for ToolPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.category, PATH_SEPARATOR, self.name)
    }
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty() && segment != "." && segment != ".." && segment.trim() == segment
}

/// A chart-generation tool as loaded from storage
///
/// Immutable once loaded; a catalog refresh replaces definitions wholesale.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub path: ToolPath,
    /// Display name
    pub display_name: String,
    pub description: String,
    /// Parameter name -> schema entry
    pub params: BTreeMap<String, ParamSpec>,
    /// Default values applied when the caller omits a parameter
    pub defaults: Map<String, Value>,
    /// Supported engines; the first entry is the default
    pub engines: Vec<EngineKind>,
    /// Per-engine entry script overrides, relative to `dir`
    pub entries: BTreeMap<EngineKind, String>,
    pub sample_data: Option<PathBuf>,
    pub sample_output: Option<PathBuf>,
    pub documentation: Option<String>,
    pub tags: Vec<String>,
    /// Directory the tool was loaded from
    pub dir: PathBuf,
}

impl ToolDefinition {
    /// Create a definition with no parameters supporting a single engine
    pub fn new(path: ToolPath, description: impl Into<String>, engine: EngineKind) -> Self {
        Self {
            display_name: path.name.clone(),
            path,
            description: description.into(),
            params: BTreeMap::new(),
            defaults: Map::new(),
            engines: vec![engine],
            entries: BTreeMap::new(),
            sample_data: None,
            sample_output: None,
            documentation: None,
            tags: Vec::new(),
            dir: PathBuf::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, spec: ParamSpec) -> Self {
        self.params.insert(name.into(), spec);
        self
    }

    pub fn with_default(mut self, name: impl Into<String>, value: Value) -> Self {
        self.defaults.insert(name.into(), value);
        self
    }

    pub fn with_engines(mut self, engines: Vec<EngineKind>) -> Self {
        self.engines = engines;
        self
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    pub fn key(&self) -> String {
        self.path.key()
    }

    /// The engine used when a request does not name one
    pub fn default_engine(&self) -> Option<EngineKind> {
        self.engines.first().copied()
    }

    pub fn supports(&self, engine: EngineKind) -> bool {
        self.engines.contains(&engine)
    }

    /// Names of parameters the schema marks required
    pub fn required_params(&self) -> impl Iterator<Item = &str> {
        self.params
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(name, _)| name.as_str())
    }
}
