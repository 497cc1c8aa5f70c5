//! Engine selector shared by tool definitions, requests, and backends

use std::fmt;

use serde::{Deserialize, Serialize};

/// The closed set of rendering backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// General-purpose scripting runtime (raster images, tabular data)
    Script,
    /// Markup-based renderer (declarative chart specs, documents)
    Markup,
}

impl EngineKind {
    /// All engines in selection-priority order
    pub const ALL: [EngineKind; 2] = [EngineKind::Script, EngineKind::Markup];

    /// Parse from string representation
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "script" | "scripting" => Some(Self::Script),
            "markup" => Some(Self::Markup),
            _ => None,
        }
    }

    /// Canonical lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::Markup => "markup",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
