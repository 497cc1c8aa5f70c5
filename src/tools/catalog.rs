//! Tool catalog loading from the tool storage tree
//!
//! Scans `{root}/{category}/{tool_name}/` directories into an immutable index keyed by
//! `"{category}/{tool_name}"`. Refresh builds a complete new index and swaps it in, so
//! readers holding a snapshot never observe a partially rebuilt catalog.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::engine::EngineKind;
use crate::error::{ChartsmithError, Result};
use crate::params::ParamSpec;

use super::definition::{ToolDefinition, ToolPath};

const META_FILES: [&str; 3] = ["meta.json", "meta.yaml", "meta.yml"];
const SAMPLE_DATA_FILES: [&str; 3] = ["sample.csv", "sample.json", "data.csv"];
const SAMPLE_OUTPUT_FILES: [&str; 3] = ["sample.png", "sample.svg", "sample.html"];
const DOC_FILES: [&str; 3] = ["README.md", "doc.md", "docs.md"];

/// On-disk representation of a tool's metadata descriptor
#[derive(Debug, Deserialize)]
struct ToolMeta {
    name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    engines: Vec<String>,
    engine: Option<String>,
    #[serde(default)]
    params: BTreeMap<String, ParamSpec>,
    #[serde(default)]
    defaults: Map<String, Value>,
    sample_data: Option<String>,
    sample_output: Option<String>,
    #[serde(default)]
    entry: BTreeMap<String, String>,
    #[serde(default)]
    tags: Vec<String>,
}

/// A tool directory excluded from the index, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedTool {
    pub path: String,
    pub reason: String,
}

impl SkippedTool {
    pub fn to_error(&self) -> ChartsmithError {
        ChartsmithError::CatalogLoad {
            path: self.path.clone(),
            reason: self.reason.clone(),
        }
    }
}

/// Summary of one catalog load
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: Vec<SkippedTool>,
}

/// Immutable index of tool definitions
#[derive(Debug, Default)]
pub struct CatalogIndex {
    tools: BTreeMap<String, Arc<ToolDefinition>>,
    report: LoadReport,
}

impl CatalogIndex {
    /// Build an index, excluding every definition whose key collides with another
    pub fn from_definitions(definitions: Vec<ToolDefinition>) -> Self {
        Self::build(definitions, Vec::new())
    }

    fn build(definitions: Vec<ToolDefinition>, mut skipped: Vec<SkippedTool>) -> Self {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for def in &definitions {
            *counts.entry(def.key()).or_default() += 1;
        }

        let mut tools = BTreeMap::new();
        for def in definitions {
            let key = def.key();
            if counts.get(&key).copied().unwrap_or_default() > 1 {
                log::warn!("Duplicate tool key '{}' in {}, excluding", key, def.dir.display());
                skipped.push(SkippedTool {
                    path: key,
                    reason: "duplicate tool key".to_string(),
                });
                continue;
            }
            tools.insert(key, Arc::new(def));
        }

        let report = LoadReport {
            loaded: tools.len(),
            skipped,
        };
        Self { tools, report }
    }

    /// Resolve a `"{category}/{tool_name}"` key; malformed keys never resolve
    pub fn lookup(&self, key: &str) -> Result<Arc<ToolDefinition>> {
        let path = ToolPath::parse(key).ok_or_else(|| ChartsmithError::ToolNotFound(key.to_string()))?;
        self.tools
            .get(&path.key())
            .cloned()
            .ok_or_else(|| ChartsmithError::ToolNotFound(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lookup(key).is_ok()
    }

    /// Definitions ordered by key, optionally restricted to one category
    pub fn list(&self, category: Option<&str>) -> Vec<Arc<ToolDefinition>> {
        self.tools
            .values()
            .filter(|def| category.is_none_or(|c| def.path.category == c))
            .cloned()
            .collect()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.tools.keys().map(|k| k.as_str()).collect()
    }

    pub fn categories(&self) -> Vec<String> {
        let set: BTreeSet<&str> = self.tools.values().map(|d| d.path.category.as_str()).collect();
        set.into_iter().map(String::from).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    /// Candidate keys for a clarification prompt
    ///
    /// Ranks tools by tokens shared with the query. Only used to suggest, never to resolve.
    pub fn suggest(&self, query: &str, limit: usize) -> Vec<String> {
        let wanted = tokens(query);
        let mut scored: Vec<(usize, &str)> = self
            .tools
            .iter()
            .map(|(key, def)| {
                let mut have = tokens(key);
                have.extend(tokens(&def.display_name));
                for tag in &def.tags {
                    have.extend(tokens(tag));
                }
                (wanted.intersection(&have).count(), key.as_str())
            })
            .filter(|(score, _)| *score > 0)
            .collect();

        if scored.is_empty() {
            return self.tools.keys().take(limit).cloned().collect();
        }

        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(b.1)));
        scored.into_iter().take(limit).map(|(_, key)| key.to_string()).collect()
    }

    /// SHA-256 over the canonical serialization of every definition
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (key, def) in &self.tools {
            hasher.update(key.as_bytes());
            match serde_json::to_vec(def.as_ref()) {
                Ok(bytes) => hasher.update(&bytes),
                Err(e) => log::warn!("Failed to serialize '{}' for fingerprint: {}", key, e),
            }
        }
        hex::encode(hasher.finalize())
    }
}

fn tokens(s: &str) -> BTreeSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Shared, atomically refreshable tool catalog
#[derive(Debug)]
pub struct ToolCatalog {
    root: PathBuf,
    current: RwLock<Arc<CatalogIndex>>,
}

impl ToolCatalog {
    /// Load the catalog from a storage root
    ///
    /// Fails only when the root itself cannot be read; malformed tools are skipped.
    pub fn load(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let index = scan(&root)?;
        log::info!(
            "Loaded {} tools from {} ({} skipped)",
            index.len(),
            root.display(),
            index.report.skipped.len()
        );
        Ok(Self {
            root,
            current: RwLock::new(Arc::new(index)),
        })
    }

    /// Wrap a prebuilt index (no storage root; refresh rescans nothing)
    pub fn from_index(index: CatalogIndex) -> Self {
        Self {
            root: PathBuf::new(),
            current: RwLock::new(Arc::new(index)),
        }
    }

    /// Rescan storage and swap in the new index
    ///
    /// On failure the previous index stays in place.
    pub fn refresh(&self) -> Result<Arc<CatalogIndex>> {
        if self.root.as_os_str().is_empty() {
            return Ok(self.snapshot());
        }
        let index = Arc::new(scan(&self.root).inspect_err(|e| {
            log::warn!("Catalog refresh failed, keeping previous index: {}", e);
        })?);
        let previous = {
            let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *current, index.clone())
        };
        log::info!(
            "Catalog refreshed: {} -> {} tools (fingerprint {})",
            previous.len(),
            index.len(),
            &index.fingerprint()[..12]
        );
        Ok(index)
    }

    /// The current index; stays valid across later refreshes
    pub fn snapshot(&self) -> Arc<CatalogIndex> {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn lookup(&self, key: &str) -> Result<Arc<ToolDefinition>> {
        self.snapshot().lookup(key)
    }

    pub fn list(&self, category: Option<&str>) -> Vec<Arc<ToolDefinition>> {
        self.snapshot().list(category)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn scan(root: &Path) -> Result<CatalogIndex> {
    fs::read_dir(root)
        .map_err(|e| ChartsmithError::CatalogUnavailable(format!("{}: {}", root.display(), e)))?;

    let pattern = format!("{}/*/*", glob::Pattern::escape(&root.to_string_lossy()));
    let entries = glob::glob(&pattern)
        .map_err(|e| ChartsmithError::CatalogUnavailable(format!("bad storage root pattern: {}", e)))?;

    let mut definitions = Vec::new();
    let mut skipped = Vec::new();

    for entry in entries {
        let dir = match entry {
            Ok(dir) => dir,
            Err(e) => {
                log::warn!("Unreadable catalog entry: {}", e);
                skipped.push(SkippedTool {
                    path: e.path().display().to_string(),
                    reason: e.error().to_string(),
                });
                continue;
            }
        };
        if !dir.is_dir() || is_hidden(&dir) || dir.parent().is_some_and(is_hidden) {
            continue;
        }

        let Some(path) = tool_path_for(&dir) else {
            log::warn!("Skipping tool directory with unusable name: {}", dir.display());
            skipped.push(SkippedTool {
                path: dir.display().to_string(),
                reason: "directory name is not a valid path segment".to_string(),
            });
            continue;
        };

        match load_tool(&dir, path.clone()) {
            Ok(def) => definitions.push(def),
            Err(reason) => {
                log::warn!("Skipping tool {}: {}", path, reason);
                skipped.push(SkippedTool {
                    path: path.key(),
                    reason,
                });
            }
        }
    }

    Ok(CatalogIndex::build(definitions, skipped))
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') || n.starts_with('_'))
}

fn tool_path_for(dir: &Path) -> Option<ToolPath> {
    let name = dir.file_name()?.to_str()?;
    let category = dir.parent()?.file_name()?.to_str()?;
    ToolPath::parse(&format!("{}/{}", category, name))
}

fn read_meta(dir: &Path) -> std::result::Result<ToolMeta, String> {
    for file in META_FILES {
        let path = dir.join(file);
        if !path.is_file() {
            continue;
        }
        let content = fs::read_to_string(&path).map_err(|e| format!("cannot read {}: {}", file, e))?;
        return if file.ends_with(".json") {
            serde_json::from_str(&content).map_err(|e| format!("invalid {}: {}", file, e))
        } else {
            serde_yaml::from_str(&content).map_err(|e| format!("invalid {}: {}", file, e))
        };
    }
    Err("no metadata descriptor (meta.json or meta.yaml)".to_string())
}

fn load_tool(dir: &Path, path: ToolPath) -> std::result::Result<ToolDefinition, String> {
    let meta = read_meta(dir)?;

    let display_name = meta
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or("missing required field 'name'")?;
    let description = meta
        .description
        .filter(|d| !d.trim().is_empty())
        .ok_or("missing required field 'description'")?;

    let mut engines = Vec::new();
    for raw in meta.engine.iter().chain(meta.engines.iter()) {
        let kind = EngineKind::from_str(raw).ok_or_else(|| format!("unknown engine '{}'", raw))?;
        if !engines.contains(&kind) {
            engines.push(kind);
        }
    }
    if engines.is_empty() {
        return Err("missing required field 'engines'".to_string());
    }

    let mut entries = BTreeMap::new();
    for (raw, file) in meta.entry {
        let kind = EngineKind::from_str(&raw).ok_or_else(|| format!("unknown engine '{}' in entry", raw))?;
        let contained = Path::new(&file)
            .components()
            .all(|c| matches!(c, std::path::Component::Normal(_)));
        if !contained {
            return Err(format!("entry '{}' must be a path inside the tool directory", file));
        }
        entries.insert(kind, file);
    }

    let mut defaults = Map::new();
    for (name, spec) in &meta.params {
        if let Some(value) = &spec.default {
            defaults.insert(name.clone(), value.clone());
        }
    }
    defaults.extend(meta.defaults);
    for (name, value) in defaults.iter_mut() {
        if let Some(spec) = meta.params.get(name) {
            *value = spec
                .validate(value)
                .map_err(|reason| format!("invalid default for '{}': {}", name, reason))?;
        }
    }

    let sample_data = named_or_first(dir, meta.sample_data.as_deref(), &SAMPLE_DATA_FILES);
    let sample_output = named_or_first(dir, meta.sample_output.as_deref(), &SAMPLE_OUTPUT_FILES);
    let documentation = DOC_FILES
        .iter()
        .map(|f| dir.join(f))
        .find(|p| p.is_file())
        .and_then(|p| match fs::read_to_string(&p) {
            Ok(body) => Some(body),
            Err(e) => {
                log::warn!("Ignoring unreadable documentation {}: {}", p.display(), e);
                None
            }
        });

    Ok(ToolDefinition {
        path,
        display_name,
        description,
        params: meta.params,
        defaults,
        engines,
        entries,
        sample_data,
        sample_output,
        documentation,
        tags: meta.tags,
        dir: dir.to_path_buf(),
    })
}

fn named_or_first(dir: &Path, named: Option<&str>, candidates: &[&str]) -> Option<PathBuf> {
    match named {
        Some(name) => {
            let path = dir.join(name);
            if path.is_file() {
                Some(path)
            } else {
                log::warn!("Referenced file {} does not exist", path.display());
                None
            }
        }
        None => candidates.iter().map(|f| dir.join(f)).find(|p| p.is_file()),
    }
}
