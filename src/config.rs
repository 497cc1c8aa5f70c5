use chartsmith::engine::{EngineDispatcher, EngineKind, ProcessEngine, WorkerPool};
use chartsmith::output::ResultNormalizer;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub catalog: CatalogConfig,
    pub engines: EnginesConfig,
    pub pool: PoolConfig,
    pub artifacts: ArtifactsConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub root: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("tools"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnginesConfig {
    pub script: EngineConfig,
    pub markup: EngineConfig,
    pub timeout_ms: u64,
    pub max_diagnostic_bytes: usize,
    pub max_output_bytes: usize,
}

impl Default for EnginesConfig {
    fn default() -> Self {
        Self {
            script: EngineConfig {
                interpreter: "python3".to_string(),
                entry: "render.py".to_string(),
                args: Vec::new(),
            },
            markup: EngineConfig {
                interpreter: "Rscript".to_string(),
                entry: "render.R".to_string(),
                args: Vec::new(),
            },
            timeout_ms: 60000,
            max_diagnostic_bytes: 2000,
            max_output_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub interpreter: String,
    pub entry: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_concurrent: usize,
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            queue_capacity: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    pub dir: PathBuf,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            dir: data_dir().join("artifacts"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub conversations_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            conversations_dir: data_dir().join("conversations"),
        }
    }
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(env!("CARGO_PKG_NAME"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            catalog: CatalogConfig::default(),
            engines: EnginesConfig::default(),
            pool: PoolConfig::default(),
            artifacts: ArtifactsConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Process backend for one engine kind
    pub fn engine(&self, kind: EngineKind) -> ProcessEngine {
        let engine = match kind {
            EngineKind::Script => &self.engines.script,
            EngineKind::Markup => &self.engines.markup,
        };
        ProcessEngine::new(kind, &engine.interpreter, &engine.entry)
            .with_args(engine.args.clone())
            .with_timeout(Duration::from_millis(self.engines.timeout_ms))
            .with_max_diagnostic(self.engines.max_diagnostic_bytes)
            .with_max_output(self.engines.max_output_bytes)
    }

    /// Dispatcher with every configured backend behind the shared worker pool
    pub fn dispatcher(&self) -> EngineDispatcher {
        let pool = WorkerPool::new(self.pool.max_concurrent, self.pool.queue_capacity);
        EngineKind::ALL.iter().fold(
            EngineDispatcher::new(pool, ResultNormalizer::new(&self.artifacts.dir)),
            |dispatcher, kind| dispatcher.with_engine(Arc::new(self.engine(*kind))),
        )
    }
}
