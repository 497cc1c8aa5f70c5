//! Rendering backends as isolated, time-bounded child processes

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::conversation::ValidatedRequest;
use crate::error::ChartsmithError;

use super::kind::EngineKind;

/// Environment variable naming the per-invocation output directory
pub const OUTPUT_DIR_ENV: &str = "CHARTSMITH_OUTPUT_DIR";

const DEFAULT_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_MAX_DIAGNOSTIC_BYTES: usize = 2_000;
const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Backend failures, before they are mapped onto the caller-facing taxonomy
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error("exited with status {code:?}: {diagnostic}")]
    Failed { code: Option<i32>, diagnostic: String },

    #[error("failed to start {interpreter}: {reason}")]
    Spawn { interpreter: String, reason: String },

    #[error("entry script '{0}' not found")]
    MissingEntry(String),

    #[error("output exceeded {0} bytes")]
    OutputTooLarge(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<EngineError> for ChartsmithError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Timeout(ms) => ChartsmithError::ExecutionTimeout(ms),
            EngineError::Failed { code, diagnostic } => {
                let status = code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string());
                if diagnostic.is_empty() {
                    ChartsmithError::EngineExecution(format!("backend exited with {}", status))
                } else {
                    ChartsmithError::EngineExecution(format!("backend exited with {}: {}", status, diagnostic))
                }
            }
            EngineError::Spawn { interpreter, .. } => {
                ChartsmithError::EngineExecution(format!("backend '{}' is unavailable", interpreter))
            }
            other => ChartsmithError::EngineExecution(other.to_string()),
        }
    }
}

/// What a backend left behind after a successful run
///
/// Owns the output directory, which is removed when this is dropped.
#[derive(Debug)]
pub struct RawOutput {
    pub stdout: String,
    /// Scrubbed, truncated tail of stderr
    pub diagnostic: String,
    pub output_dir: TempDir,
    pub elapsed: Duration,
}

impl RawOutput {
    pub fn output_path(&self) -> &Path {
        self.output_dir.path()
    }
}

/// A rendering backend
#[async_trait]
pub trait Engine: Send + Sync {
    fn kind(&self) -> EngineKind;

    async fn render(&self, request: &ValidatedRequest) -> std::result::Result<RawOutput, EngineError>;
}

/// Runs `<interpreter> [args] <entry>` inside the tool directory
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    kind: EngineKind,
    interpreter: String,
    args: Vec<String>,
    entry: String,
    timeout: Duration,
    max_diagnostic_bytes: usize,
    max_output_bytes: usize,
}

impl ProcessEngine {
    pub fn new(kind: EngineKind, interpreter: impl Into<String>, entry: impl Into<String>) -> Self {
        Self {
            kind,
            interpreter: interpreter.into(),
            args: Vec::new(),
            entry: entry.into(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_diagnostic_bytes: DEFAULT_MAX_DIAGNOSTIC_BYTES,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_diagnostic(mut self, max_bytes: usize) -> Self {
        self.max_diagnostic_bytes = max_bytes;
        self
    }

    pub fn with_max_output(mut self, max_bytes: usize) -> Self {
        self.max_output_bytes = max_bytes;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// Entry script for a tool: its own override, else the engine default
    fn entry_for(&self, request: &ValidatedRequest) -> Result<PathBuf, EngineError> {
        let tool = request.tool();
        let entry = tool.entries.get(&self.kind).unwrap_or(&self.entry);
        let path = tool.dir.join(entry);
        if !path.is_file() {
            return Err(EngineError::MissingEntry(entry.clone()));
        }
        Ok(path)
    }
}

#[async_trait]
impl Engine for ProcessEngine {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    async fn render(&self, request: &ValidatedRequest) -> Result<RawOutput, EngineError> {
        let tool = request.tool();
        let entry = self.entry_for(request)?;
        let output_dir = tempfile::Builder::new().prefix("chartsmith-run-").tempdir()?;

        let payload = serde_json::to_vec(&json!({
            "chart_type": request.chart_type(),
            "params": request.params(),
            "data": request.request().data,
            "output_dir": output_dir.path(),
        }))
        .map_err(|e| EngineError::Io(e.into()))?;

        let started = Instant::now();
        let mut command = Command::new(&self.interpreter);
        command
            .args(&self.args)
            .arg(&entry)
            .current_dir(&tool.dir)
            .env(OUTPUT_DIR_ENV, output_dir.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout also reaches anything the backend forked
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| EngineError::Spawn {
            interpreter: self.interpreter.clone(),
            reason: e.to_string(),
        })?;
        let pid = child.id();

        // Scripts that never read stdin close the pipe early; that is not an error
        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                let _ = stdin.write_all(&payload).await;
            });
        }

        // Dropping the future on timeout drops the child, which kills it
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                log::warn!(
                    "{} engine timed out after {}ms rendering {}",
                    self.kind,
                    self.timeout_ms(),
                    request.chart_type()
                );
                kill_process_group(pid);
                return Err(EngineError::Timeout(self.timeout_ms()));
            }
        };
        let elapsed = started.elapsed();

        let scrub_dirs = [(tool.dir.as_path(), "<tool>"), (output_dir.path(), "<output>")];
        let stderr = scrub(&String::from_utf8_lossy(&output.stderr), &scrub_dirs);
        let diagnostic = tail(stderr.trim(), self.max_diagnostic_bytes);

        if !output.status.success() {
            log::debug!("{} engine failed for {}: {}", self.kind, request.chart_type(), stderr.trim());
            return Err(EngineError::Failed {
                code: output.status.code(),
                diagnostic,
            });
        }
        if output.stdout.len() > self.max_output_bytes {
            return Err(EngineError::OutputTooLarge(self.max_output_bytes));
        }

        Ok(RawOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            diagnostic,
            output_dir,
            elapsed,
        })
    }
}

/// Replace internal directory paths with stable placeholders
fn scrub(text: &str, dirs: &[(&Path, &str)]) -> String {
    let mut scrubbed = text.to_string();
    for (dir, placeholder) in dirs {
        let mut forms = vec![dir.to_path_buf()];
        if let Ok(canonical) = dir.canonicalize() {
            forms.push(canonical);
        }
        // Longest first so a canonical prefix never leaves a dangling suffix
        forms.sort_by_key(|p| std::cmp::Reverse(p.as_os_str().len()));
        for form in forms {
            let needle = form.to_string_lossy();
            if !needle.is_empty() {
                scrubbed = scrubbed.replace(needle.as_ref(), placeholder);
            }
        }
    }
    scrubbed
}

/// Last `max` bytes of `text` on a char boundary
fn tail(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pid) = pid else { return };
    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        log::debug!("Process group {} already gone: {}", pid, e);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}
