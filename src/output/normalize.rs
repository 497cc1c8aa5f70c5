//! Map raw backend output onto data, image, and chart-spec payloads

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::engine::RawOutput;
use crate::error::{ChartsmithError, Result};
use crate::tools::ToolDefinition;

use super::outcome::{ImageRef, Payload};

const DATA_KEYS: [&str; 3] = ["data", "table", "rows"];
const IMAGE_KEYS: [&str; 3] = ["image", "image_path", "png"];
const CHART_KEYS: [&str; 4] = ["chart", "option", "spec", "vega"];

/// Converts raw output into a [`Payload`], copying images into the artifact directory
#[derive(Debug, Clone)]
pub struct ResultNormalizer {
    artifacts_dir: PathBuf,
}

impl ResultNormalizer {
    pub fn new(artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifacts_dir: artifacts_dir.into(),
        }
    }

    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    /// Normalize one execution's output
    ///
    /// Stdout is read first; output-directory files only fill kinds stdout left empty.
    pub fn normalize(&self, raw: &RawOutput, tool: &ToolDefinition) -> Result<Payload> {
        let mut payload = Payload::default();
        let output_dir = raw.output_path();

        if let Some(reference) = read_stdout(raw.stdout.trim(), &mut payload) {
            payload.image = Some(self.resolve_image(&reference, output_dir)?);
        }
        self.read_output_dir(output_dir, &mut payload)?;

        if payload.is_empty() {
            log::debug!("{} produced no recognizable output", tool.key());
            return Err(ChartsmithError::EngineExecution("engine produced no output".to_string()));
        }
        log::debug!("{} produced {}", tool.key(), payload.kinds().join("+"));
        Ok(payload)
    }

    fn resolve_image(&self, reference: &str, output_dir: &Path) -> Result<ImageRef> {
        if reference.starts_with("data:") || reference.starts_with("http://") || reference.starts_with("https://") {
            return Ok(ImageRef::Uri {
                uri: reference.to_string(),
            });
        }
        let relative = Path::new(reference);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(ChartsmithError::EngineExecution(format!(
                "image path '{}' is outside the output directory",
                reference
            )));
        }
        let source = output_dir.join(relative);
        if !source.is_file() {
            return Err(ChartsmithError::EngineExecution(format!("image '{}' was not written", reference)));
        }
        self.store_image(&source)
    }

    fn read_output_dir(&self, output_dir: &Path, payload: &mut Payload) -> Result<()> {
        let mut files: Vec<PathBuf> = fs::read_dir(output_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        files.sort();

        for path in files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            let ext = extension(&path);

            if media_type(&ext).is_some() {
                if payload.image.is_none() {
                    payload.image = Some(self.store_image(&path)?);
                }
            } else if name == "chart.json" || name.ends_with(".vl.json") {
                if payload.chart.is_none() {
                    payload.chart = Some(read_json(&path, &name)?);
                }
            } else if name == "data.json" {
                if payload.data.is_none() {
                    payload.data = Some(read_json(&path, &name)?);
                }
            } else if ext == "csv" {
                if payload.data.is_none() {
                    let text = fs::read_to_string(&path)?;
                    payload.data = parse_csv(&text, 1);
                }
            } else {
                log::debug!("Ignoring output file {}", name);
            }
        }
        Ok(())
    }

    /// Copy an image to `{artifacts_dir}/{sha256}.{ext}`
    fn store_image(&self, source: &Path) -> Result<ImageRef> {
        let ext = extension(source);
        let media_type = media_type(&ext).ok_or_else(|| {
            ChartsmithError::EngineExecution(format!("unsupported image type '{}'", ext))
        })?;
        let bytes = fs::read(source)?;
        let digest = hex::encode(Sha256::digest(&bytes));

        fs::create_dir_all(&self.artifacts_dir)?;
        let target = self.artifacts_dir.join(format!("{}.{}", digest, ext));
        if !target.exists() {
            fs::write(&target, &bytes)?;
        }
        Ok(ImageRef::File {
            path: target,
            media_type: media_type.to_string(),
            sha256: digest,
        })
    }
}

/// Fill the payload from stdout; returns an image reference still to be resolved
fn read_stdout(stdout: &str, payload: &mut Payload) -> Option<String> {
    if stdout.is_empty() {
        return None;
    }
    let value = match serde_json::from_str::<Value>(stdout) {
        Ok(value) => value,
        Err(_) => {
            payload.data = parse_csv(stdout, 2);
            if payload.data.is_none() {
                log::debug!("Stdout is neither JSON nor CSV, ignoring");
            }
            return None;
        }
    };

    let Value::Object(mut object) = value else {
        payload.data = Some(value);
        return None;
    };

    payload.data = take_first(&mut object, &DATA_KEYS);
    payload.chart = take_first(&mut object, &CHART_KEYS);
    let image = take_first(&mut object, &IMAGE_KEYS).and_then(|v| match v {
        Value::String(s) => Some(s),
        other => {
            log::debug!("Ignoring non-string image reference {}", other);
            None
        }
    });

    if payload.data.is_none() && payload.chart.is_none() && image.is_none() && !object.is_empty() {
        payload.data = Some(Value::Object(object));
    }
    image
}

fn take_first(object: &mut Map<String, Value>, keys: &[&str]) -> Option<Value> {
    keys.iter()
        .find_map(|key| object.remove(*key))
        .filter(|value| !value.is_null())
}

fn read_json(path: &Path, name: &str) -> Result<Value> {
    let text = fs::read_to_string(path)?;
    serde_json::from_str(&text)
        .map_err(|e| ChartsmithError::EngineExecution(format!("{} is not valid JSON: {}", name, e)))
}

fn extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn media_type(ext: &str) -> Option<&'static str> {
    match ext {
        "png" => Some("image/png"),
        "svg" => Some("image/svg+xml"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        _ => None,
    }
}

/// Parse a header-plus-rows CSV into row objects
///
/// Returns None unless every row has the header's width and there is at least one row.
fn parse_csv(text: &str, min_columns: usize) -> Option<Value> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header = split_csv_line(lines.next()?)?;
    if header.len() < min_columns {
        return None;
    }

    let mut rows = Vec::new();
    for line in lines {
        let cells = split_csv_line(line)?;
        if cells.len() != header.len() {
            return None;
        }
        let row: Map<String, Value> = header
            .iter()
            .cloned()
            .zip(cells.iter().map(|c| csv_value(c)))
            .collect();
        rows.push(Value::Object(row));
    }
    if rows.is_empty() {
        return None;
    }
    Some(Value::Array(rows))
}

fn split_csv_line(line: &str) -> Option<Vec<String>> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.trim_end_matches('\r').chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted => {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    quoted = false;
                }
            }
            '"' if current.trim().is_empty() => {
                current.clear();
                quoted = true;
            }
            ',' if !quoted => cells.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if quoted {
        return None;
    }
    cells.push(current);
    Some(cells.into_iter().map(|c| c.trim().to_string()).collect())
}

fn csv_value(cell: &str) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = cell.parse::<i64>() {
        return Value::from(i);
    }
    match cell.parse::<f64>() {
        Ok(f) if f.is_finite() => Value::from(f),
        _ => Value::String(cell.to_string()),
    }
}
