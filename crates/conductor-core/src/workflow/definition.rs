//! Workflow definition files: YAML/JSON parsing, serialization, and
//! filesystem discovery.
//!
//! Parsing only checks shape. Structural rules (unique ids, dependencies,
//! cycles, config keys) belong to `validator::validate`, which reports every
//! problem at once instead of stopping at the first.

use std::path::{Path, PathBuf};

use conductor_types::action::DEFAULT_ACTION_TIMEOUT_SECS;
use conductor_types::workflow::Workflow;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("unsupported workflow file extension: {0}")]
    UnsupportedFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// On-disk encodings of a workflow definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    Yaml,
    Json,
}

impl DefinitionFormat {
    /// Pick the format from a file extension (`.yaml`, `.yml`, `.json`).
    pub fn from_path(path: &Path) -> Result<Self, DefinitionError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Ok(Self::Yaml),
            Some("json") => Ok(Self::Json),
            other => Err(DefinitionError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Defaults applied to fields a definition file leaves out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    pub default_timeout_seconds: u64,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            default_timeout_seconds: DEFAULT_ACTION_TIMEOUT_SECS,
        }
    }
}

pub fn parse_workflow_yaml(yaml: &str) -> Result<Workflow, DefinitionError> {
    parse_workflow_with(yaml, DefinitionFormat::Yaml, &LoadOptions::default())
}

pub fn parse_workflow_json(json: &str) -> Result<Workflow, DefinitionError> {
    parse_workflow_with(json, DefinitionFormat::Json, &LoadOptions::default())
}

pub fn parse_workflow(content: &str, format: DefinitionFormat) -> Result<Workflow, DefinitionError> {
    parse_workflow_with(content, format, &LoadOptions::default())
}

/// Parse through a generic JSON tree so configured defaults can fill in
/// fields the file omits before the typed decode.
pub fn parse_workflow_with(
    content: &str,
    format: DefinitionFormat,
    options: &LoadOptions,
) -> Result<Workflow, DefinitionError> {
    let mut raw: Value = match format {
        DefinitionFormat::Yaml => {
            serde_yaml_ng::from_str(content).map_err(|e| DefinitionError::Parse(e.to_string()))?
        }
        DefinitionFormat::Json => {
            serde_json::from_str(content).map_err(|e| DefinitionError::Parse(e.to_string()))?
        }
    };
    apply_defaults(&mut raw, options);
    serde_json::from_value(raw).map_err(|e| DefinitionError::Parse(e.to_string()))
}

fn apply_defaults(raw: &mut Value, options: &LoadOptions) {
    let Some(actions) = raw.get_mut("actions").and_then(Value::as_array_mut) else {
        return;
    };
    for action in actions.iter_mut().filter_map(Value::as_object_mut) {
        action
            .entry("timeout_seconds")
            .or_insert_with(|| Value::from(options.default_timeout_seconds));
    }
}

pub fn serialize_workflow(
    workflow: &Workflow,
    format: DefinitionFormat,
) -> Result<String, DefinitionError> {
    match format {
        DefinitionFormat::Yaml => {
            serde_yaml_ng::to_string(workflow).map_err(|e| DefinitionError::Parse(e.to_string()))
        }
        DefinitionFormat::Json => serde_json::to_string_pretty(workflow)
            .map_err(|e| DefinitionError::Parse(e.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a workflow from a `.yaml`/`.yml`/`.json` file.
pub fn load_workflow_file(path: &Path) -> Result<Workflow, DefinitionError> {
    load_workflow_file_with(path, &LoadOptions::default())
}

pub fn load_workflow_file_with(
    path: &Path,
    options: &LoadOptions,
) -> Result<Workflow, DefinitionError> {
    let format = DefinitionFormat::from_path(path)?;
    let content = std::fs::read_to_string(path)?;
    parse_workflow_with(&content, format, options)
}

/// Save a workflow, creating parent directories as needed. The format
/// follows the file extension.
pub fn save_workflow_file(path: &Path, workflow: &Workflow) -> Result<(), DefinitionError> {
    let format = DefinitionFormat::from_path(path)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serialize_workflow(workflow, format)?)?;
    Ok(())
}

/// Recursively find workflow files under `base_dir`. Files that do not parse
/// are skipped with a warning. A missing directory yields an empty list.
pub fn discover_workflows(base_dir: &Path) -> Result<Vec<(PathBuf, Workflow)>, DefinitionError> {
    let mut found = Vec::new();
    if base_dir.exists() {
        discover_recursive(base_dir, &mut found)?;
    }
    found.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(found)
}

fn discover_recursive(
    dir: &Path,
    found: &mut Vec<(PathBuf, Workflow)>,
) -> Result<(), DefinitionError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, found)?;
            continue;
        }
        if DefinitionFormat::from_path(&path).is_err() {
            continue;
        }
        match load_workflow_file(&path) {
            Ok(workflow) => found.push((path, workflow)),
            Err(e) => tracing::warn!(?path, error = %e, "skipping unparseable workflow file"),
        }
    }
    Ok(())
}
