//! Task record load/save with schema validation.
//!
//! Every read is checked against the embedded task schema. The three
//! structural failures (missing, not JSON, schema violation) surface as
//! distinct [`ConductorError`] variants so callers can tell them apart.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::debug;

use crate::core::task::{Sources, Task, slugify};
use crate::error::ConductorError;

const TASK_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/task.schema.json"
));

/// Load and validate a task record.
pub fn load_task(path: &Path) -> Result<Task> {
    debug!(path = %path.display(), "loading task");
    if !path.exists() {
        return Err(ConductorError::NotFound {
            path: path.to_path_buf(),
        }
        .into());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read task {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents).map_err(|err| ConductorError::Malformed {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    validate_task_value(path, &value)?;
    let task: Task = serde_json::from_value(value).map_err(|err| ConductorError::SchemaInvalid {
        path: path.to_path_buf(),
        violations: vec![err.to_string()],
    })?;
    debug!(slug = %task.meta.slug, status = %task.meta.status, qa_attempts = task.meta.qa_attempts, "task loaded");
    Ok(task)
}

/// Check a parsed document against the task schema, listing every violation.
pub fn validate_task_value(path: &Path, value: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(TASK_SCHEMA).context("parse embedded task schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid task schema: {err}"))?;
    let violations: Vec<String> = compiled.iter_errors(value).map(|err| err.to_string()).collect();
    if violations.is_empty() {
        return Ok(());
    }
    Err(ConductorError::SchemaInvalid {
        path: path.to_path_buf(),
        violations,
    }
    .into())
}

/// Stamp `meta.updated_at` and atomically write the record (temp file + rename).
pub fn write_task(path: &Path, task: &mut Task) -> Result<()> {
    task.meta.updated_at = now_iso();
    debug!(path = %path.display(), status = %task.meta.status, "writing task");
    let mut buf = serde_json::to_string_pretty(task).context("serialize task")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Optional metadata captured when a task is created.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub requirements: Option<String>,
    pub design_url: Option<String>,
    pub ticket_id: Option<String>,
}

/// A fresh record at `plan` with zero verification attempts.
pub fn new_task(name: &str, extra: NewTask) -> Result<Task> {
    if slugify(name).is_empty() {
        return Err(anyhow!("task name {name:?} has no alphanumeric characters"));
    }
    let mut task = Task::new(name, &now_iso());
    task.meta.requirements = extra.requirements;
    if extra.design_url.is_some() {
        task.sources = Some(Sources {
            design_url: extra.design_url.clone(),
            ..Sources::default()
        });
    }
    task.meta.design_url = extra.design_url;
    task.meta.ticket_id = extra.ticket_id;
    Ok(task)
}

pub(crate) fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("task path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp task {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace task {}", path.display()))?;
    Ok(())
}
