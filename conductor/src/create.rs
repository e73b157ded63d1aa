//! Workspace scaffolding and task creation.
//!
//! `init` is idempotent: directories and knowledge files are created when
//! missing and an existing config is never overwritten. `create` scaffolds
//! on demand and refuses to replace an existing task record.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info};

use crate::io::config::{ConductorConfig, load_config, write_config};
use crate::io::knowledge::KnowledgeBase;
use crate::io::paths::WorkspacePaths;
use crate::io::task_store::{NewTask, new_task, write_task};

/// Outcome of `conductor create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOutcome {
    pub slug: String,
    pub task_path: PathBuf,
}

/// Scaffold `.conductor/` and the knowledge store under `root`.
pub fn init_workspace(root: &Path) -> Result<WorkspacePaths> {
    let base = WorkspacePaths::new(root);
    for dir in [&base.conductor_dir, &base.tasks_dir, &base.logs_dir] {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }

    let cfg = if base.config_path.exists() {
        load_config(&base.config_path)?
    } else {
        let cfg = ConductorConfig::default();
        write_config(&base.config_path, &cfg)?;
        info!(path = %base.config_path.display(), "wrote default config");
        cfg
    };

    let paths = base.with_knowledge_root(cfg.knowledge_dir.as_deref());
    KnowledgeBase::new(paths.knowledge_root.clone())
        .initialize()
        .context("initialize knowledge base")?;
    debug!(root = %root.display(), "workspace ready");
    Ok(paths)
}

/// Write a fresh task record for `name` at status `plan`.
pub fn create_task(root: &Path, name: &str, extra: NewTask) -> Result<CreateOutcome> {
    let paths = init_workspace(root)?;
    let mut task = new_task(name, extra)?;
    let task_path = paths.task_path(&task.meta.slug);
    if task_path.exists() {
        return Err(anyhow!(
            "task {} already exists at {}",
            task.meta.slug,
            task_path.display()
        ));
    }
    write_task(&task_path, &mut task)?;
    info!(slug = %task.meta.slug, "task created");
    Ok(CreateOutcome {
        slug: task.meta.slug,
        task_path,
    })
}
