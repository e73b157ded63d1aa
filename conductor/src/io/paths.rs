//! Canonical locations under `.conductor/`.

use std::path::{Path, PathBuf};

/// All fixed paths within `.conductor/` for a project root.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub conductor_dir: PathBuf,
    pub tasks_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub config_path: PathBuf,
    /// Root handed to the knowledge base; holds `knowledge/` and `learnings/`.
    pub knowledge_root: PathBuf,
}

impl WorkspacePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let conductor_dir = root.join(".conductor");
        Self {
            root: root.clone(),
            tasks_dir: conductor_dir.join("tasks"),
            logs_dir: conductor_dir.join("logs"),
            config_path: conductor_dir.join("config.toml"),
            knowledge_root: conductor_dir.clone(),
            conductor_dir,
        }
    }

    /// Point the knowledge base somewhere else. Relative paths resolve
    /// against the project root.
    pub fn with_knowledge_root(mut self, knowledge_root: Option<&Path>) -> Self {
        if let Some(dir) = knowledge_root {
            self.knowledge_root = if dir.is_absolute() {
                dir.to_path_buf()
            } else {
                self.root.join(dir)
            };
        }
        self
    }

    pub fn task_path(&self, slug: &str) -> PathBuf {
        self.tasks_dir.join(format!("{slug}.json"))
    }
}
