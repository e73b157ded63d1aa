//! Conductor configuration stored under `.conductor/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::metrics::{TaskTypeRule, default_task_type_rules};
use crate::core::types::{AgentId, Tool};

const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Conductor configuration (TOML).
///
/// Edited by humans; every field has a default so a partial file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConductorConfig {
    /// Phase executions allowed per run before the safety valve trips.
    pub max_iterations: u32,

    /// Cooldown between phase executions, in milliseconds.
    pub phase_delay_ms: u64,

    /// Knowledge store root. Relative paths resolve against the project root.
    pub knowledge_dir: Option<PathBuf>,

    pub executor: ExecutorConfig,

    pub agents: AgentsConfig,

    /// Ordered keyword → category table for metrics; first match wins.
    pub task_types: Vec<TaskTypeRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Agent CLI binary.
    pub command: String,

    /// Per-invocation wall-clock limit. Unset means wait indefinitely.
    pub timeout_secs: Option<u64>,

    /// Truncate captured agent stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

/// What one agent identity may do.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentProfile {
    pub tools: Vec<Tool>,
    pub model: String,
    pub max_turns: u32,
    /// Appended to the agent's system prompt.
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentsConfig {
    pub planner: AgentProfile,
    pub implementer: AgentProfile,
    pub verifier: AgentProfile,
    pub learner: AgentProfile,
    pub documenter: AgentProfile,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            phase_delay_ms: 1_000,
            knowledge_dir: None,
            executor: ExecutorConfig::default(),
            agents: AgentsConfig::default(),
            task_types: default_task_type_rules(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            timeout_secs: None,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for AgentsConfig {
    fn default() -> Self {
        use Tool::{Bash, Edit, Glob, Grep, Read, Write};

        Self {
            planner: AgentProfile::new(
                &[Read, Write, Bash, Grep, Glob],
                50,
                "You are the planner. Discover existing patterns, analyse the \
                 requirements and record a detailed plan in the task record.",
            ),
            implementer: AgentProfile::new(
                &[Read, Write, Edit, Bash, Grep, Glob],
                100,
                "You are the implementer. Follow the approved plan task by task, \
                 reference real project files for conventions and record progress \
                 in the task record.",
            ),
            verifier: AgentProfile::new(
                &[Read, Bash, Grep, Glob],
                30,
                "You are the verifier. You have read-only access. Document every \
                 issue in the task record; never fix code yourself.",
            ),
            learner: AgentProfile::new(
                &[Read, Write, Bash, Grep, Glob],
                30,
                "You are the learner. Extract what worked and what did not from \
                 this session so the next task is easier to build.",
            ),
            documenter: AgentProfile::new(
                &[Read, Write, Bash, Grep, Glob],
                50,
                "You are the documenter. Write client documentation, developer \
                 documentation when warranted, and record their paths.",
            ),
        }
    }
}

impl AgentProfile {
    fn new(tools: &[Tool], max_turns: u32, role: &str) -> Self {
        Self {
            tools: tools.to_vec(),
            model: DEFAULT_MODEL.to_string(),
            max_turns,
            role: role.to_string(),
        }
    }
}

impl AgentsConfig {
    pub fn profile(&self, agent: AgentId) -> &AgentProfile {
        match agent {
            AgentId::Planner => &self.planner,
            AgentId::Implementer => &self.implementer,
            AgentId::Verifier => &self.verifier,
            AgentId::Learner => &self.learner,
            AgentId::Documenter => &self.documenter,
        }
    }
}

impl ConductorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.executor.command.trim().is_empty() {
            return Err(anyhow!("executor.command must be non-empty"));
        }
        if self.executor.timeout_secs == Some(0) {
            return Err(anyhow!("executor.timeout_secs must be > 0 when set"));
        }
        if self.executor.output_limit_bytes == 0 {
            return Err(anyhow!("executor.output_limit_bytes must be > 0"));
        }
        for agent in [
            AgentId::Planner,
            AgentId::Implementer,
            AgentId::Verifier,
            AgentId::Learner,
            AgentId::Documenter,
        ] {
            let profile = self.agents.profile(agent);
            if profile.tools.is_empty() {
                return Err(anyhow!("agents.{agent}.tools must be non-empty"));
            }
            if profile.model.trim().is_empty() {
                return Err(anyhow!("agents.{agent}.model must be non-empty"));
            }
            if profile.max_turns == 0 {
                return Err(anyhow!("agents.{agent}.max_turns must be > 0"));
            }
        }
        if let Some(tool) = self.agents.verifier.tools.iter().find(|t| t.mutates_files()) {
            return Err(anyhow!("agents.verifier.tools must not include {tool}"));
        }
        if let Some(rule) = self
            .task_types
            .iter()
            .find(|rule| rule.keyword.trim().is_empty() || rule.category.trim().is_empty())
        {
            return Err(anyhow!(
                "task_types entries need a keyword and a category (got {:?} → {:?})",
                rule.keyword,
                rule.category
            ));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ConductorConfig::default()`.
pub fn load_config(path: &Path) -> Result<ConductorConfig> {
    if !path.exists() {
        let cfg = ConductorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ConductorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ConductorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
