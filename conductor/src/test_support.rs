//! Test-only helpers: a temp workspace and an executor that plays agents.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tempfile::TempDir;

use crate::core::task::{IdentifiedPattern, LearningResult, PatternKind, Task};
use crate::core::types::{AgentId, TaskStatus, TokenUsage};
use crate::error::ConductorError;
use crate::io::config::ConductorConfig;
use crate::io::executor::{AgentExecutor, AgentRequest, AgentResponse};
use crate::io::knowledge::KnowledgeBase;
use crate::io::paths::WorkspacePaths;
use crate::io::task_store::{NewTask, load_task, new_task, write_task};

/// A project root in a temp dir with `.conductor/` scaffolded.
pub struct TestWorkspace {
    _dir: TempDir,
    paths: WorkspacePaths,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let paths = WorkspacePaths::new(dir.path());
        std::fs::create_dir_all(&paths.tasks_dir)?;
        std::fs::create_dir_all(&paths.logs_dir)?;
        KnowledgeBase::new(paths.knowledge_root.clone()).initialize()?;
        Ok(Self { _dir: dir, paths })
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    pub fn paths(&self) -> &WorkspacePaths {
        &self.paths
    }

    pub fn knowledge(&self) -> KnowledgeBase {
        KnowledgeBase::new(self.paths.knowledge_root.clone())
    }

    /// Defaults with no inter-phase delay.
    pub fn config(&self) -> ConductorConfig {
        ConductorConfig {
            phase_delay_ms: 0,
            ..ConductorConfig::default()
        }
    }

    pub fn task_path(&self, slug: &str) -> PathBuf {
        self.paths.task_path(slug)
    }

    /// Create and persist a fresh task named `name`.
    pub fn create_task(&self, name: &str) -> Result<Task> {
        let mut task = new_task(name, NewTask::default())?;
        write_task(&self.paths.task_path(&task.meta.slug), &mut task)?;
        Ok(task)
    }

    pub fn save(&self, task: &mut Task) -> Result<()> {
        write_task(&self.paths.task_path(&task.meta.slug), task)
    }

    pub fn load(&self, slug: &str) -> Result<Task> {
        load_task(&self.paths.task_path(slug))
    }
}

/// What one scripted agent invocation does to the task record.
#[derive(Debug, Clone, Default)]
pub struct ScriptedStep {
    pub set_status: Option<TaskStatus>,
    pub bump_qa: bool,
    pub write_learning: bool,
    pub success: bool,
    pub output: String,
    pub usage: Option<TokenUsage>,
    pub launch_failure: bool,
}

impl ScriptedStep {
    /// Write `status` and report success.
    pub fn advance(status: TaskStatus) -> Self {
        Self {
            set_status: Some(status),
            success: true,
            ..Self::default()
        }
    }

    /// Verifier passing: count the attempt and move on to learn.
    pub fn verify_pass() -> Self {
        Self {
            bump_qa: true,
            ..Self::advance(TaskStatus::Learn)
        }
    }

    /// Verifier failing: count the attempt and send the task back.
    pub fn verify_fail() -> Self {
        Self {
            bump_qa: true,
            ..Self::advance(TaskStatus::Implement)
        }
    }

    /// Learner writing its record without touching status.
    pub fn learn() -> Self {
        Self {
            write_learning: true,
            success: true,
            ..Self::default()
        }
    }

    /// Learner in the chain: record learnings and advance to document.
    pub fn learn_and_advance() -> Self {
        Self {
            write_learning: true,
            ..Self::advance(TaskStatus::Document)
        }
    }

    /// Ran, claimed success, changed nothing.
    pub fn stall() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// Ran and reported failure.
    pub fn fail() -> Self {
        Self {
            output: "agent gave up".to_string(),
            ..Self::default()
        }
    }

    pub fn launch_failure() -> Self {
        Self {
            launch_failure: true,
            ..Self::default()
        }
    }

    pub fn with_output(mut self, output: &str) -> Self {
        self.output = output.to_string();
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// A learning record with one success and one failure pattern.
    pub fn learning_record(learnings_path: &str) -> LearningResult {
        let pattern = |kind, name: &str| IdentifiedPattern {
            kind,
            name: name.to_string(),
            description: format!("{name} description"),
            files: Vec::new(),
            reusable: true,
            occurrences: None,
        };
        LearningResult {
            learnings_path: learnings_path.to_string(),
            patterns_identified: vec![
                pattern(PatternKind::Success, "Lazy images"),
                pattern(PatternKind::Failure, "Inline styles"),
            ],
            knowledge_base_updated: true,
            metrics_updated: false,
            skill_updates_proposed: Vec::new(),
            analyzed_at: "2026-10-16T00:00:00.000Z".to_string(),
        }
    }
}

/// Plays agents from a script, editing the task record as they would.
/// Once the script runs out every call behaves like [`ScriptedStep::stall`].
pub struct ScriptedExecutor {
    task_path: PathBuf,
    steps: RefCell<VecDeque<ScriptedStep>>,
    requests: RefCell<Vec<AgentRequest>>,
}

impl ScriptedExecutor {
    pub fn new(task_path: PathBuf, steps: Vec<ScriptedStep>) -> Self {
        Self {
            task_path,
            steps: RefCell::new(steps.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.borrow().clone()
    }

    pub fn agents(&self) -> Vec<AgentId> {
        self.requests.borrow().iter().map(|r| r.agent).collect()
    }

    pub fn remaining(&self) -> usize {
        self.steps.borrow().len()
    }

    fn apply(&self, step: &ScriptedStep) -> Result<()> {
        if step.set_status.is_none() && !step.bump_qa && !step.write_learning {
            return Ok(());
        }
        let mut task = load_task(&self.task_path)?;
        if let Some(status) = step.set_status {
            task.meta.status = status;
        }
        if step.bump_qa {
            task.meta.qa_attempts += 1;
        }
        if step.write_learning {
            let path = format!(".conductor/learnings/{}.md", task.meta.slug);
            task.learning = Some(ScriptedStep::learning_record(&path));
        }
        write_task(&self.task_path, &mut task)
    }
}

impl AgentExecutor for ScriptedExecutor {
    fn execute(&self, request: &AgentRequest) -> Result<AgentResponse> {
        self.requests.borrow_mut().push(request.clone());
        let step = self
            .steps
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(ScriptedStep::stall);
        if step.launch_failure {
            return Err(ConductorError::Execution {
                agent: request.agent,
                message: "scripted launch failure".to_string(),
            }
            .into());
        }
        self.apply(&step)?;
        Ok(AgentResponse {
            success: step.success,
            output: step.output,
            num_turns: Some(1),
            usage: step.usage,
        })
    }
}
