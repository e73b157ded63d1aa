//! Orchestration loop for `conductor run`.
//!
//! Each pass reloads the task record and decides, in order: finish (terminal
//! status), escalate (verification budget spent), stop (iteration cap), or
//! run the phase the persisted status names. The loop only advances a task
//! itself when forcing escalation or when a rework cycle brings it back to
//! `learn` after learning was already recorded; otherwise it observes what
//! agents wrote.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::core::event::{ORCHESTRATOR_AGENT, preview};
use crate::core::metrics::{Observation, infer_task_type};
use crate::core::phase::PhaseMachine;
use crate::core::task::{PatternKind, Task};
use crate::core::transcript::extract_tool_calls;
use crate::core::types::{Phase, TaskStatus};
use crate::exit_codes;
use crate::io::config::ConductorConfig;
use crate::io::executor::{AgentExecutor, AgentRequest};
use crate::io::knowledge::KnowledgeBase;
use crate::io::paths::WorkspacePaths;
use crate::io::prompt::{PromptBuilder, PromptInputs};
use crate::io::session_log::{RESPONSE_PREVIEW_CHARS, SessionLogger};
use crate::io::task_store::{load_task, write_task};

/// Transition reason logged when a repeat visit to `learn` is skipped.
pub const LEARNING_RECORDED: &str = "learning already recorded";

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStop {
    /// The task reached `completed`.
    Completed,
    /// The task reached `escalated` and needs a human.
    Escalated { reason: String },
    /// The iteration cap was hit with the task still open.
    SafetyValve { iterations: u32, max_iterations: u32 },
}

/// Summary of one `conductor run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub session_id: String,
    /// Phase executions performed by this run, guarded learn included.
    pub iterations: u32,
    pub stop: RunStop,
    /// Status read back after the run; `None` when the record was unreadable.
    pub final_status: Option<TaskStatus>,
    pub log_path: PathBuf,
    pub summary_path: PathBuf,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self.stop {
            RunStop::Completed => exit_codes::OK,
            RunStop::Escalated { .. } => exit_codes::ESCALATED,
            RunStop::SafetyValve { .. } => exit_codes::SAFETY_VALVE,
        }
    }
}

/// Per-run state. Dropped when the run ends.
struct Run {
    task_path: PathBuf,
    logger: SessionLogger,
    learnings_path: PathBuf,
    iterations: u32,
    /// The learn phase executed during this run, via the chain or the guard.
    learn_ran: bool,
}

pub struct Orchestrator<'a, E: AgentExecutor> {
    paths: WorkspacePaths,
    cfg: ConductorConfig,
    executor: &'a E,
    machine: PhaseMachine,
    prompts: PromptBuilder,
    knowledge: KnowledgeBase,
}

impl<'a, E: AgentExecutor> Orchestrator<'a, E> {
    pub fn new(root: &Path, cfg: ConductorConfig, executor: &'a E) -> Result<Self> {
        cfg.validate()?;
        let paths = WorkspacePaths::new(root).with_knowledge_root(cfg.knowledge_dir.as_deref());
        let machine = PhaseMachine::standard().context("build phase machine")?;
        let prompts = PromptBuilder::new(machine.clone())?;
        let knowledge = KnowledgeBase::new(paths.knowledge_root.clone());
        Ok(Self {
            paths,
            cfg,
            executor,
            machine,
            prompts,
            knowledge,
        })
    }

    pub fn paths(&self) -> &WorkspacePaths {
        &self.paths
    }

    /// Drive the task `slug` until it finishes or the iteration cap is hit.
    ///
    /// The summary is always written. Errors that abort the loop (unreadable
    /// or invalid task record, broken templates) are logged to the session and
    /// returned after the summary exists.
    #[instrument(skip_all, fields(slug = %slug))]
    pub fn run(&self, slug: &str) -> Result<RunOutcome> {
        self.knowledge
            .initialize()
            .context("initialize knowledge base")?;
        let logger = SessionLogger::new(&self.paths.logs_dir, slug)?;
        info!(session_id = %logger.session_id(), "run started");
        let mut run = Run {
            task_path: self.paths.task_path(slug),
            learnings_path: self.knowledge.learnings_path(slug, Utc::now()),
            logger,
            iterations: 0,
            learn_ran: false,
        };

        let result = self.drive(&mut run);
        if let Err(err) = &result {
            run.logger.log_error(
                &format!("{err:#}"),
                Some(&format!("{err:?}")),
                json!({ "code": "run_aborted" }),
            );
        }

        let final_status = load_task(&run.task_path).ok().map(|task| task.status());
        let label = final_status.map_or("unknown", TaskStatus::as_str);
        run.logger.generate_summary(label);
        info!(
            final_status = label,
            iterations = run.iterations,
            summary = %run.logger.summary_path().display(),
            "run finished"
        );

        let stop = result?;
        Ok(RunOutcome {
            session_id: run.logger.session_id().to_string(),
            iterations: run.iterations,
            stop,
            final_status,
            log_path: run.logger.log_path().to_path_buf(),
            summary_path: run.logger.summary_path().to_path_buf(),
        })
    }

    fn drive(&self, run: &mut Run) -> Result<RunStop> {
        let started_terminal = self.machine.is_terminal(&load_task(&run.task_path)?);
        let delay = Duration::from_millis(self.cfg.phase_delay_ms);

        loop {
            let task = load_task(&run.task_path)?;

            if self.machine.is_terminal(&task) {
                self.ensure_learned(run, &task, task.status())?;
                let task = load_task(&run.task_path)?;
                if !started_terminal {
                    self.record_metrics(run, &task);
                }
                return Ok(match task.status() {
                    TaskStatus::Escalated => RunStop::Escalated {
                        reason: task.meta.escalation_reason.unwrap_or_default(),
                    },
                    _ => RunStop::Completed,
                });
            }

            if self.machine.should_escalate(&task) {
                return self.escalate(run, &task);
            }

            if run.iterations >= self.cfg.max_iterations {
                return Ok(self.trip_safety_valve(run, &task));
            }

            let phase = self.machine.phase_of(&task)?;
            if phase == Phase::Learn && (run.learn_ran || task.learning.is_some()) {
                self.skip_learn(run, task)?;
                continue;
            }
            self.execute_phase(run, &task, phase, None)?;

            if !delay.is_zero() {
                thread::sleep(delay);
            }
        }
    }

    /// Run the learn phase before a terminal exit unless it already ran,
    /// in this run or in an earlier one that left a learning record.
    fn ensure_learned(&self, run: &mut Run, task: &Task, outcome: TaskStatus) -> Result<()> {
        if run.learn_ran || task.learning.is_some() {
            return Ok(());
        }
        info!(outcome = %outcome, "running learn phase before terminal exit");
        self.execute_phase(run, task, Phase::Learn, Some(outcome))
    }

    /// Learning is recorded once per task. A rework cycle that lands on
    /// `learn` again moves straight on to the phase after it.
    fn skip_learn(&self, run: &mut Run, mut task: Task) -> Result<()> {
        let from = task.status();
        let to = self.machine.next_status(Phase::Learn);
        task.meta.status = to;
        write_task(&run.task_path, &mut task)?;

        run.logger.set_context(from.as_str(), ORCHESTRATOR_AGENT);
        run.logger
            .log_phase_transition(from.as_str(), to.as_str(), LEARNING_RECORDED);
        info!(to = %to, "learning already recorded, skipping learn phase");
        Ok(())
    }

    fn escalate(&self, run: &mut Run, task: &Task) -> Result<RunStop> {
        self.ensure_learned(run, task, TaskStatus::Escalated)?;

        // Reload so the learner's writes survive the status change.
        let mut task = load_task(&run.task_path)?;
        let attempts = task.meta.qa_attempts;
        let reason = format!("verification failed {attempts} times");
        let from = task.status();
        task.meta.status = TaskStatus::Escalated;
        task.meta.escalation_reason = Some(reason.clone());
        write_task(&run.task_path, &mut task)?;

        run.logger.set_context(from.as_str(), ORCHESTRATOR_AGENT);
        run.logger
            .log_phase_transition(from.as_str(), TaskStatus::Escalated.as_str(), &reason);
        run.logger.log_escalation(&reason, attempts);
        warn!(attempts, "task escalated");

        self.record_metrics(run, &task);
        Ok(RunStop::Escalated { reason })
    }

    fn trip_safety_valve(&self, run: &mut Run, task: &Task) -> RunStop {
        let max_iterations = self.cfg.max_iterations;
        run.logger
            .set_context(task.status().as_str(), ORCHESTRATOR_AGENT);
        run.logger.log_error(
            &format!("iteration cap of {max_iterations} reached with task still at '{}'", task.status()),
            None,
            json!({
                "code": "safety_valve_exceeded",
                "iterations": run.iterations,
                "max_iterations": max_iterations,
            }),
        );
        warn!(iterations = run.iterations, max_iterations, "safety valve tripped");
        RunStop::SafetyValve {
            iterations: run.iterations,
            max_iterations,
        }
    }

    /// One agent invocation. Launch failures and unsuccessful executions are
    /// recorded and absorbed; only task record and template errors propagate.
    fn execute_phase(
        &self,
        run: &mut Run,
        task: &Task,
        phase: Phase,
        pending_outcome: Option<TaskStatus>,
    ) -> Result<()> {
        let agent = self.machine.agent_of(phase);
        let profile = self.cfg.agents.profile(agent);
        run.iterations += 1;
        if phase == Phase::Learn {
            run.learn_ran = true;
        }
        debug!(phase = %phase, agent = %agent, iteration = run.iterations, "executing phase");
        run.logger.log_phase_start(phase, agent);

        let prompt = self.prompts.build(&PromptInputs {
            phase,
            task,
            task_path: run.task_path.display().to_string(),
            knowledge_context: self.knowledge.knowledge_context(&task.meta.name),
            session_id: run.logger.session_id().to_string(),
            log_path: run.logger.log_path().display().to_string(),
            learnings_path: run.learnings_path.display().to_string(),
            knowledge_dir: self.paths.knowledge_root.display().to_string(),
            pending_outcome,
        })?;
        run.logger.log_prompt(&prompt);

        let request = AgentRequest {
            agent,
            tools: profile.tools.clone(),
            model: profile.model.clone(),
            max_turns: profile.max_turns,
            role: profile.role.clone(),
            prompt,
            workdir: self.paths.root.clone(),
        };

        let mut failure: Option<&str> = None;
        match self.executor.execute(&request) {
            Ok(response) => {
                for tool in extract_tool_calls(&response.output) {
                    run.logger
                        .log_tool_call(&tool, json!({ "source": "transcript" }));
                }
                run.logger
                    .log_response(&response.output, response.num_turns, response.usage);
                if !response.success {
                    warn!(phase = %phase, "agent reported failure");
                    run.logger.log_error(
                        &format!("{agent} reported failure during {phase}"),
                        None,
                        json!({
                            "code": "phase_failed",
                            "output_preview": preview(&response.output, RESPONSE_PREVIEW_CHARS),
                        }),
                    );
                    failure = Some("agent reported failure");
                }
            }
            Err(err) => {
                warn!(phase = %phase, err = %err, "agent failed to launch");
                run.logger.log_error(
                    &format!("{err:#}"),
                    Some(&format!("{err:?}")),
                    json!({ "code": "execution_failed" }),
                );
                failure = Some("agent failed to launch");
            }
        }

        let after = load_task(&run.task_path)?;
        let (from, to) = (task.status(), after.status());
        if from != to {
            let kind = self.machine.classify(phase, to);
            run.logger
                .log_phase_transition(from.as_str(), to.as_str(), kind.as_str());
            info!(from = %from, to = %to, kind = kind.as_str(), "status changed");
        } else if pending_outcome.is_none() {
            run.logger.log_error(
                &format!("no forward progress: status still '{from}' after {phase}"),
                None,
                json!({ "code": "no_progress" }),
            );
            failure = failure.or(Some("no forward progress"));
        }

        run.logger
            .log_phase_end(phase, failure.is_none(), failure);
        Ok(())
    }

    /// Fold the finished task into the metrics record. A failed write is
    /// logged and does not change the run's outcome.
    fn record_metrics(&self, run: &mut Run, task: &Task) {
        let task_type = infer_task_type(&task.meta.name, &self.cfg.task_types);
        let mut observation = Observation::new(task_type, task.meta.qa_attempts);
        if let Some(learning) = &task.learning {
            observation.patterns_found = learning.count(PatternKind::Success);
            observation.anti_patterns_found = learning.count(PatternKind::Failure);
        }
        match self.knowledge.update_metrics(&observation, Utc::now()) {
            Ok(metrics) => debug!(total_sessions = metrics.total_sessions, "metrics recorded"),
            Err(err) => {
                warn!(err = %err, "metrics update failed");
                run.logger.log_error(
                    &format!("metrics update failed: {err:#}"),
                    None,
                    json!({ "code": "metrics_update_failed" }),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::EventKind;
    use crate::core::types::AgentId;
    use crate::test_support::{ScriptedExecutor, ScriptedStep, TestWorkspace};

    fn log_entries(outcome: &RunOutcome) -> Vec<serde_json::Value> {
        std::fs::read_to_string(&outcome.log_path)
            .expect("read log")
            .lines()
            .map(|line| serde_json::from_str(line).expect("entry"))
            .collect()
    }

    #[test]
    fn task_already_learned_and_completed_finishes_without_executing() {
        let ws = TestWorkspace::new().expect("workspace");
        let mut task = ws.create_task("Hero Banner").expect("task");
        task.meta.status = TaskStatus::Completed;
        task.learning = Some(ScriptedStep::learning_record("x.md"));
        ws.save(&mut task).expect("save");

        let exec = ScriptedExecutor::new(ws.task_path("hero-banner"), Vec::new());
        let orch = Orchestrator::new(ws.root(), ws.config(), &exec).expect("orchestrator");
        let outcome = orch.run("hero-banner").expect("run");

        assert_eq!(outcome.stop, RunStop::Completed);
        assert_eq!(outcome.iterations, 0);
        assert!(exec.agents().is_empty());
        assert!(outcome.summary_path.exists());
        let sessions = orch.knowledge.metrics().map(|m| m.total_sessions);
        assert_eq!(sessions, Some(0), "metrics untouched for a pre-finished task");
    }

    #[test]
    fn completed_task_without_learning_gets_guarded_learn() {
        let ws = TestWorkspace::new().expect("workspace");
        let mut task = ws.create_task("Hero Banner").expect("task");
        task.meta.status = TaskStatus::Completed;
        ws.save(&mut task).expect("save");

        let exec = ScriptedExecutor::new(ws.task_path("hero-banner"), vec![ScriptedStep::learn()]);
        let orch = Orchestrator::new(ws.root(), ws.config(), &exec).expect("orchestrator");
        let outcome = orch.run("hero-banner").expect("run");

        assert_eq!(outcome.stop, RunStop::Completed);
        assert_eq!(exec.agents(), vec![AgentId::Learner]);
        let entries = log_entries(&outcome);
        assert!(
            !entries.iter().any(|e| e["data"]["code"] == "no_progress"),
            "guarded learn is not expected to move status"
        );
    }

    #[test]
    fn launch_failure_is_logged_and_retried() {
        let ws = TestWorkspace::new().expect("workspace");
        ws.create_task("Hero Banner").expect("task");
        let exec = ScriptedExecutor::new(
            ws.task_path("hero-banner"),
            vec![
                ScriptedStep::launch_failure(),
                ScriptedStep::advance(TaskStatus::Completed),
                ScriptedStep::learn(),
            ],
        );
        let orch = Orchestrator::new(ws.root(), ws.config(), &exec).expect("orchestrator");
        let outcome = orch.run("hero-banner").expect("run");

        assert_eq!(outcome.stop, RunStop::Completed);
        assert_eq!(
            exec.agents(),
            vec![AgentId::Planner, AgentId::Planner, AgentId::Learner]
        );
        let entries = log_entries(&outcome);
        assert!(entries.iter().any(|e| e["data"]["code"] == "execution_failed"));
        let first_end = entries
            .iter()
            .find(|e| e["event_type"] == EventKind::PhaseEnd.as_str())
            .expect("phase end");
        assert_eq!(first_end["data"]["success"], false);
    }

    #[test]
    fn stalled_phase_logs_no_forward_progress() {
        let ws = TestWorkspace::new().expect("workspace");
        ws.create_task("Hero Banner").expect("task");
        let exec = ScriptedExecutor::new(ws.task_path("hero-banner"), vec![ScriptedStep::stall()]);
        let cfg = ConductorConfig {
            max_iterations: 1,
            ..ws.config()
        };
        let orch = Orchestrator::new(ws.root(), cfg, &exec).expect("orchestrator");
        let outcome = orch.run("hero-banner").expect("run");

        assert_eq!(
            outcome.stop,
            RunStop::SafetyValve {
                iterations: 1,
                max_iterations: 1
            }
        );
        assert_eq!(outcome.exit_code(), exit_codes::SAFETY_VALVE);
        assert_eq!(outcome.final_status, Some(TaskStatus::Plan));
        let entries = log_entries(&outcome);
        assert!(entries.iter().any(|e| e["data"]["code"] == "no_progress"));
        assert!(entries.iter().any(|e| e["data"]["code"] == "safety_valve_exceeded"));
    }

    #[test]
    fn missing_task_is_fatal_but_still_summarized() {
        let ws = TestWorkspace::new().expect("workspace");
        let exec = ScriptedExecutor::new(ws.task_path("ghost"), Vec::new());
        let orch = Orchestrator::new(ws.root(), ws.config(), &exec).expect("orchestrator");
        let err = orch.run("ghost").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<crate::error::ConductorError>(),
            Some(crate::error::ConductorError::NotFound { .. })
        ));

        let summaries: Vec<_> = std::fs::read_dir(&orch.paths().logs_dir)
            .expect("logs dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with("-summary.md"))
            .collect();
        assert_eq!(summaries.len(), 1);
        let text = std::fs::read_to_string(summaries[0].path()).expect("summary");
        assert!(text.contains("| **Final Status** | unknown |"));
        assert!(text.contains("task record not found"));
    }

    #[test]
    fn run_scaffolds_knowledge_store_in_hand_made_workspace() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = WorkspacePaths::new(temp.path());
        let mut task = crate::io::task_store::new_task(
            "Hero Banner",
            crate::io::task_store::NewTask::default(),
        )
        .expect("task");
        write_task(&paths.task_path("hero-banner"), &mut task).expect("write");
        assert!(!paths.knowledge_root.join("knowledge").exists());

        let exec = ScriptedExecutor::new(paths.task_path("hero-banner"), Vec::new());
        let cfg = ConductorConfig {
            max_iterations: 1,
            phase_delay_ms: 0,
            ..ConductorConfig::default()
        };
        let orch = Orchestrator::new(temp.path(), cfg, &exec).expect("orchestrator");
        orch.run("hero-banner").expect("run");

        let kb = &orch.knowledge;
        assert!(kb.corpus_path(crate::core::blocks::Corpus::Patterns).exists());
        let learnings = kb.learnings_path("hero-banner", Utc::now());
        assert!(learnings.parent().expect("learnings dir").is_dir());
    }

    #[test]
    fn unreadable_metrics_are_reported_not_replaced() {
        let ws = TestWorkspace::new().expect("workspace");
        let mut task = ws.create_task("Hero Banner").expect("task");
        task.meta.status = TaskStatus::Review;
        task.learning = Some(ScriptedStep::learning_record("x.md"));
        ws.save(&mut task).expect("save");
        let metrics_path = ws.knowledge().metrics_path();
        std::fs::write(&metrics_path, "{ not json").expect("corrupt metrics");

        let exec = ScriptedExecutor::new(
            ws.task_path("hero-banner"),
            vec![ScriptedStep::advance(TaskStatus::Completed)],
        );
        let orch = Orchestrator::new(ws.root(), ws.config(), &exec).expect("orchestrator");
        let outcome = orch.run("hero-banner").expect("run");

        assert_eq!(outcome.stop, RunStop::Completed);
        let entries = log_entries(&outcome);
        assert!(entries.iter().any(|e| e["data"]["code"] == "metrics_update_failed"));
        let kept = std::fs::read_to_string(&metrics_path).expect("read metrics");
        assert_eq!(kept, "{ not json");
    }

    #[test]
    fn stalled_learner_with_recorded_learning_is_stepped_past() {
        let ws = TestWorkspace::new().expect("workspace");
        let mut task = ws.create_task("Hero Banner").expect("task");
        task.meta.status = TaskStatus::Learn;
        ws.save(&mut task).expect("save");

        let exec = ScriptedExecutor::new(
            ws.task_path("hero-banner"),
            vec![
                ScriptedStep::learn(),
                ScriptedStep::advance(TaskStatus::Review),
                ScriptedStep::advance(TaskStatus::Completed),
            ],
        );
        let orch = Orchestrator::new(ws.root(), ws.config(), &exec).expect("orchestrator");
        let outcome = orch.run("hero-banner").expect("run");

        assert_eq!(outcome.stop, RunStop::Completed);
        assert_eq!(
            exec.agents(),
            vec![AgentId::Learner, AgentId::Documenter, AgentId::Documenter]
        );
        let entries = log_entries(&outcome);
        let skipped = entries
            .iter()
            .find(|e| e["data"]["reason"] == LEARNING_RECORDED)
            .expect("skip transition");
        assert_eq!(skipped["data"]["to"], "document");
        assert_eq!(skipped["agent"], ORCHESTRATOR_AGENT);
    }

    #[test]
    fn agent_receives_its_profile() {
        let ws = TestWorkspace::new().expect("workspace");
        ws.create_task("Hero Banner").expect("task");
        let exec = ScriptedExecutor::new(
            ws.task_path("hero-banner"),
            vec![ScriptedStep::advance(TaskStatus::Implement)],
        );
        let cfg = ConductorConfig {
            max_iterations: 1,
            ..ws.config()
        };
        let orch = Orchestrator::new(ws.root(), cfg.clone(), &exec).expect("orchestrator");
        orch.run("hero-banner").expect("run");

        let requests = exec.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].tools, cfg.agents.planner.tools);
        assert_eq!(requests[0].max_turns, cfg.agents.planner.max_turns);
        assert!(requests[0].prompt.contains("Hero Banner"));
        assert_eq!(requests[0].workdir, ws.root());
    }
}
