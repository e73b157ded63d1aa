//! Phase instruction builder.
//!
//! One minijinja template per phase. Rendering is a pure function of the
//! inputs: the same task, knowledge context and session identifiers always
//! produce the same text.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::blocks::Corpus;
use crate::core::phase::{ESCALATION_THRESHOLD, PhaseMachine};
use crate::core::task::Task;
use crate::core::types::{Phase, TaskStatus};

const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const IMPLEMENT_TEMPLATE: &str = include_str!("prompts/implement.md");
const VERIFY_TEMPLATE: &str = include_str!("prompts/verify.md");
const LEARN_TEMPLATE: &str = include_str!("prompts/learn.md");
const DOCUMENT_TEMPLATE: &str = include_str!("prompts/document.md");
const REVIEW_TEMPLATE: &str = include_str!("prompts/review.md");

/// Everything a phase instruction may reference.
#[derive(Debug, Clone)]
pub struct PromptInputs<'a> {
    pub phase: Phase,
    pub task: &'a Task,
    pub task_path: String,
    pub knowledge_context: String,
    pub session_id: String,
    pub log_path: String,
    pub learnings_path: String,
    /// Knowledge root as shown to the learner.
    pub knowledge_dir: String,
    /// Terminal outcome the loop is recording when learn runs as the
    /// pre-terminal guard rather than as a step of the chain.
    pub pending_outcome: Option<TaskStatus>,
}

pub struct PromptBuilder {
    env: Environment<'static>,
    machine: PhaseMachine,
}

impl PromptBuilder {
    pub fn new(machine: PhaseMachine) -> Result<Self> {
        let mut env = Environment::new();
        for phase in Phase::ALL {
            env.add_template(phase.as_str(), template_for(phase))
                .with_context(|| format!("load {phase} template"))?;
        }
        Ok(Self { env, machine })
    }

    pub fn build(&self, input: &PromptInputs<'_>) -> Result<String> {
        let phase = input.phase;
        let task = input.task;
        let first_pass = task.meta.qa_attempts <= 1;
        let outcome = match input.pending_outcome {
            Some(TaskStatus::Escalated) => "escalated (requires a human)".to_string(),
            Some(TaskStatus::Completed) => "completed".to_string(),
            _ => format!("in progress (verification attempt {})", task.meta.qa_attempts),
        };
        let join = |corpus: Corpus| format!("{}/knowledge/{}", input.knowledge_dir, corpus.file_name());

        let template = self
            .env
            .get_template(phase.as_str())
            .with_context(|| format!("get {phase} template"))?;
        let rendered = template
            .render(context! {
                task => task,
                task_path => input.task_path.as_str(),
                knowledge => input.knowledge_context.trim(),
                session_id => input.session_id.as_str(),
                log_path => input.log_path.as_str(),
                learnings_path => input.learnings_path.as_str(),
                patterns_path => join(Corpus::Patterns),
                anti_patterns_path => join(Corpus::AntiPatterns),
                success_status => self.machine.next_status(phase).as_str(),
                rework_status => self.machine.rework_status(phase).as_str(),
                threshold => ESCALATION_THRESHOLD,
                first_pass => first_pass,
                outcome => outcome,
                guarded => input.pending_outcome.is_some(),
                escalated => input.pending_outcome == Some(TaskStatus::Escalated),
            })
            .with_context(|| format!("render {phase} template"))?;
        Ok(rendered)
    }
}

fn template_for(phase: Phase) -> &'static str {
    match phase {
        Phase::Plan => PLAN_TEMPLATE,
        Phase::Implement => IMPLEMENT_TEMPLATE,
        Phase::Verify => VERIFY_TEMPLATE,
        Phase::Learn => LEARN_TEMPLATE,
        Phase::Document => DOCUMENT_TEMPLATE,
        Phase::Review => REVIEW_TEMPLATE,
    }
}
