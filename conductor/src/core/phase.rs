//! Phase state machine.
//!
//! Routing is a single transition relation keyed by `(status, outcome)`.
//! The relation is validated once at construction, so the lookups below are
//! total and the status, phase and agent tables cannot drift apart.
//!
//! The machine only describes where a phase is expected to lead. It never
//! moves a task itself: agents write `meta.status` as a side effect of their
//! own execution and the loop observes the persisted result.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::core::task::Task;
use crate::core::types::{AgentId, Phase, TaskStatus};
use crate::error::ConductorError;

/// Verification attempts after which a task is handed to a human.
pub const ESCALATION_THRESHOLD: u32 = 3;

/// How a phase ended, from the point of view of the transition relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PhaseOutcome {
    Passed,
    Failed,
}

/// Classification of an observed status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// Matches the canonical forward transition.
    Advanced,
    /// Matches the expected recovery target.
    Reworked,
    /// Anything else an agent wrote.
    Unexpected,
}

impl TransitionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransitionKind::Advanced => "advanced",
            TransitionKind::Reworked => "reworked",
            TransitionKind::Unexpected => "unexpected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionTableError {
    #[error("transition leaves terminal status '{0}'")]
    FromTerminal(TaskStatus),
    #[error("duplicate transition for ({status}, {outcome:?})")]
    Duplicate {
        status: TaskStatus,
        outcome: PhaseOutcome,
    },
    #[error("missing transition for ({status}, {outcome:?})")]
    Missing {
        status: TaskStatus,
        outcome: PhaseOutcome,
    },
    #[error("success chain revisits '{0}'")]
    Cycle(TaskStatus),
    #[error("success chain skips '{0}'")]
    Unreachable(TaskStatus),
    #[error("success chain does not end at completed")]
    NoCompletion,
}

/// Canonical relation: the success chain plus the recovery targets agents
/// are expected to choose when a phase fails.
pub const STANDARD_TRANSITIONS: [(TaskStatus, PhaseOutcome, TaskStatus); 12] = [
    (TaskStatus::Plan, PhaseOutcome::Passed, TaskStatus::Implement),
    (TaskStatus::Implement, PhaseOutcome::Passed, TaskStatus::Verify),
    (TaskStatus::Verify, PhaseOutcome::Passed, TaskStatus::Learn),
    (TaskStatus::Learn, PhaseOutcome::Passed, TaskStatus::Document),
    (TaskStatus::Document, PhaseOutcome::Passed, TaskStatus::Review),
    (TaskStatus::Review, PhaseOutcome::Passed, TaskStatus::Completed),
    (TaskStatus::Plan, PhaseOutcome::Failed, TaskStatus::Plan),
    (TaskStatus::Implement, PhaseOutcome::Failed, TaskStatus::Implement),
    (TaskStatus::Verify, PhaseOutcome::Failed, TaskStatus::Implement),
    (TaskStatus::Learn, PhaseOutcome::Failed, TaskStatus::Learn),
    (TaskStatus::Document, PhaseOutcome::Failed, TaskStatus::Document),
    (TaskStatus::Review, PhaseOutcome::Failed, TaskStatus::Implement),
];

/// Validated transition relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseMachine {
    passed: [TaskStatus; 6],
    failed: [TaskStatus; 6],
}

impl PhaseMachine {
    /// Build a machine from `(from, outcome, to)` entries.
    ///
    /// Every open status needs exactly one entry per outcome, and the
    /// `Passed` chain starting at `plan` must visit every open status once
    /// before reaching `completed`.
    pub fn new(
        entries: &[(TaskStatus, PhaseOutcome, TaskStatus)],
    ) -> Result<Self, TransitionTableError> {
        let mut passed: [Option<TaskStatus>; 6] = [None; 6];
        let mut failed: [Option<TaskStatus>; 6] = [None; 6];

        for &(from, outcome, to) in entries {
            let Some(phase) = from.phase() else {
                return Err(TransitionTableError::FromTerminal(from));
            };
            let slot = match outcome {
                PhaseOutcome::Passed => &mut passed[phase.index()],
                PhaseOutcome::Failed => &mut failed[phase.index()],
            };
            if slot.is_some() {
                return Err(TransitionTableError::Duplicate {
                    status: from,
                    outcome,
                });
            }
            *slot = Some(to);
        }

        let passed = fill(passed, PhaseOutcome::Passed)?;
        let failed = fill(failed, PhaseOutcome::Failed)?;
        check_success_chain(&passed)?;
        Ok(Self { passed, failed })
    }

    /// The canonical plan → implement → verify → learn → document → review →
    /// completed machine.
    pub fn standard() -> Result<Self, TransitionTableError> {
        Self::new(&STANDARD_TRANSITIONS)
    }

    /// Phase of a non-terminal task. Callers check terminality first.
    pub fn phase_of(&self, task: &Task) -> Result<Phase, ConductorError> {
        let status = task.status();
        status
            .phase()
            .ok_or(ConductorError::InvalidState { status })
    }

    pub fn agent_of(&self, phase: Phase) -> AgentId {
        phase.agent()
    }

    /// Forward transition on the success path.
    pub fn next_status(&self, phase: Phase) -> TaskStatus {
        self.passed[phase.index()]
    }

    /// Status an agent is expected to write when the phase fails.
    pub fn rework_status(&self, phase: Phase) -> TaskStatus {
        self.failed[phase.index()]
    }

    pub fn should_escalate(&self, task: &Task) -> bool {
        !self.is_terminal(task) && task.meta.qa_attempts >= ESCALATION_THRESHOLD
    }

    pub fn is_terminal(&self, task: &Task) -> bool {
        task.status().is_terminal()
    }

    /// Classify a status change observed after `phase` ran.
    pub fn classify(&self, phase: Phase, to: TaskStatus) -> TransitionKind {
        if to == self.next_status(phase) {
            TransitionKind::Advanced
        } else if to == self.rework_status(phase) && to != phase.status() {
            TransitionKind::Reworked
        } else {
            TransitionKind::Unexpected
        }
    }

    /// The success chain from `plan`, terminal status included.
    pub fn success_chain(&self) -> Vec<TaskStatus> {
        let mut chain = vec![TaskStatus::Plan];
        let mut current = TaskStatus::Plan;
        while let Some(phase) = current.phase() {
            current = self.next_status(phase);
            chain.push(current);
        }
        chain
    }
}

fn fill(
    slots: [Option<TaskStatus>; 6],
    outcome: PhaseOutcome,
) -> Result<[TaskStatus; 6], TransitionTableError> {
    let mut out = [TaskStatus::Plan; 6];
    for phase in Phase::ALL {
        out[phase.index()] = slots[phase.index()].ok_or(TransitionTableError::Missing {
            status: phase.status(),
            outcome,
        })?;
    }
    Ok(out)
}

fn check_success_chain(passed: &[TaskStatus; 6]) -> Result<(), TransitionTableError> {
    let mut seen = BTreeSet::new();
    let mut current = TaskStatus::Plan;
    while let Some(phase) = current.phase() {
        if !seen.insert(current) {
            return Err(TransitionTableError::Cycle(current));
        }
        current = passed[phase.index()];
    }
    if current != TaskStatus::Completed {
        return Err(TransitionTableError::NoCompletion);
    }
    for phase in Phase::ALL {
        if !seen.contains(&phase.status()) {
            return Err(TransitionTableError::Unreachable(phase.status()));
        }
    }
    Ok(())
}
