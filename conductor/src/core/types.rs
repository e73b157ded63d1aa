//! Shared deterministic types for the conductor core.
//!
//! These types define the vocabulary of the task lifecycle: persisted status
//! values, the open phases derived from them, the agent identities that own
//! each phase, and the capability names handed to the executor.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Persisted lifecycle status of a task (`meta.status`).
///
/// Exactly one open phase or one of two terminal outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Plan,
    Implement,
    Verify,
    Learn,
    Document,
    Review,
    Completed,
    Escalated,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 8] = [
        TaskStatus::Plan,
        TaskStatus::Implement,
        TaskStatus::Verify,
        TaskStatus::Learn,
        TaskStatus::Document,
        TaskStatus::Review,
        TaskStatus::Completed,
        TaskStatus::Escalated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Plan => "plan",
            TaskStatus::Implement => "implement",
            TaskStatus::Verify => "verify",
            TaskStatus::Learn => "learn",
            TaskStatus::Document => "document",
            TaskStatus::Review => "review",
            TaskStatus::Completed => "completed",
            TaskStatus::Escalated => "escalated",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Escalated)
    }

    /// The open phase this status names, or `None` for terminal statuses.
    pub fn phase(self) -> Option<Phase> {
        match self {
            TaskStatus::Plan => Some(Phase::Plan),
            TaskStatus::Implement => Some(Phase::Implement),
            TaskStatus::Verify => Some(Phase::Verify),
            TaskStatus::Learn => Some(Phase::Learn),
            TaskStatus::Document => Some(Phase::Document),
            TaskStatus::Review => Some(Phase::Review),
            TaskStatus::Completed | TaskStatus::Escalated => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An open stage of the task lifecycle. Never persisted on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Plan,
    Implement,
    Verify,
    Learn,
    Document,
    Review,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Plan,
        Phase::Implement,
        Phase::Verify,
        Phase::Learn,
        Phase::Document,
        Phase::Review,
    ];

    pub fn as_str(self) -> &'static str {
        self.status().as_str()
    }

    pub fn status(self) -> TaskStatus {
        match self {
            Phase::Plan => TaskStatus::Plan,
            Phase::Implement => TaskStatus::Implement,
            Phase::Verify => TaskStatus::Verify,
            Phase::Learn => TaskStatus::Learn,
            Phase::Document => TaskStatus::Document,
            Phase::Review => TaskStatus::Review,
        }
    }

    /// Position in [`Phase::ALL`]; used for dense per-phase tables.
    pub(crate) fn index(self) -> usize {
        match self {
            Phase::Plan => 0,
            Phase::Implement => 1,
            Phase::Verify => 2,
            Phase::Learn => 3,
            Phase::Document => 4,
            Phase::Review => 5,
        }
    }

    /// Responsible agent. Document and review share the documenter.
    pub fn agent(self) -> AgentId {
        match self {
            Phase::Plan => AgentId::Planner,
            Phase::Implement => AgentId::Implementer,
            Phase::Verify => AgentId::Verifier,
            Phase::Learn => AgentId::Learner,
            Phase::Document | Phase::Review => AgentId::Documenter,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the external agent responsible for a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentId {
    Planner,
    Implementer,
    Verifier,
    Learner,
    Documenter,
}

impl AgentId {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentId::Planner => "planner",
            AgentId::Implementer => "implementer",
            AgentId::Verifier => "verifier",
            AgentId::Learner => "learner",
            AgentId::Documenter => "documenter",
        }
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability names understood by the agent executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tool {
    Read,
    Write,
    Edit,
    Bash,
    Grep,
    Glob,
}

impl Tool {
    pub fn as_str(self) -> &'static str {
        match self {
            Tool::Read => "Read",
            Tool::Write => "Write",
            Tool::Edit => "Edit",
            Tool::Bash => "Bash",
            Tool::Grep => "Grep",
            Tool::Glob => "Glob",
        }
    }

    /// Tools that can change files on disk.
    pub fn mutates_files(self) -> bool {
        matches!(self, Tool::Write | Tool::Edit)
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token counters reported by an agent execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write: Option<u64>,
}
