//! Structural failures that callers branch on.
//!
//! Everything else travels as `anyhow::Error` with context attached; these
//! variants are recovered with `downcast_ref` where the distinction matters
//! (exit codes, fatal-vs-absorbed in the loop).

use std::path::PathBuf;

use thiserror::Error;

use crate::core::types::{AgentId, TaskStatus};

#[derive(Debug, Error)]
pub enum ConductorError {
    /// The task record path does not exist.
    #[error("task record not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// The task record is not parseable JSON.
    #[error("malformed task record {}: {message}", path.display())]
    Malformed { path: PathBuf, message: String },

    /// The task record parses but violates the task schema.
    #[error("task record {} violates schema:\n- {}", path.display(), violations.join("\n- "))]
    SchemaInvalid {
        path: PathBuf,
        violations: Vec<String>,
    },

    /// A phase was requested for a task that has already finished.
    #[error("task is in terminal status '{status}'")]
    InvalidState { status: TaskStatus },

    /// The agent process could not be launched.
    #[error("failed to launch agent {agent}: {message}")]
    Execution { agent: AgentId, message: String },
}

impl ConductorError {
    /// True for malformed or schema-invalid task records.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ConductorError::Malformed { .. } | ConductorError::SchemaInvalid { .. }
        )
    }
}
