//! Stable exit codes for conductor CLI commands.

/// Command succeeded or the task completed.
pub const OK: i32 = 0;
/// Invalid task record, config or arguments, or any other error.
pub const INVALID: i32 = 1;
/// The task was escalated to a human.
pub const ESCALATED: i32 = 2;
/// The run hit the iteration cap before the task finished.
pub const SAFETY_VALVE: i32 = 3;
