//! I/O adapters for conductor commands.

pub mod config;
pub mod executor;
pub mod knowledge;
pub mod paths;
pub mod process;
pub mod prompt;
pub mod session_log;
pub mod task_store;
