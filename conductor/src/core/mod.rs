//! Deterministic, pure logic shared by the conductor.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod blocks;
pub mod event;
pub mod metrics;
pub mod phase;
pub mod relevance;
pub mod summary;
pub mod task;
pub mod transcript;
pub mod types;
