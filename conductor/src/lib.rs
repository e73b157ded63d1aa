//! Phase-driven agent workflow conductor.
//!
//! A task record moves through plan, implement, verify, learn, document and
//! review, each phase handed to a capability-restricted agent, until it is
//! completed or escalated to a human. The crate is split the usual way:
//!
//! - **[`core`]**: Pure, deterministic logic (phase routing, relevance
//!   scoring, metrics arithmetic, summary folding). No I/O.
//! - **[`io`]**: Side-effecting adapters (task store, session log, knowledge
//!   files, prompt rendering, agent processes).
//!
//! [`orchestrator`] composes the two into the run loop; [`create`] backs the
//! scaffolding commands.

pub mod core;
pub mod create;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
