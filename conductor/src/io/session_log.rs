//! Per-run session log: an append-only JSONL stream plus a derived summary.
//!
//! Every entry is kept in memory and appended to `<logs>/<session>.jsonl` as
//! it is issued. The summary is folded from the in-memory entries and written
//! next to the stream as `<session>-summary.md`. Failures to write either
//! artifact are reported through tracing and never abort the run.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::core::event::{EventKind, INIT_PHASE, LogEntry, ORCHESTRATOR_AGENT, preview};
use crate::core::summary::{self, SummaryContext};
use crate::core::types::{AgentId, Phase, TokenUsage};
use crate::io::task_store::now_iso;

/// Characters of a prompt kept in its log entry.
pub const PROMPT_PREVIEW_CHARS: usize = 500;
/// Characters of a tool result kept in its log entry.
pub const TOOL_RESULT_PREVIEW_CHARS: usize = 500;
/// Characters of an agent response kept in its log entry.
pub const RESPONSE_PREVIEW_CHARS: usize = 1_000;

pub struct SessionLogger {
    session_id: String,
    task_slug: String,
    log_path: PathBuf,
    summary_path: PathBuf,
    started: Instant,
    phase: String,
    agent: String,
    entries: Vec<LogEntry>,
}

impl SessionLogger {
    /// Open a session for `task_slug` under `logs_dir` and record its start.
    pub fn new(logs_dir: &Path, task_slug: &str) -> Result<Self> {
        fs::create_dir_all(logs_dir)
            .with_context(|| format!("create log directory {}", logs_dir.display()))?;
        let session_id = format!("{}-{task_slug}", chrono::Utc::now().timestamp_millis());
        let mut logger = Self {
            log_path: logs_dir.join(format!("{session_id}.jsonl")),
            summary_path: logs_dir.join(format!("{session_id}-summary.md")),
            session_id,
            task_slug: task_slug.to_string(),
            started: Instant::now(),
            phase: INIT_PHASE.to_string(),
            agent: ORCHESTRATOR_AGENT.to_string(),
            entries: Vec::new(),
        };
        let started_at = now_iso();
        logger.log(
            EventKind::SessionStart,
            json!({ "task_slug": task_slug, "started_at": started_at }),
            None,
        );
        Ok(logger)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn summary_path(&self) -> &Path {
        &self.summary_path
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Phase and agent stamped on subsequent entries.
    pub fn set_context(&mut self, phase: &str, agent: &str) {
        self.phase = phase.to_string();
        self.agent = agent.to_string();
    }

    pub fn log(&mut self, kind: EventKind, data: Value, token_usage: Option<TokenUsage>) {
        let entry = LogEntry {
            timestamp: now_iso(),
            session_id: self.session_id.clone(),
            phase: self.phase.clone(),
            agent: self.agent.clone(),
            event_type: kind,
            data,
            token_usage,
            duration_ms: self.elapsed_ms(),
        };
        self.append(&entry);
        self.entries.push(entry);
    }

    pub fn log_phase_start(&mut self, phase: Phase, agent: AgentId) {
        self.set_context(phase.as_str(), agent.as_str());
        self.log(
            EventKind::PhaseStart,
            json!({ "phase": phase.as_str(), "agent": agent.as_str() }),
            None,
        );
    }

    pub fn log_phase_end(&mut self, phase: Phase, success: bool, reason: Option<&str>) {
        self.log(
            EventKind::PhaseEnd,
            json!({ "phase": phase.as_str(), "success": success, "reason": reason }),
            None,
        );
    }

    pub fn log_prompt(&mut self, prompt: &str) {
        self.log(
            EventKind::Prompt,
            json!({
                "prompt_preview": preview(prompt, PROMPT_PREVIEW_CHARS),
                "prompt_length": prompt.chars().count(),
            }),
            None,
        );
    }

    pub fn log_tool_call(&mut self, tool: &str, input: Value) {
        let input_size = input.to_string().len();
        self.log(
            EventKind::ToolCall,
            json!({ "tool": tool, "input": input, "input_size": input_size }),
            None,
        );
    }

    pub fn log_tool_result(&mut self, tool: &str, result: &str, success: bool) {
        self.log(
            EventKind::ToolResult,
            json!({
                "tool": tool,
                "success": success,
                "result_size": result.len(),
                "result_preview": preview(result, TOOL_RESULT_PREVIEW_CHARS),
            }),
            None,
        );
    }

    pub fn log_response(&mut self, response: &str, num_turns: Option<u32>, usage: Option<TokenUsage>) {
        self.log(
            EventKind::Response,
            json!({
                "response_length": response.chars().count(),
                "num_turns": num_turns,
                "response_preview": preview(response, RESPONSE_PREVIEW_CHARS),
            }),
            usage,
        );
    }

    /// Record an error. `context` object fields are merged into the payload.
    pub fn log_error(&mut self, message: &str, stack: Option<&str>, context: Value) {
        let mut data = Map::new();
        data.insert("message".to_string(), Value::from(message));
        if let Some(stack) = stack {
            data.insert("stack".to_string(), Value::from(stack));
        }
        if let Value::Object(extra) = context {
            for (key, value) in extra {
                data.entry(key).or_insert(value);
            }
        }
        self.log(EventKind::Error, Value::Object(data), None);
    }

    pub fn log_phase_transition(&mut self, from: &str, to: &str, reason: &str) {
        self.log(
            EventKind::PhaseTransition,
            json!({ "from": from, "to": to, "reason": reason }),
            None,
        );
    }

    pub fn log_escalation(&mut self, reason: &str, attempts: u32) {
        self.log(
            EventKind::Escalation,
            json!({ "reason": reason, "attempts": attempts, "requires_human": true }),
            None,
        );
    }

    /// Fold the session into its Markdown summary and write it beside the log.
    pub fn generate_summary(&self, final_status: &str) -> String {
        let context = SummaryContext {
            session_id: self.session_id.clone(),
            task_slug: self.task_slug.clone(),
            final_status: final_status.to_string(),
            duration_ms: self.elapsed_ms(),
            log_path: self.log_path.display().to_string(),
        };
        let rendered = summary::render(&summary::summarize(&self.entries, context));
        match fs::write(&self.summary_path, &rendered) {
            Ok(()) => debug!(path = %self.summary_path.display(), "wrote session summary"),
            Err(err) => warn!(err = %err, path = %self.summary_path.display(), "failed to write session summary"),
        }
        rendered
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn append(&self, entry: &LogEntry) {
        let result = serde_json::to_string(entry)
            .map_err(std::io::Error::other)
            .and_then(|line| {
                let mut file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.log_path)?;
                writeln!(file, "{line}")
            });
        if let Err(err) = result {
            warn!(err = %err, path = %self.log_path.display(), "failed to append session log entry");
        }
    }
}
