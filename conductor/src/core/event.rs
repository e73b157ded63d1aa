//! Session event records.
//!
//! One [`LogEntry`] per line of the session JSONL stream. Entries are
//! immutable once issued; the summary is a fold over them.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::TokenUsage;

/// Phase label used before the first phase starts.
pub const INIT_PHASE: &str = "init";
/// Agent label used for events the loop itself issues.
pub const ORCHESTRATOR_AGENT: &str = "orchestrator";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStart,
    PhaseStart,
    PhaseEnd,
    Prompt,
    ToolCall,
    ToolResult,
    Response,
    Error,
    PhaseTransition,
    Escalation,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::SessionStart,
        EventKind::PhaseStart,
        EventKind::PhaseEnd,
        EventKind::Prompt,
        EventKind::ToolCall,
        EventKind::ToolResult,
        EventKind::Response,
        EventKind::Error,
        EventKind::PhaseTransition,
        EventKind::Escalation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::SessionStart => "session_start",
            EventKind::PhaseStart => "phase_start",
            EventKind::PhaseEnd => "phase_end",
            EventKind::Prompt => "prompt",
            EventKind::ToolCall => "tool_call",
            EventKind::ToolResult => "tool_result",
            EventKind::Response => "response",
            EventKind::Error => "error",
            EventKind::PhaseTransition => "phase_transition",
            EventKind::Escalation => "escalation",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub session_id: String,
    pub phase: String,
    pub agent: String,
    pub event_type: EventKind,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    /// Milliseconds since the session started.
    pub duration_ms: u64,
}

impl LogEntry {
    /// String field of the payload, if present.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn data_bool(&self, key: &str) -> Option<bool> {
        self.data.get(key).and_then(Value::as_bool)
    }
}

/// Cut `text` to at most `limit` characters, marking the cut with `...`.
pub fn preview(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(limit).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_serialize_to_their_wire_names() {
        for kind in EventKind::ALL {
            let json = serde_json::to_string(&kind).expect("serialize");
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn preview_keeps_short_text_and_marks_cuts() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("abcdef", 3), "abc...");
        assert_eq!(preview("ééééé", 2), "éé...");
    }

    #[test]
    fn entries_without_usage_omit_the_field() {
        let entry = LogEntry {
            timestamp: "2026-10-16T00:00:00Z".to_string(),
            session_id: "1-x".to_string(),
            phase: INIT_PHASE.to_string(),
            agent: ORCHESTRATOR_AGENT.to_string(),
            event_type: EventKind::SessionStart,
            data: serde_json::json!({ "task_slug": "x" }),
            token_usage: None,
            duration_ms: 0,
        };
        let json = serde_json::to_string(&entry).expect("serialize");
        assert!(!json.contains("token_usage"));
        assert!(json.contains("\"event_type\":\"session_start\""));
    }
}
