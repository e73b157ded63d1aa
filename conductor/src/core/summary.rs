//! Session summary: a pure fold over logged entries plus its Markdown view.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::core::event::{EventKind, INIT_PHASE, LogEntry};

/// Facts about the session that are not carried by the entries themselves.
#[derive(Debug, Clone)]
pub struct SummaryContext {
    pub session_id: String,
    pub task_slug: String,
    pub final_status: String,
    pub duration_ms: u64,
    pub log_path: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenTotals {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
}

impl TokenTotals {
    /// Input plus output; cache traffic is reported separately.
    pub fn total(&self) -> u64 {
        self.input + self.output
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseBreakdown {
    pub phase: String,
    pub agent: String,
    pub tool_calls: usize,
    pub errors: usize,
    pub success: bool,
    /// Distinct tools in first-use order.
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub phase: String,
    pub message: String,
    pub stack: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub context: SummaryContext,
    /// Distinct phases touched, in first-seen order, `init` included.
    pub phases: Vec<String>,
    pub tool_calls: usize,
    pub tokens: TokenTotals,
    pub breakdown: Vec<PhaseBreakdown>,
    /// Calls per tool, most used first; ties by name.
    pub tool_histogram: Vec<(String, usize)>,
    pub errors: Vec<ErrorRecord>,
}

pub fn summarize(entries: &[LogEntry], context: SummaryContext) -> SessionSummary {
    let mut phases: Vec<String> = Vec::new();
    for entry in entries {
        if !phases.contains(&entry.phase) {
            phases.push(entry.phase.clone());
        }
    }

    let mut tokens = TokenTotals::default();
    for usage in entries.iter().filter_map(|entry| entry.token_usage) {
        tokens.input += usage.input;
        tokens.output += usage.output;
        tokens.cache_read += usage.cache_read.unwrap_or(0);
        tokens.cache_write += usage.cache_write.unwrap_or(0);
    }

    let tool_names: Vec<&str> = entries
        .iter()
        .filter(|entry| entry.event_type == EventKind::ToolCall)
        .map(|entry| entry.data_str("tool").unwrap_or("unknown"))
        .collect();
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for &name in &tool_names {
        *counts.entry(name).or_default() += 1;
    }
    let mut tool_histogram: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(name, count)| (name.to_string(), count))
        .collect();
    tool_histogram.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let breakdown = phases
        .iter()
        .filter(|phase| phase.as_str() != INIT_PHASE)
        .map(|phase| phase_breakdown(entries, phase))
        .collect();

    let errors = entries
        .iter()
        .filter(|entry| entry.event_type == EventKind::Error)
        .map(|entry| ErrorRecord {
            phase: entry.phase.clone(),
            message: entry.data_str("message").unwrap_or("").to_string(),
            stack: entry.data_str("stack").map(str::to_string),
        })
        .collect();

    SessionSummary {
        context,
        phases,
        tool_calls: tool_names.len(),
        tokens,
        breakdown,
        tool_histogram,
        errors,
    }
}

fn phase_breakdown(entries: &[LogEntry], phase: &str) -> PhaseBreakdown {
    let in_phase: Vec<&LogEntry> = entries.iter().filter(|entry| entry.phase == phase).collect();
    let of_kind = |kind: EventKind| in_phase.iter().filter(move |entry| entry.event_type == kind);

    let agent = of_kind(EventKind::PhaseStart)
        .next()
        .and_then(|entry| entry.data_str("agent"))
        .unwrap_or("unknown")
        .to_string();
    let success = of_kind(EventKind::PhaseEnd)
        .last()
        .and_then(|entry| entry.data_bool("success"))
        .unwrap_or(false);

    let mut tools: Vec<String> = Vec::new();
    let mut tool_calls = 0;
    for entry in of_kind(EventKind::ToolCall) {
        tool_calls += 1;
        let name = entry.data_str("tool").unwrap_or("unknown");
        if !tools.iter().any(|tool| tool == name) {
            tools.push(name.to_string());
        }
    }

    PhaseBreakdown {
        phase: phase.to_string(),
        agent,
        tool_calls,
        errors: of_kind(EventKind::Error).count(),
        success,
        tools,
    }
}

pub fn render(summary: &SessionSummary) -> String {
    let ctx = &summary.context;
    let tokens = &summary.tokens;
    let mut out = String::new();

    out.push_str("# Session Summary\n\n## Overview\n\n");
    out.push_str("| Metric | Value |\n|--------|-------|\n");
    let _ = writeln!(out, "| **Session ID** | `{}` |", ctx.session_id);
    let _ = writeln!(out, "| **Task** | {} |", ctx.task_slug);
    let _ = writeln!(out, "| **Duration** | {} |", format_duration(ctx.duration_ms));
    let _ = writeln!(out, "| **Final Status** | {} |", ctx.final_status);
    let _ = writeln!(out, "| **Phases** | {} |", summary.phases.len());
    let _ = writeln!(out, "| **Tool Calls** | {} |", summary.tool_calls);
    let _ = writeln!(out, "| **Errors** | {} |", summary.errors.len());

    out.push_str("\n## Token Usage\n\n| Type | Count |\n|------|-------|\n");
    let _ = writeln!(out, "| Input | {} |", group_thousands(tokens.input));
    let _ = writeln!(out, "| Output | {} |", group_thousands(tokens.output));
    let _ = writeln!(out, "| Cache Read | {} |", group_thousands(tokens.cache_read));
    let _ = writeln!(out, "| Cache Write | {} |", group_thousands(tokens.cache_write));
    let _ = writeln!(out, "| **Total** | **{}** |", group_thousands(tokens.total()));

    out.push_str("\n## Phase Execution\n\n");
    for phase in &summary.breakdown {
        let _ = writeln!(out, "### {}\n", capitalize(&phase.phase));
        let _ = writeln!(out, "- **Agent**: {}", phase.agent);
        let _ = writeln!(out, "- **Tool Calls**: {}", phase.tool_calls);
        let _ = writeln!(out, "- **Errors**: {}", phase.errors);
        let _ = writeln!(out, "- **Success**: {}", if phase.success { "Yes" } else { "No" });
        if !phase.tools.is_empty() {
            let _ = writeln!(out, "- **Tools Used**: {}", phase.tools.join(", "));
        }
        out.push('\n');
    }

    out.push_str("## Tool Usage\n\n| Tool | Calls |\n|------|-------|\n");
    for (tool, count) in &summary.tool_histogram {
        let _ = writeln!(out, "| {tool} | {count} |");
    }
    out.push('\n');

    if !summary.errors.is_empty() {
        out.push_str("## Errors\n\n");
        for (idx, error) in summary.errors.iter().enumerate() {
            let _ = writeln!(out, "### Error {} ({})\n", idx + 1, error.phase);
            let _ = writeln!(out, "```\n{}\n```\n", error.message);
            if let Some(stack) = &error.stack {
                let _ = writeln!(
                    out,
                    "<details><summary>Stack Trace</summary>\n\n```\n{stack}\n```\n\n</details>\n"
                );
            }
        }
    }

    let log = &ctx.log_path;
    out.push_str("## Log File\n\n");
    let _ = writeln!(out, "Full session log: `{log}`\n");
    let _ = writeln!(out, "```bash\n# View all events\ncat {log} | jq .\n");
    let _ = writeln!(
        out,
        "# Filter by event type\ncat {log} | jq 'select(.event_type == \"tool_call\")'\n"
    );
    let _ = writeln!(
        out,
        "# Filter by phase\ncat {log} | jq 'select(.phase == \"implement\")'\n```"
    );
    out
}

/// `850ms`, `12.3s`, `4m 7s`.
pub fn format_duration(ms: u64) -> String {
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1_000.0)
    } else {
        format!("{}m {}s", ms / 60_000, (ms % 60_000) / 1_000)
    }
}

pub fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::core::types::TokenUsage;

    fn entry(phase: &str, kind: EventKind, data: serde_json::Value) -> LogEntry {
        LogEntry {
            timestamp: "2026-10-16T00:00:00Z".to_string(),
            session_id: "1-hero".to_string(),
            phase: phase.to_string(),
            agent: "planner".to_string(),
            event_type: kind,
            data,
            token_usage: None,
            duration_ms: 0,
        }
    }

    fn with_usage(mut entry: LogEntry, usage: TokenUsage) -> LogEntry {
        entry.token_usage = Some(usage);
        entry
    }

    fn context() -> SummaryContext {
        SummaryContext {
            session_id: "1-hero".to_string(),
            task_slug: "hero".to_string(),
            final_status: "completed".to_string(),
            duration_ms: 65_500,
            log_path: ".conductor/logs/1-hero.jsonl".to_string(),
        }
    }

    fn sample() -> Vec<LogEntry> {
        vec![
            entry("init", EventKind::SessionStart, json!({ "task_slug": "hero" })),
            entry("plan", EventKind::PhaseStart, json!({ "phase": "plan", "agent": "planner" })),
            entry("plan", EventKind::ToolCall, json!({ "tool": "Read" })),
            entry("plan", EventKind::ToolCall, json!({ "tool": "Grep" })),
            entry("plan", EventKind::ToolCall, json!({ "tool": "Read" })),
            with_usage(
                entry("plan", EventKind::Response, json!({ "num_turns": 3 })),
                TokenUsage {
                    input: 1_200,
                    output: 300,
                    cache_read: Some(50),
                    cache_write: None,
                },
            ),
            entry("plan", EventKind::PhaseEnd, json!({ "phase": "plan", "success": false })),
            entry("plan", EventKind::PhaseEnd, json!({ "phase": "plan", "success": true })),
            entry("implement", EventKind::PhaseStart, json!({ "phase": "implement", "agent": "implementer" })),
            entry("implement", EventKind::ToolCall, json!({ "tool": "Edit" })),
            entry(
                "implement",
                EventKind::Error,
                json!({ "message": "agent exited 1", "stack": "at step" }),
            ),
            with_usage(
                entry("implement", EventKind::Response, json!({})),
                TokenUsage {
                    input: 2_000_000,
                    output: 7,
                    cache_read: None,
                    cache_write: Some(11),
                },
            ),
        ]
    }

    #[test]
    fn token_totals_are_exact_sums() {
        let summary = summarize(&sample(), context());
        assert_eq!(
            summary.tokens,
            TokenTotals {
                input: 2_001_200,
                output: 307,
                cache_read: 50,
                cache_write: 11,
            }
        );
        assert_eq!(summary.tokens.total(), 2_001_507);
    }

    #[test]
    fn breakdown_skips_init_and_uses_latest_phase_end() {
        let summary = summarize(&sample(), context());
        assert_eq!(summary.phases, vec!["init", "plan", "implement"]);
        let plan = &summary.breakdown[0];
        assert_eq!(plan.phase, "plan");
        assert_eq!(plan.agent, "planner");
        assert_eq!(plan.tool_calls, 3);
        assert_eq!(plan.tools, vec!["Read", "Grep"]);
        assert!(plan.success);
        let implement = &summary.breakdown[1];
        assert_eq!(implement.errors, 1);
        assert!(!implement.success);
    }

    #[test]
    fn histogram_sorts_by_count_then_name() {
        let summary = summarize(&sample(), context());
        assert_eq!(
            summary.tool_histogram,
            vec![
                ("Read".to_string(), 2),
                ("Edit".to_string(), 1),
                ("Grep".to_string(), 1),
            ]
        );
    }

    #[test]
    fn rendered_summary_lists_errors_and_log_recipes() {
        let text = render(&summarize(&sample(), context()));
        assert!(text.contains("| **Duration** | 1m 5s |"));
        assert!(text.contains("| Input | 2,001,200 |"));
        assert!(text.contains("### Implement"));
        assert!(!text.contains("### Init"));
        assert!(text.contains("### Error 1 (implement)"));
        assert!(text.contains("<details><summary>Stack Trace</summary>"));
        assert!(text.contains("cat .conductor/logs/1-hero.jsonl | jq ."));
    }

    #[test]
    fn empty_session_renders_without_errors_section() {
        let text = render(&summarize(&[], context()));
        assert!(text.contains("| **Total** | **0** |"));
        assert!(!text.contains("## Errors"));
    }

    #[test]
    fn durations_and_grouping() {
        assert_eq!(format_duration(850), "850ms");
        assert_eq!(format_duration(12_340), "12.3s");
        assert_eq!(format_duration(247_000), "4m 7s");
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1_000), "1,000");
        assert_eq!(group_thousands(1_234_567), "1,234,567");
    }
}
