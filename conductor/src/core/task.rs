//! The persisted task record.
//!
//! Each phase-scoped sub-record is owned by the agent responsible for that
//! phase; the orchestrator only reads them (it writes `meta` solely when
//! forcing escalation). Fields the agents add beyond this model are kept in
//! `extra` so a rewrite never drops them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::TaskStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub meta: TaskMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation: Option<Implementation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qa: Option<QaResults>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning: Option<LearningResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<Documentation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Sources>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMeta {
    pub name: String,
    pub slug: String,
    pub status: TaskStatus,
    pub created_at: String,
    pub updated_at: String,
    /// Verification attempts so far. Only ever incremented, by the verifier.
    #[serde(default)]
    pub qa_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub design_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    InProgress,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanItem {
    pub id: String,
    pub description: String,
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_affected: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acceptance_criteria: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedPattern {
    pub name: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adaptation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical_approach: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<PlanItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acceptance_criteria: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub risks: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns_applied: Vec<AppliedPattern>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_created: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_modified: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub completed_tasks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub criterion: String,
    pub status: CriterionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Major,
    Minor,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Major => "major",
            Severity::Minor => "minor",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_suggestion: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Proceed,
    ReturnToImplement,
    Escalate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaSummary {
    pub total_criteria: u32,
    pub passed: u32,
    pub failed: u32,
    pub recommendation: Recommendation,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QaResults {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verification_results: Vec<VerificationResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<Issue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<QaSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Success,
    Failure,
    Insight,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifiedPattern {
    pub kind: PatternKind,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    pub reusable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurrences: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillChange {
    AddPattern,
    AddExample,
    AddWarning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillUpdateProposal {
    pub skill: String,
    pub change_type: SkillChange,
    pub content: String,
    pub rationale: String,
}

/// Written by the learner once per task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningResult {
    pub learnings_path: String,
    #[serde(default)]
    pub patterns_identified: Vec<IdentifiedPattern>,
    pub knowledge_base_updated: bool,
    pub metrics_updated: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skill_updates_proposed: Vec<SkillUpdateProposal>,
    pub analyzed_at: String,
}

impl LearningResult {
    pub fn count(&self, kind: PatternKind) -> u32 {
        self.patterns_identified
            .iter()
            .filter(|p| p.kind == kind)
            .count() as u32
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Documentation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_docs_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub developer_docs_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub design_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_file: Option<String>,
}

/// Lower-case `name`, collapse non-alphanumeric runs to `-`, trim dashes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }
    slug
}

impl Task {
    /// Fresh task at the start of the lifecycle.
    pub fn new(name: &str, now: &str) -> Self {
        Self {
            meta: TaskMeta {
                name: name.to_string(),
                slug: slugify(name),
                status: TaskStatus::Plan,
                created_at: now.to_string(),
                updated_at: now.to_string(),
                qa_attempts: 0,
                escalation_reason: None,
                requirements: None,
                design_url: None,
                ticket_id: None,
                extra: BTreeMap::new(),
            },
            plan: None,
            implementation: None,
            qa: None,
            learning: None,
            documentation: None,
            sources: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.meta.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_and_trims() {
        assert_eq!(slugify("Hero Section"), "hero-section");
        assert_eq!(slugify("  Product -- Grid!! "), "product-grid");
        assert_eq!(slugify("FAQ"), "faq");
        assert_eq!(slugify("***"), "");
    }

    #[test]
    fn unknown_fields_survive_a_round_trip() {
        let raw = r#"{
            "meta": {
                "name": "Hero",
                "slug": "hero",
                "status": "verify",
                "created_at": "2026-01-01T00:00:00Z",
                "updated_at": "2026-01-01T00:00:00Z",
                "qa_attempts": 2,
                "owner": "team-a"
            },
            "notes": ["keep me"]
        }"#;
        let task: Task = serde_json::from_str(raw).expect("parse");
        assert_eq!(task.meta.qa_attempts, 2);
        let json = serde_json::to_value(&task).expect("serialize");
        assert_eq!(json["meta"]["owner"], "team-a");
        assert_eq!(json["notes"][0], "keep me");
    }

    #[test]
    fn qa_attempts_defaults_to_zero() {
        let raw = r#"{"meta": {"name": "A", "slug": "a", "status": "plan",
            "created_at": "x", "updated_at": "x"}}"#;
        let task: Task = serde_json::from_str(raw).expect("parse");
        assert_eq!(task.meta.qa_attempts, 0);
        assert!(task.learning.is_none());
    }
}
