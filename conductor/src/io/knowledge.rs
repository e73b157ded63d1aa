//! Knowledge base storage: pattern corpora, learnings and metrics.
//!
//! Layout under the configured root:
//!
//! ```text
//! knowledge/patterns.md
//! knowledge/anti-patterns.md
//! knowledge/insights.md
//! knowledge/metrics.json
//! learnings/<slug>-<epoch millis>.md
//! ```
//!
//! Retrieval never fails on a missing store; it just returns nothing.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::core::blocks::{Corpus, KnowledgeBlock, parse_blocks, render_block, section};
use crate::core::metrics::{Metrics, Observation};
use crate::core::relevance::{extract_keywords, rank};

/// Default number of patterns or anti-patterns returned.
pub const PATTERN_LIMIT: usize = 5;
/// Default number of similar learnings returned.
pub const LEARNINGS_LIMIT: usize = 3;
/// Returned by [`KnowledgeBase::knowledge_context`] when there is nothing to say.
pub const EMPTY_CONTEXT: &str = "No accumulated knowledge yet. This is an early session.";

const PATTERNS_HEADER: &str = "# Successful Patterns

> This file accumulates patterns that have proven successful across tasks.
> Each pattern includes context on when and how to apply it.

---

<!-- Patterns will be appended below -->

";

const ANTI_PATTERNS_HEADER: &str = "# Anti-Patterns to Avoid

> This file documents approaches that have failed, with root cause analysis.
> Reference this during planning to avoid repeating mistakes.

---

<!-- Anti-patterns will be appended below -->

";

const INSIGHTS_HEADER: &str = "# General Insights

> Cross-cutting learnings that don't fit into specific patterns.

---

<!-- Insights will be appended below -->

";

/// A retrieved pattern or anti-pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    pub name: String,
    pub relevance: usize,
    pub source: String,
    pub summary: String,
}

impl PatternMatch {
    fn from_block(block: &KnowledgeBlock, relevance: usize) -> Self {
        Self {
            name: block.name.clone(),
            relevance,
            source: block.source().to_string(),
            summary: block.summary(),
        }
    }
}

/// A pattern to record, in the shape the block grammar reads back.
#[derive(Debug, Clone, Default)]
pub struct NewPattern {
    pub name: String,
    pub source: String,
    pub description: String,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    knowledge_dir: PathBuf,
    learnings_dir: PathBuf,
}

impl KnowledgeBase {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            knowledge_dir: root.join("knowledge"),
            learnings_dir: root.join("learnings"),
        }
    }

    pub fn knowledge_dir(&self) -> &Path {
        &self.knowledge_dir
    }

    pub fn learnings_dir(&self) -> &Path {
        &self.learnings_dir
    }

    pub fn corpus_path(&self, corpus: Corpus) -> PathBuf {
        self.knowledge_dir.join(corpus.file_name())
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.knowledge_dir.join("metrics.json")
    }

    /// Create missing directories and files. Existing content is never touched.
    pub fn initialize(&self) -> Result<()> {
        for dir in [&self.knowledge_dir, &self.learnings_dir] {
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        for (corpus, header) in [
            (Corpus::Patterns, PATTERNS_HEADER),
            (Corpus::AntiPatterns, ANTI_PATTERNS_HEADER),
            (Corpus::Insights, INSIGHTS_HEADER),
        ] {
            write_if_missing(&self.corpus_path(corpus), header)?;
        }
        let metrics_path = self.metrics_path();
        if !metrics_path.exists() {
            write_metrics(&metrics_path, &Metrics::default())?;
        }
        Ok(())
    }

    pub fn relevant_patterns(&self, query: &str, limit: usize) -> Vec<PatternMatch> {
        self.relevant_blocks(Corpus::Patterns, query, limit)
    }

    pub fn relevant_anti_patterns(&self, query: &str, limit: usize) -> Vec<PatternMatch> {
        self.relevant_blocks(Corpus::AntiPatterns, query, limit)
    }

    fn relevant_blocks(&self, corpus: Corpus, query: &str, limit: usize) -> Vec<PatternMatch> {
        let Some(content) = read_optional(&self.corpus_path(corpus)) else {
            return Vec::new();
        };
        let keywords = extract_keywords(query);
        rank(parse_blocks(&content, corpus), &keywords, limit, |block| {
            block.raw.as_str()
        })
        .iter()
        .map(|(block, relevance)| PatternMatch::from_block(block, *relevance))
        .collect()
    }

    /// Outcome summary and recommendations of the most relevant past sessions.
    pub fn similar_task_learnings(&self, query: &str, limit: usize) -> Vec<String> {
        let Ok(dir) = fs::read_dir(&self.learnings_dir) else {
            return Vec::new();
        };
        let mut documents: Vec<(String, String)> = dir
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "md"))
            .filter_map(|path| {
                let name = path.file_name()?.to_string_lossy().into_owned();
                Some((name, read_optional(&path)?))
            })
            .collect();
        // Directory order is platform dependent; ties rank by file name.
        documents.sort();

        let keywords = extract_keywords(query);
        rank(documents, &keywords, limit, |(_, content)| content.as_str())
            .into_iter()
            .map(|((file, content), _)| {
                let outcome = section(&content, "Outcome Summary").unwrap_or("");
                let recommendations = section(&content, "Recommendations").unwrap_or("");
                format!("### From: {file}\n\n{outcome}\n\n{recommendations}")
            })
            .collect()
    }

    /// Current metrics, or `None` if the record is missing or unreadable.
    pub fn metrics(&self) -> Option<Metrics> {
        let path = self.metrics_path();
        let contents = read_optional(&path)?;
        match serde_json::from_str(&contents) {
            Ok(metrics) => Some(metrics),
            Err(err) => {
                warn!(err = %err, path = %path.display(), "ignoring unreadable metrics");
                None
            }
        }
    }

    /// Everything known that bears on `task_name`, formatted for a prompt.
    pub fn knowledge_context(&self, task_name: &str) -> String {
        let patterns = self.relevant_patterns(task_name, PATTERN_LIMIT);
        let anti_patterns = self.relevant_anti_patterns(task_name, PATTERN_LIMIT);
        let learnings = self.similar_task_learnings(task_name, LEARNINGS_LIMIT);
        let metrics = self.metrics().filter(|m| m.total_sessions > 0);

        let mut context = String::new();
        append_matches(&mut context, "Relevant Successful Patterns", &patterns);
        append_matches(&mut context, "Anti-Patterns to Avoid", &anti_patterns);
        if !learnings.is_empty() {
            context.push_str("## Learnings from Similar Tasks\n\n");
            context.push_str(&learnings.join("\n\n---\n\n"));
            context.push_str("\n\n");
        }
        if let Some(metrics) = metrics {
            context.push_str("## System Metrics\n\n");
            context.push_str(&format!("- Total sessions: {}\n", metrics.total_sessions));
            context.push_str(&format!(
                "- First-pass success rate: {:.1}%\n",
                metrics.first_pass_rate * 100.0
            ));
            context.push_str(&format!(
                "- Average QA attempts: {:.1}\n",
                metrics.average_qa_attempts
            ));
        }

        if context.is_empty() {
            EMPTY_CONTEXT.to_string()
        } else {
            context
        }
    }

    /// Where the learner should write this session's learnings document.
    pub fn learnings_path(&self, slug: &str, now: DateTime<Utc>) -> PathBuf {
        self.learnings_dir
            .join(format!("{slug}-{}.md", now.timestamp_millis()))
    }

    pub fn append_pattern(&self, pattern: &NewPattern) -> Result<()> {
        self.append_block(Corpus::Patterns, pattern)
    }

    pub fn append_anti_pattern(&self, pattern: &NewPattern) -> Result<()> {
        self.append_block(Corpus::AntiPatterns, pattern)
    }

    pub fn append_insight(&self, insight: &NewPattern) -> Result<()> {
        self.append_block(Corpus::Insights, insight)
    }

    /// Append an already-rendered block (e.g. written by an agent) verbatim.
    pub fn append_raw(&self, corpus: Corpus, text: &str) -> Result<()> {
        let path = self.corpus_path(corpus);
        let mut content = read_optional(&path).unwrap_or_default();
        content.push('\n');
        content.push_str(text.trim_end());
        content.push('\n');
        write_atomic(&path, &content)
    }

    fn append_block(&self, corpus: Corpus, pattern: &NewPattern) -> Result<()> {
        let mut attributes = Vec::new();
        if !pattern.source.trim().is_empty() {
            attributes.push(("Source", pattern.source.as_str()));
        }
        if !pattern.description.trim().is_empty() {
            attributes.push(("Description", pattern.description.as_str()));
        }
        let block = render_block(corpus, &pattern.name, &attributes, &pattern.body);
        self.append_raw(corpus, &block)
    }

    /// Fold one finished task into the metrics record. An existing record
    /// that cannot be read or parsed is an error and is left untouched.
    pub fn update_metrics(&self, observation: &Observation, now: DateTime<Utc>) -> Result<Metrics> {
        let path = self.metrics_path();
        let mut metrics = read_metrics(&path)?;
        let month = now.format("%Y-%m").to_string();
        metrics.record(
            observation,
            &month,
            &now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        );
        write_metrics(&path, &metrics)?;
        debug!(
            task_type = %observation.task_type,
            total_sessions = metrics.total_sessions,
            "metrics updated"
        );
        Ok(metrics)
    }
}

fn append_matches(context: &mut String, heading: &str, matches: &[PatternMatch]) {
    if matches.is_empty() {
        return;
    }
    context.push_str(&format!("## {heading}\n\n"));
    for m in matches {
        context.push_str(&format!("### {}\n{}\n*Source: {}*\n\n", m.name, m.summary, m.source));
    }
}

fn read_optional(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(contents) => Some(contents),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => {
            warn!(err = %err, path = %path.display(), "failed to read knowledge file");
            None
        }
    }
}

fn read_metrics(path: &Path) -> Result<Metrics> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Metrics::default()),
        Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
    }
}

fn write_if_missing(path: &Path, contents: &str) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_metrics(path: &Path, metrics: &Metrics) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(metrics).context("serialize metrics")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("knowledge path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn kb() -> (tempfile::TempDir, KnowledgeBase) {
        let temp = tempfile::tempdir().expect("tempdir");
        let kb = KnowledgeBase::new(temp.path());
        kb.initialize().expect("initialize");
        (temp, kb)
    }

    fn pattern(name: &str, body: &str) -> NewPattern {
        NewPattern {
            name: name.to_string(),
            source: format!("learnings/{name}.md"),
            description: String::new(),
            body: body.to_string(),
        }
    }

    #[test]
    fn initialize_is_idempotent_and_preserves_content() {
        let (_temp, kb) = kb();
        kb.append_pattern(&pattern("Keep", "hero")).expect("append");
        let before = fs::read_to_string(kb.corpus_path(Corpus::Patterns)).expect("read");
        kb.initialize().expect("initialize again");
        let after = fs::read_to_string(kb.corpus_path(Corpus::Patterns)).expect("read");
        assert_eq!(before, after);
        assert!(after.starts_with("# Successful Patterns"));
        assert!(kb.learnings_dir().is_dir());
        assert_eq!(kb.metrics(), Some(Metrics::default()));
    }

    #[test]
    fn more_mentions_rank_first() {
        let (_temp, kb) = kb();
        kb.append_pattern(&pattern("Once", "A hero image.")).expect("append");
        kb.append_pattern(&pattern("Thrice", "hero hero hero layout")).expect("append");
        kb.append_pattern(&pattern("Never", "Footer links.")).expect("append");

        let matches = kb.relevant_patterns("Hero Section Banner", PATTERN_LIMIT);
        let names: Vec<&str> = matches.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Thrice", "Once"]);
        assert_eq!(matches[0].source, "learnings/Thrice.md");
    }

    #[test]
    fn anti_patterns_are_a_separate_corpus() {
        let (_temp, kb) = kb();
        kb.append_anti_pattern(&NewPattern {
            name: "Inline hero styles".to_string(),
            source: "learnings/a.md".to_string(),
            description: "Styles bypassed the theme editor.".to_string(),
            body: String::new(),
        })
        .expect("append");
        assert!(kb.relevant_patterns("hero", PATTERN_LIMIT).is_empty());
        let anti = kb.relevant_anti_patterns("hero", PATTERN_LIMIT);
        assert_eq!(anti.len(), 1);
        assert_eq!(anti[0].summary, "Styles bypassed the theme editor.");
    }

    #[test]
    fn learnings_return_outcome_and_recommendations() {
        let (_temp, kb) = kb();
        fs::write(
            kb.learnings_dir().join("hero-1.md"),
            "# Learnings\n\n## Outcome Summary\nHero shipped.\n\n## What Worked\nx\n\n## Recommendations\nReuse hero grid.\n",
        )
        .expect("write");
        fs::write(kb.learnings_dir().join("cart-2.md"), "## Outcome Summary\nCart.\n").expect("write");

        let learnings = kb.similar_task_learnings("hero banner", LEARNINGS_LIMIT);
        assert_eq!(learnings.len(), 1);
        assert!(learnings[0].starts_with("### From: hero-1.md"));
        assert!(learnings[0].contains("Hero shipped."));
        assert!(learnings[0].contains("Reuse hero grid."));
        assert!(!learnings[0].contains("What Worked"));
    }

    #[test]
    fn empty_store_yields_sentinel() {
        let (_temp, kb) = kb();
        assert_eq!(kb.knowledge_context("Hero Banner"), EMPTY_CONTEXT);

        let missing = KnowledgeBase::new("/nonexistent/conductor-kb");
        assert_eq!(missing.knowledge_context("Hero Banner"), EMPTY_CONTEXT);
    }

    #[test]
    fn context_includes_metrics_once_sessions_exist() {
        let (_temp, kb) = kb();
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).single().expect("date");
        kb.update_metrics(&Observation::new("hero-section", 1), now).expect("update");
        let context = kb.knowledge_context("Newsletter");
        assert!(context.contains("- Total sessions: 1"));
        assert!(context.contains("- First-pass success rate: 100.0%"));
        assert!(context.contains("- Average QA attempts: 1.0"));
    }

    #[test]
    fn update_metrics_persists_monthly_breakdown() {
        let (_temp, kb) = kb();
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).single().expect("date");
        kb.update_metrics(&Observation::new("hero-section", 1), now).expect("update");
        kb.update_metrics(&Observation::new("hero-section", 3), now).expect("update");
        let metrics = kb.metrics().expect("metrics");
        assert_eq!(metrics.total_sessions, 2);
        assert_eq!(metrics.first_pass_successes, 1);
        assert!((metrics.first_pass_rate - 0.5).abs() < 1e-9);
        assert_eq!(metrics.by_month["2026-10"].sessions, 2);
        assert_eq!(metrics.by_task_type["hero-section"].total_qa_attempts, 4);
    }

    #[test]
    fn update_metrics_refuses_to_overwrite_unreadable_record() {
        let (_temp, kb) = kb();
        fs::write(kb.metrics_path(), "{ \"total_sessions\": ").expect("truncate");
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).single().expect("date");

        let err = kb
            .update_metrics(&Observation::new("hero-section", 1), now)
            .unwrap_err();
        assert!(err.to_string().contains("metrics.json"));
        let kept = fs::read_to_string(kb.metrics_path()).expect("read");
        assert_eq!(kept, "{ \"total_sessions\": ");
    }

    #[test]
    fn learnings_path_is_keyed_by_slug_and_millis() {
        let kb = KnowledgeBase::new("/kb");
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).single().expect("ts");
        assert_eq!(
            kb.learnings_path("hero", now),
            PathBuf::from("/kb/learnings/hero-1700000000123.md")
        );
    }
}
