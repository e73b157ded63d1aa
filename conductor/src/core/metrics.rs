//! Aggregate metrics over finished tasks.
//!
//! Rates and averages are maintained as running means so a single record
//! can be folded in without rereading history:
//! `new_mean = (old_mean * old_count + value) / new_count`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Category used when no keyword rule matches a task name.
pub const DEFAULT_TASK_TYPE: &str = "general";

/// One finished task, as seen by the metrics record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub task_type: String,
    pub qa_attempts: u32,
    pub first_pass: bool,
    pub patterns_found: u32,
    pub anti_patterns_found: u32,
}

impl Observation {
    /// A task passed first time when it needed at most one verification.
    pub fn new(task_type: impl Into<String>, qa_attempts: u32) -> Self {
        Self {
            task_type: task_type.into(),
            qa_attempts,
            first_pass: qa_attempts <= 1,
            patterns_found: 0,
            anti_patterns_found: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskTypeMetrics {
    pub count: u64,
    pub first_pass_rate: f64,
    pub average_qa_attempts: f64,
    pub total_qa_attempts: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonthMetrics {
    pub sessions: u64,
    pub first_pass_rate: f64,
    pub average_qa_attempts: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metrics {
    pub total_sessions: u64,
    pub first_pass_successes: u64,
    pub first_pass_rate: f64,
    pub total_qa_attempts: u64,
    pub average_qa_attempts: f64,
    pub patterns_identified: u64,
    pub anti_patterns_identified: u64,
    pub by_task_type: BTreeMap<String, TaskTypeMetrics>,
    pub by_month: BTreeMap<String, MonthMetrics>,
    pub last_updated: Option<String>,
}

/// Fold `value` into a mean over `old_count` observations.
pub fn incremental_mean(old_mean: f64, old_count: u64, value: f64) -> f64 {
    let new_count = old_count + 1;
    (old_mean * old_count as f64 + value) / new_count as f64
}

impl Metrics {
    /// Fold one observation into the overall, per-type and per-month figures.
    pub fn record(&mut self, obs: &Observation, month: &str, now: &str) {
        let pass = if obs.first_pass { 1.0 } else { 0.0 };
        let attempts = f64::from(obs.qa_attempts);

        self.first_pass_rate = incremental_mean(self.first_pass_rate, self.total_sessions, pass);
        self.average_qa_attempts =
            incremental_mean(self.average_qa_attempts, self.total_sessions, attempts);
        self.total_sessions += 1;
        self.first_pass_successes += u64::from(obs.first_pass);
        self.total_qa_attempts += u64::from(obs.qa_attempts);
        self.patterns_identified += u64::from(obs.patterns_found);
        self.anti_patterns_identified += u64::from(obs.anti_patterns_found);

        let by_type = self.by_task_type.entry(obs.task_type.clone()).or_default();
        by_type.first_pass_rate = incremental_mean(by_type.first_pass_rate, by_type.count, pass);
        by_type.average_qa_attempts =
            incremental_mean(by_type.average_qa_attempts, by_type.count, attempts);
        by_type.count += 1;
        by_type.total_qa_attempts += u64::from(obs.qa_attempts);

        let by_month = self.by_month.entry(month.to_string()).or_default();
        by_month.first_pass_rate =
            incremental_mean(by_month.first_pass_rate, by_month.sessions, pass);
        by_month.average_qa_attempts =
            incremental_mean(by_month.average_qa_attempts, by_month.sessions, attempts);
        by_month.sessions += 1;

        self.last_updated = Some(now.to_string());
    }
}

/// Keyword → category rule for inferring a task type from its name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTypeRule {
    pub keyword: String,
    pub category: String,
}

impl TaskTypeRule {
    pub fn new(keyword: &str, category: &str) -> Self {
        Self {
            keyword: keyword.to_string(),
            category: category.to_string(),
        }
    }
}

pub fn default_task_type_rules() -> Vec<TaskTypeRule> {
    [
        ("hero", "hero-section"),
        ("product", "product-section"),
        ("collection", "collection-section"),
        ("footer", "footer-section"),
        ("header", "header-section"),
        ("cart", "cart-section"),
        ("blog", "blog-section"),
        ("article", "article-section"),
        ("contact", "contact-section"),
        ("testimonial", "testimonial-section"),
        ("faq", "faq-section"),
    ]
    .into_iter()
    .map(|(keyword, category)| TaskTypeRule::new(keyword, category))
    .collect()
}

/// First rule whose keyword occurs in the lower-cased name wins.
pub fn infer_task_type(name: &str, rules: &[TaskTypeRule]) -> String {
    let name = name.to_lowercase();
    rules
        .iter()
        .find(|rule| name.contains(&rule.keyword.to_lowercase()))
        .map(|rule| rule.category.clone())
        .unwrap_or_else(|| DEFAULT_TASK_TYPE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn fold(observations: &[(bool, u32)]) -> Metrics {
        let mut metrics = Metrics::default();
        for &(first_pass, qa_attempts) in observations {
            let obs = Observation {
                task_type: "hero-section".to_string(),
                qa_attempts,
                first_pass,
                patterns_found: 0,
                anti_patterns_found: 0,
            };
            metrics.record(&obs, "2026-10", "now");
        }
        metrics
    }

    #[test]
    fn incremental_updates_match_batch_aggregates() {
        let sequences: Vec<Vec<(bool, u32)>> = vec![
            vec![(true, 1)],
            vec![(true, 0), (false, 3), (true, 1)],
            vec![(false, 2), (false, 3), (true, 1), (true, 1), (false, 5), (true, 0)],
            (0..50).map(|i| (i % 3 == 0, (i % 4) as u32)).collect(),
        ];
        for seq in sequences {
            let metrics = fold(&seq);
            let n = seq.len() as f64;
            let passes = seq.iter().filter(|(p, _)| *p).count() as f64;
            let attempts: u32 = seq.iter().map(|(_, a)| a).sum();

            assert_eq!(metrics.total_sessions, seq.len() as u64);
            assert!((metrics.first_pass_rate - passes / n).abs() < EPS);
            assert!((metrics.average_qa_attempts - f64::from(attempts) / n).abs() < EPS);

            let by_type = &metrics.by_task_type["hero-section"];
            assert!((by_type.first_pass_rate - passes / n).abs() < EPS);
            assert_eq!(by_type.total_qa_attempts, u64::from(attempts));

            let by_month = &metrics.by_month["2026-10"];
            assert_eq!(by_month.sessions, seq.len() as u64);
            assert!((by_month.average_qa_attempts - f64::from(attempts) / n).abs() < EPS);
        }
    }

    #[test]
    fn first_pass_means_at_most_one_attempt() {
        assert!(Observation::new("x", 0).first_pass);
        assert!(Observation::new("x", 1).first_pass);
        assert!(!Observation::new("x", 2).first_pass);
    }

    #[test]
    fn months_and_types_are_tracked_separately() {
        let mut metrics = Metrics::default();
        metrics.record(&Observation::new("hero-section", 1), "2026-09", "a");
        metrics.record(&Observation::new("cart-section", 3), "2026-10", "b");
        assert_eq!(metrics.by_month.len(), 2);
        assert_eq!(metrics.by_task_type.len(), 2);
        assert_eq!(metrics.by_task_type["cart-section"].first_pass_rate, 0.0);
        assert_eq!(metrics.last_updated.as_deref(), Some("b"));
    }

    #[test]
    fn task_type_first_match_wins() {
        let rules = default_task_type_rules();
        assert_eq!(infer_task_type("Hero Product Banner", &rules), "hero-section");
        assert_eq!(infer_task_type("Featured Product Grid", &rules), "product-section");
        assert_eq!(infer_task_type("Newsletter Signup", &rules), DEFAULT_TASK_TYPE);
    }
}
