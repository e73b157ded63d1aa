//! Block grammar for knowledge corpora.
//!
//! A corpus is free Markdown in which each record starts at a delimiter
//! heading and runs until the next one:
//!
//! ```text
//! ## Pattern: Lazy hero images
//! **Source:** learnings/hero-section-1700000000000.md
//! **Description:**
//! Defer offscreen hero slides behind `loading="lazy"`.
//!
//! Free text body...
//! ```
//!
//! Attribute lines (`**Key:** value`) directly follow the heading. An empty
//! value takes the next non-blank line. Everything else is body.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

/// Characters kept from the head of a block when no description is given.
pub const SUMMARY_CHARS: usize = 150;

static ATTRIBUTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\*\*([A-Za-z][A-Za-z _-]*):\*\*\s*(.*)$").expect("attribute regex")
});

/// Which accumulating corpus a block belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corpus {
    Patterns,
    AntiPatterns,
    Insights,
}

impl Corpus {
    /// Heading prefix that opens a block in this corpus.
    pub fn delimiter(self) -> &'static str {
        match self {
            Corpus::Patterns => "## Pattern:",
            Corpus::AntiPatterns => "## Anti-Pattern:",
            Corpus::Insights => "## Insight:",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            Corpus::Patterns => "patterns.md",
            Corpus::AntiPatterns => "anti-patterns.md",
            Corpus::Insights => "insights.md",
        }
    }
}

/// One parsed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeBlock {
    pub name: String,
    /// Attribute values keyed by lower-cased key.
    pub attributes: BTreeMap<String, String>,
    pub body: String,
    /// Heading remainder plus everything up to the next delimiter; the text
    /// relevance is scored against.
    pub raw: String,
}

impl KnowledgeBlock {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn source(&self) -> &str {
        self.attribute("source").unwrap_or("unknown")
    }

    /// Description attribute, else the first two lines after the heading
    /// joined and cut to [`SUMMARY_CHARS`].
    pub fn summary(&self) -> String {
        if let Some(description) = self.attribute("description") {
            return description.to_string();
        }
        let head = self
            .raw
            .trim()
            .lines()
            .skip(1)
            .take(2)
            .collect::<Vec<_>>()
            .join(" ");
        head.chars().take(SUMMARY_CHARS).collect()
    }
}

/// Split `content` at every `corpus` delimiter and parse each block.
/// Text before the first delimiter (the file header) is ignored.
pub fn parse_blocks(content: &str, corpus: Corpus) -> Vec<KnowledgeBlock> {
    content
        .split(corpus.delimiter())
        .skip(1)
        .map(parse_block)
        .collect()
}

fn parse_block(raw: &str) -> KnowledgeBlock {
    let trimmed = raw.trim();
    let mut lines = trimmed.lines();
    let name = match lines.next().map(str::trim) {
        Some(line) if !line.is_empty() => line.to_string(),
        _ => "Unknown".to_string(),
    };

    let rest: Vec<&str> = lines.collect();
    let mut attributes = BTreeMap::new();
    let mut idx = 0;
    while idx < rest.len() {
        let line = rest[idx].trim();
        if line.is_empty() {
            idx += 1;
            continue;
        }
        let Some(caps) = ATTRIBUTE_RE.captures(line) else {
            break;
        };
        let key = caps[1].trim().to_lowercase();
        let mut value = caps[2].trim().to_string();
        idx += 1;
        if value.is_empty() {
            while idx < rest.len() && rest[idx].trim().is_empty() {
                idx += 1;
            }
            if idx < rest.len() && !ATTRIBUTE_RE.is_match(rest[idx].trim()) {
                value = rest[idx].trim().to_string();
                idx += 1;
            }
        }
        attributes.insert(key, value);
    }

    let body = rest[idx.min(rest.len())..].join("\n").trim().to_string();

    KnowledgeBlock {
        name,
        attributes,
        body,
        raw: raw.to_string(),
    }
}

/// Render a block in the grammar `parse_blocks` reads.
pub fn render_block(corpus: Corpus, name: &str, attributes: &[(&str, &str)], body: &str) -> String {
    let mut buf = format!("{} {}\n", corpus.delimiter(), name.trim());
    for (key, value) in attributes {
        buf.push_str(&format!("**{key}:** {}\n", value.trim()));
    }
    if !body.trim().is_empty() {
        buf.push('\n');
        buf.push_str(body.trim());
        buf.push('\n');
    }
    buf
}

/// Extract a `## <heading>` section up to the next `## ` heading or the end.
pub fn section<'a>(document: &'a str, heading: &str) -> Option<&'a str> {
    let marker = format!("## {heading}");
    let start = document.find(&marker)?;
    let after = start + marker.len();
    let end = document[after..]
        .find("\n## ")
        .map(|offset| after + offset + 1)
        .unwrap_or(document.len());
    Some(document[start..end].trim_end())
}
