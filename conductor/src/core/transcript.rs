//! Coarse tool-call extraction from raw agent output.

use std::sync::LazyLock;

use regex::Regex;

static TOOL_CALL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"Using tool: (\w+)", r"Tool: (\w+)", r"Calling (\w+)"]
        .into_iter()
        .map(|pattern| Regex::new(pattern).expect("tool call regex"))
        .collect()
});

/// Tool names mentioned in `output`, in order of appearance. A name matched
/// by more than one phrasing is reported once.
pub fn extract_tool_calls(output: &str) -> Vec<String> {
    let mut hits: Vec<(usize, String)> = TOOL_CALL_PATTERNS
        .iter()
        .flat_map(|re| {
            re.captures_iter(output).filter_map(|caps| {
                let name = caps.get(1)?;
                Some((name.start(), name.as_str().to_string()))
            })
        })
        .collect();
    hits.sort_by_key(|(position, _)| *position);
    hits.dedup_by_key(|(position, _)| *position);
    hits.into_iter().map(|(_, name)| name).collect()
}
