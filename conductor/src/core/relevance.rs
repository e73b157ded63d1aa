//! Keyword extraction and relevance scoring for knowledge retrieval.

/// Tokens dropped from queries regardless of length.
pub const STOP_WORDS: [&str; 5] = ["the", "and", "for", "with", "from"];

/// Lower-case `text`, split on non-alphanumeric runs, drop tokens of length
/// two or less and stop words.
pub fn extract_keywords(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| token.len() > 2)
        .filter(|token| !STOP_WORDS.contains(token))
        .map(str::to_string)
        .collect()
}

/// Sum over `keywords` of case-insensitive, non-overlapping substring
/// occurrences within `content`.
pub fn score(content: &str, keywords: &[String]) -> usize {
    let haystack = content.to_lowercase();
    keywords
        .iter()
        .map(|keyword| haystack.matches(keyword.as_str()).count())
        .sum()
}

/// Score every item, drop zero scores, stable-sort descending and keep the
/// top `limit`.
pub fn rank<T, F>(items: Vec<T>, keywords: &[String], limit: usize, text_of: F) -> Vec<(T, usize)>
where
    F: Fn(&T) -> &str,
{
    let mut scored: Vec<(T, usize)> = items
        .into_iter()
        .map(|item| {
            let relevance = score(text_of(&item), keywords);
            (item, relevance)
        })
        .filter(|(_, relevance)| *relevance > 0)
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored.truncate(limit);
    scored
}
