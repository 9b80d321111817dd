//! Lossy compaction for very dense contexts.
//!
//! Drops common stopwords, prefixes the record kind and joins the remaining
//! tokens with `|`. Not used on the default prompt path.

use huddle_core::store::MemoryRecord;
use regex_lite::Regex;

const STOPWORDS: &str = "the|a|an|is|are|was|were|has|have|had|will|would|should|could|that|this|with|from|for|and|but|or";

/// Compact `content` under a `KIND:` prefix.
///
/// `compact("Ship the beta to Maya", "decision")` gives `DECISION:Ship|beta|to|Maya`.
pub fn compact(content: &str, kind: &str) -> String {
    let prefix = kind.to_uppercase();
    let stripped = match Regex::new(&format!(r"(?i)\b(?:{STOPWORDS})\b")) {
        Ok(re) => re.replace_all(content, "").into_owned(),
        Err(_) => content.to_string(),
    };
    let tokens = stripped.split_whitespace().collect::<Vec<_>>().join("|");
    format!("{prefix}:{tokens}")
}

/// Compact a stored record using its kind as the prefix.
pub fn compact_record(record: &MemoryRecord) -> String {
    compact(&record.content, record.kind.as_str())
}
