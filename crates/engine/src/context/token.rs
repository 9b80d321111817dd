//! Token estimation.
//!
//! Uses a character-based heuristic: ~4 characters per token. Callers must
//! treat the result as approximate and leave slack.

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}
