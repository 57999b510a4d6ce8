//! String helpers.

/// Truncate `s` to at most `max_len` bytes on a char boundary, appending
/// `suffix` when anything was cut. The suffix counts toward `max_len`.
#[must_use]
pub fn truncate_with_suffix(s: &str, max_len: usize, suffix: &str) -> String {
    if s.len() <= max_len {
        return s.to_owned();
    }
    let budget = max_len.saturating_sub(suffix.len());
    let end = s
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= budget)
        .last()
        .unwrap_or(0);
    format!("{}{suffix}", &s[..end])
}

/// Truncate with a `"..."` suffix.
#[must_use]
pub fn truncate_str(s: &str, max_len: usize) -> String {
    truncate_with_suffix(s, max_len, "...")
}
