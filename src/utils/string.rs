/// Find the largest valid UTF-8 boundary at or before the given byte index.
#[inline]
fn safe_byte_boundary(s: &str, max_bytes: usize) -> usize {
    if max_bytes >= s.len() {
        return s.len();
    }
    s.char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= max_bytes)
        .last()
        .unwrap_or(0)
}

/// Truncate a string to maximum character count (UTF-8 safe).
///
/// Adds "..." suffix if truncated. Used to clamp ledger summaries and
/// status details to their character budgets.
#[inline]
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    let char_count = s.chars().count();
    if char_count <= max_chars {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", truncated)
}

/// Truncate a string with a marker if it exceeds the maximum byte length (UTF-8 safe).
///
/// Used for command output embedded in remediation prompts, where we want an
/// explicit truncation marker rather than a bare ellipsis.
#[inline]
pub fn truncate_with_marker(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        s.to_string()
    } else {
        let boundary = safe_byte_boundary(s, max_bytes);
        format!("{}...[truncated]", &s[..boundary])
    }
}

/// Collapse runs of whitespace into single spaces and trim the ends.
#[inline]
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Single-line rendition of arbitrary text, clamped to `max_chars`.
pub fn single_line(s: &str, max_chars: usize) -> String {
    truncate_chars(&collapse_whitespace(s), max_chars)
}
