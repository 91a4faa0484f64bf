//! UTF-8 safe previews of payload text for log lines.

/// Truncate a string to at most `max_bytes` bytes at a char boundary.
#[inline]
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Truncate `s` and append `…` when it exceeds `max_bytes`.
///
/// The suffix is not counted against the budget; this is for log output,
/// where readability matters more than an exact size.
pub fn preview(s: &str, max_bytes: usize) -> String {
    let truncated = truncate_str(s, max_bytes);
    if truncated.len() == s.len() {
        s.to_owned()
    } else {
        format!("{truncated}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_string_unchanged() {
        assert_eq!(truncate_str("abc", 10), "abc");
    }

    #[test]
    fn ascii_truncation() {
        assert_eq!(truncate_str("hello", 3), "hel");
    }

    #[test]
    fn multibyte_boundary_snaps_back() {
        // 'é' is two bytes; cutting at 2 would split it.
        assert_eq!(truncate_str("aé", 2), "a");
        assert_eq!(truncate_str("aé", 3), "aé");
    }

    #[test]
    fn zero_budget() {
        assert_eq!(truncate_str("abc", 0), "");
    }

    #[test]
    fn preview_marks_truncation() {
        assert_eq!(preview("{\"job\":1}", 4), "{\"jo…");
        assert_eq!(preview("{}", 4), "{}");
    }
}
