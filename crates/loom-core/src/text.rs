//! Text helpers shared by previews, dedup keys, and log fields.

/// Truncate `s` to at most `max_chars` characters, appending `…` when cut.
///
/// Never splits a UTF-8 code point.
#[must_use]
pub fn truncate_preview(s: &str, max_chars: usize) -> String {
    let mut chars = s.char_indices();
    match chars.nth(max_chars) {
        None => s.to_owned(),
        Some((idx, _)) => {
            let mut out = s[..idx].trim_end().to_owned();
            out.push('…');
            out
        }
    }
}

/// Collapse every run of whitespace into a single space and trim the ends.
#[must_use]
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
