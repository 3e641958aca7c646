//! Lightweight cleanup of model output before it is persisted.
//!
//! Chat widgets don't want heading markers or triple newlines. Pure
//! string work, no allocations beyond the output.

use std::sync::OnceLock;

use regex::Regex;

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^#{1,3}\s+").expect("static regex"))
}

fn newlines_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("static regex"))
}

fn trailing_ws_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)[ \t]+$").expect("static regex"))
}

/// Normalize an accumulated model response.
///
/// - short outputs (< 500 chars) lose leading heading markers
/// - 3+ consecutive newlines collapse to a blank line
/// - trailing whitespace is stripped per line and overall
pub fn normalize_format(raw: &str) -> String {
    if raw.trim().is_empty() {
        return raw.to_string();
    }

    let mut text = raw.to_string();

    if text.len() < 500 {
        text = heading_re().replace_all(&text, "").into_owned();
    }
    text = newlines_re().replace_all(&text, "\n\n").into_owned();
    text = trailing_ws_re().replace_all(&text, "").into_owned();

    text.trim().to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_headings_in_short_responses() {
        let out = normalize_format("## Pricing\nThree tiers.");
        assert_eq!(out, "Pricing\nThree tiers.");
    }

    #[test]
    fn keeps_headings_in_long_responses() {
        let long = format!("## Section\n{}", "body text ".repeat(60));
        let out = normalize_format(&long);
        assert!(out.starts_with("## Section"));
    }

    #[test]
    fn collapses_triple_newlines() {
        let out = normalize_format("a\n\n\n\nb");
        assert_eq!(out, "a\n\nb");
    }

    #[test]
    fn strips_trailing_whitespace_per_line() {
        let out = normalize_format("line one   \nline two\t\n");
        assert_eq!(out, "line one\nline two");
    }

    #[test]
    fn empty_input_passes_through() {
        assert_eq!(normalize_format(""), "");
        assert_eq!(normalize_format("   "), "   ");
    }

    #[test]
    fn h4_and_deeper_are_left_alone() {
        let out = normalize_format("#### Deep heading\nbody");
        assert_eq!(out, "#### Deep heading\nbody");
    }
}
