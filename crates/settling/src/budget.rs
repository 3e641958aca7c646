//! Token-budget trimming for prompt components.
//!
//! Tokens are approximated as `bytes / 4` — crude, but stable and cheap,
//! and budget enforcement only needs a consistent yardstick. Components
//! carry a priority tier; the trimmer cuts P4 first, then P3, and never
//! touches P1/P2 (logging a warning if they alone exceed the budget).

use std::collections::HashMap;

/// Total system prompt budget, in approximate tokens.
pub const TOKEN_BUDGET: usize = 12_000;

const CHARS_PER_TOKEN: usize = 4;

/// Priority tiers — lower is more protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Never trimmed (orientation body).
    NeverTrim,
    /// Fixed content, never trimmed (custom instructions).
    Fixed,
    /// Reduced only if trimming P4 was not enough.
    Reduce,
    /// First to go (doc context).
    TrimFirst,
}

/// One named prompt component headed into the template.
#[derive(Debug, Clone)]
pub struct Component {
    pub name: &'static str,
    pub priority: Priority,
    pub content: String,
}

impl Component {
    pub fn new(name: &'static str, priority: Priority, content: impl Into<String>) -> Self {
        Self {
            name,
            priority,
            content: content.into(),
        }
    }
}

pub fn estimate_tokens(text: &str) -> usize {
    text.len() / CHARS_PER_TOKEN
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Clean-boundary truncation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Truncate `text` to at most `char_budget` bytes on a clean boundary:
/// the last paragraph break before the cap, else the last sentence
/// terminator, else a hard cut with an ellipsis marker.
pub fn trim_component(text: &str, char_budget: usize) -> String {
    if text.len() <= char_budget {
        return text.to_string();
    }

    let cut = floor_char_boundary(text, char_budget);
    let candidate = &text[..cut];

    // Paragraph boundary first.
    if let Some(idx) = candidate.rfind("\n\n") {
        if idx > 0 {
            return text[..idx].to_string();
        }
    }

    // Sentence boundary: ". ", "? ", "! ", or ".\n".
    let mut best: Option<usize> = None;
    for sentinel in [". ", "? ", "! ", ".\n"] {
        if let Some(idx) = candidate.rfind(sentinel) {
            best = Some(best.map_or(idx, |b: usize| b.max(idx)));
        }
    }
    if let Some(idx) = best {
        if idx > 0 {
            // Keep the sentence-ending character itself.
            return text[..=idx].to_string();
        }
    }

    format!("{candidate}...")
}

/// Largest byte index `<= idx` that is a char boundary of `s`.
fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Budget trimming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fit components to [`TOKEN_BUDGET`].
///
/// For each trimmable component, in tier order: try half its original
/// length, then a quarter, re-checking the total after every step.
/// If P1/P2 alone still exceed the budget, warn and proceed.
pub fn trim_to_budget(components: &[Component]) -> HashMap<&'static str, String> {
    let mut result: HashMap<&'static str, String> = components
        .iter()
        .map(|c| (c.name, c.content.clone()))
        .collect();

    let total = |r: &HashMap<&'static str, String>| -> usize {
        r.values().map(|c| estimate_tokens(c)).sum()
    };

    if total(&result) <= TOKEN_BUDGET {
        return result;
    }

    for tier in [Priority::TrimFirst, Priority::Reduce] {
        for component in components {
            if component.priority != tier || component.content.is_empty() {
                continue;
            }
            for divisor in [2, 4] {
                result.insert(
                    component.name,
                    trim_component(&component.content, component.content.len() / divisor),
                );
                if total(&result) <= TOKEN_BUDGET {
                    return result;
                }
            }
        }
    }

    let final_total = total(&result);
    if final_total > TOKEN_BUDGET {
        tracing::warn!(
            tokens = final_total,
            budget = TOKEN_BUDGET,
            "system prompt exceeds token budget after trimming"
        );
    }

    result
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_is_quarter_of_length() {
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn trim_noop_under_budget() {
        assert_eq!(trim_component("short", 100), "short");
    }

    #[test]
    fn trim_prefers_paragraph_boundary() {
        let text = "First paragraph.\n\nSecond paragraph that runs longer than the cap.";
        let out = trim_component(text, 30);
        assert_eq!(out, "First paragraph.");
    }

    #[test]
    fn trim_falls_back_to_sentence_boundary() {
        let text = "One sentence here. Another sentence that is much longer than the cap allows.";
        let out = trim_component(text, 40);
        assert_eq!(out, "One sentence here.");
    }

    #[test]
    fn trim_hard_cuts_with_ellipsis() {
        let text = "nowhitespaceorboundariesatallinthistext";
        let out = trim_component(text, 10);
        assert_eq!(out, "nowhitespa...");
    }

    #[test]
    fn trim_respects_utf8_boundaries() {
        let text = "éééééééééééééééééééé"; // 2 bytes per char
        let out = trim_component(text, 7);
        assert!(out.ends_with("..."));
        assert!(out.len() <= 10);
    }

    #[test]
    fn under_budget_is_untouched() {
        let components = vec![
            Component::new("orientation", Priority::NeverTrim, "short body"),
            Component::new("doc_context", Priority::TrimFirst, "short docs"),
        ];
        let result = trim_to_budget(&components);
        assert_eq!(result["orientation"], "short body");
        assert_eq!(result["doc_context"], "short docs");
    }

    #[test]
    fn p4_is_trimmed_before_p3() {
        // Orientation small; doc_context huge; one P3 that fits once P4 is halved.
        let doc = "A sentence goes here. ".repeat(3000); // ~66k chars
        let extra = "Extra reducible content. ".repeat(100);
        let components = vec![
            Component::new("orientation", Priority::NeverTrim, "core body"),
            Component::new("extra", Priority::Reduce, extra.clone()),
            Component::new("doc_context", Priority::TrimFirst, doc.clone()),
        ];
        let result = trim_to_budget(&components);
        assert!(result["doc_context"].len() < doc.len());
        // P3 untouched because halving P4 was enough.
        assert_eq!(result["extra"], extra);
    }

    #[test]
    fn p3_trimmed_when_p4_not_enough() {
        let doc = "Doc sentence here. ".repeat(200);
        let extra = "Reducible sentence here. ".repeat(4000); // ~100k chars
        let components = vec![
            Component::new("orientation", Priority::NeverTrim, "core body"),
            Component::new("extra", Priority::Reduce, extra.clone()),
            Component::new("doc_context", Priority::TrimFirst, doc),
        ];
        let result = trim_to_budget(&components);
        assert!(result["extra"].len() < extra.len());
    }

    #[test]
    fn p1_and_p2_survive_even_over_budget() {
        let orientation = "Orientation sentence. ".repeat(3000); // ~66k chars > budget alone
        let custom = "Custom instruction. ".repeat(100);
        let components = vec![
            Component::new("orientation", Priority::NeverTrim, orientation.clone()),
            Component::new("custom_instructions", Priority::Fixed, custom.clone()),
            Component::new("doc_context", Priority::TrimFirst, "docs ".repeat(100)),
        ];
        let result = trim_to_budget(&components);
        assert_eq!(result["orientation"], orientation);
        assert_eq!(result["custom_instructions"], custom);
    }

    #[test]
    fn trimmed_output_fits_budget_when_achievable() {
        let doc = "Sentence in the doc context. ".repeat(2000);
        let components = vec![
            Component::new("orientation", Priority::NeverTrim, "small"),
            Component::new("doc_context", Priority::TrimFirst, doc),
        ];
        let result = trim_to_budget(&components);
        let total: usize = result.values().map(|c| estimate_tokens(c)).sum();
        assert!(total <= TOKEN_BUDGET);
    }
}
