//! Orientation templates.
//!
//! `core` and `kinetiq` ship compiled in; an optional template directory
//! lets operators override them or add new names. Loads are cached after
//! the first read. Template text uses `{placeholder}` markers — see
//! [`render`] for the substitution rules.

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::RwLock;

use spark_domain::error::{Error, Result};

const CORE_TEMPLATE: &str = include_str!("../orientations/core.md");
const KINETIQ_TEMPLATE: &str = include_str!("../orientations/kinetiq.md");

pub const DEFAULT_TEMPLATE: &str = "core";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TemplateStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TemplateStore {
    dir: Option<PathBuf>,
    cache: RwLock<HashMap<String, String>>,
}

impl TemplateStore {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Load a template by name. Unknown names fall back to `core`.
    pub fn load(&self, name: &str) -> String {
        if !valid_name(name) {
            tracing::warn!(template = %name, "invalid template name, using core");
            return self.load(DEFAULT_TEMPLATE);
        }

        if let Some(cached) = self.cache.read().get(name) {
            return cached.clone();
        }

        let content = self.read_uncached(name);
        self.cache
            .write()
            .insert(name.to_string(), content.clone());
        content
    }

    fn read_uncached(&self, name: &str) -> String {
        if let Some(dir) = &self.dir {
            let path = dir.join(format!("{name}.md"));
            match std::fs::read_to_string(&path) {
                Ok(content) => return content,
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                    tracing::warn!(path = %path.display(), error = %e, "template read failed");
                }
                Err(_) => {}
            }
        }

        match name {
            "core" => CORE_TEMPLATE.to_string(),
            "kinetiq" => KINETIQ_TEMPLATE.to_string(),
            other => {
                tracing::warn!(template = %other, "unknown orientation template, using core");
                self.load(DEFAULT_TEMPLATE)
            }
        }
    }

    /// Drop all cached templates (tests, hot reload).
    pub fn clear_cache(&self) {
        self.cache.write().clear();
    }
}

/// Template names map to file names; keep them boring.
fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Placeholder rendering
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Substitute `{placeholder}` markers.
///
/// - A known placeholder is replaced with its value.
/// - An unknown placeholder resolves to the empty string.
/// - A malformed marker (unclosed `{`, empty or non-identifier body,
///   stray `}`) is an error — tenant overrides contain arbitrary text,
///   and the caller falls back to the default template on error.
pub fn render(template: &str, vars: &HashMap<&str, String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        match c {
            '{' => {
                let rest = &template[idx + 1..];
                let Some(end) = rest.find('}') else {
                    return Err(Error::Template(format!(
                        "unclosed placeholder at byte {idx}"
                    )));
                };
                let name = &rest[..end];
                if !is_identifier(name) {
                    return Err(Error::Template(format!("invalid placeholder '{{{name}}}'")));
                }
                if let Some(value) = vars.get(name) {
                    out.push_str(value);
                }
                // Skip the name and the closing brace.
                for _ in 0..=end {
                    chars.next();
                }
            }
            '}' => {
                return Err(Error::Template(format!("stray '}}' at byte {idx}")));
            }
            c => out.push(c),
        }
    }

    Ok(out)
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&'static str, &str)]) -> HashMap<&'static str, String> {
        pairs.iter().map(|(k, v)| (*k, v.to_string())).collect()
    }

    #[test]
    fn render_substitutes_known_placeholders() {
        let out = render("Hello {name}!", &vars(&[("name", "World")])).unwrap();
        assert_eq!(out, "Hello World!");
    }

    #[test]
    fn render_unknown_placeholder_becomes_empty() {
        let out = render("a{missing}b", &vars(&[])).unwrap();
        assert_eq!(out, "ab");
    }

    #[test]
    fn render_round_trips_without_placeholders() {
        let text = "no markers here, just prose.";
        assert_eq!(render(text, &vars(&[])).unwrap(), text);
    }

    #[test]
    fn render_rejects_unclosed_brace() {
        assert!(render("oops {name", &vars(&[])).is_err());
    }

    #[test]
    fn render_rejects_stray_closing_brace() {
        assert!(render("oops } here", &vars(&[])).is_err());
    }

    #[test]
    fn render_rejects_non_identifier_body() {
        assert!(render("{not a name}", &vars(&[])).is_err());
        assert!(render("{}", &vars(&[])).is_err());
    }

    #[test]
    fn builtin_core_template_renders() {
        let store = TemplateStore::new(None);
        let template = store.load("core");
        let out = render(
            &template,
            &vars(&[("company_name", "Acme"), ("timestamp", "now")]),
        )
        .unwrap();
        assert!(out.contains("Acme"));
        assert!(!out.contains('{'));
    }

    #[test]
    fn unknown_template_falls_back_to_core() {
        let store = TemplateStore::new(None);
        assert_eq!(store.load("nope"), store.load("core"));
    }

    #[test]
    fn invalid_template_name_falls_back_to_core() {
        let store = TemplateStore::new(None);
        assert_eq!(store.load("../etc/passwd"), store.load("core"));
    }

    #[test]
    fn disk_templates_override_builtins_and_cache() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("core.md"), "custom {x}").unwrap();

        let store = TemplateStore::new(Some(dir.path().to_path_buf()));
        assert_eq!(store.load("core"), "custom {x}");

        // Cached: deleting the file doesn't change the loaded content.
        std::fs::remove_file(dir.path().join("core.md")).unwrap();
        assert_eq!(store.load("core"), "custom {x}");

        store.clear_cache();
        assert!(store.load("core").contains("Who you are"));
    }
}
