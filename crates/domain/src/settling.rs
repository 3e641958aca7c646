//! Per-tenant settling config — the typed bag of persona and behavior
//! knobs merged into the system prompt.
//!
//! The admin write path rejects unknown keys ([`validate_settling_patch`]);
//! the read path ignores them so old rows keep deserializing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SettlingConfig
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SettlingConfig {
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub company_description: Option<String>,
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub custom_instructions: Option<String>,
    /// IANA timezone name used to render the prompt timestamp.
    #[serde(default)]
    pub timezone: Option<String>,
    /// Tier → canned deflection text (used by the legacy gate mode).
    #[serde(default)]
    pub jailbreak_responses: HashMap<String, String>,
    #[serde(default)]
    pub lead_capture_prompt: Option<String>,
    #[serde(default)]
    pub escalation_message: Option<String>,
    #[serde(default)]
    pub calendly_link: Option<String>,
    #[serde(default)]
    pub dont_know_response: Option<String>,
    /// Named orientation template; unknown names fall back to `core`.
    #[serde(default)]
    pub orientation_template: Option<String>,
    #[serde(default)]
    pub off_limits_topics: Vec<String>,
    /// CRM wiring (consumed by lead sync, never by the prompt).
    #[serde(default)]
    pub hubspot_api_key: Option<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl SettlingConfig {
    pub fn company_name(&self) -> &str {
        self.company_name.as_deref().unwrap_or("our company")
    }

    pub fn company_description(&self) -> &str {
        self.company_description.as_deref().unwrap_or("")
    }

    pub fn tone(&self) -> &str {
        self.tone.as_deref().unwrap_or("professional but warm")
    }

    pub fn dont_know_response(&self) -> &str {
        self.dont_know_response.as_deref().unwrap_or(
            "I don't have the answer for that. Would you like me to connect you \
             with someone who does?",
        )
    }

    pub fn lead_capture_prompt(&self) -> &str {
        self.lead_capture_prompt.as_deref().unwrap_or(
            "If you'd like to continue this conversation, drop your email and \
             we'll connect you with the right person.",
        )
    }

    pub fn escalation_message(&self) -> &str {
        self.escalation_message
            .as_deref()
            .unwrap_or("I'd recommend talking to one of our team members about this.")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Admin write validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Settling keys accepted on admin writes.
pub const RECOGNIZED_SETTLING_KEYS: &[&str] = &[
    "company_name",
    "company_description",
    "tone",
    "custom_instructions",
    "timezone",
    "jailbreak_responses",
    "lead_capture_prompt",
    "escalation_message",
    "calendly_link",
    "dont_know_response",
    "orientation_template",
    "off_limits_topics",
    "hubspot_api_key",
    "webhook_url",
];

/// Validate an admin settling patch: every top-level key must be
/// recognized. Returns the offending key on failure.
pub fn validate_settling_patch(patch: &serde_json::Value) -> Result<(), String> {
    let obj = patch
        .as_object()
        .ok_or_else(|| "settling_config must be a JSON object".to_string())?;
    for key in obj.keys() {
        if !RECOGNIZED_SETTLING_KEYS.contains(&key.as_str()) {
            return Err(format!("unrecognized settling key: {key}"));
        }
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_keys_are_ignored_on_read() {
        let raw = serde_json::json!({
            "company_name": "Acme",
            "some_future_key": true,
        });
        let cfg: SettlingConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(cfg.company_name(), "Acme");
    }

    #[test]
    fn unknown_keys_are_rejected_on_write() {
        let patch = serde_json::json!({ "company_name": "Acme", "evil": 1 });
        let err = validate_settling_patch(&patch).unwrap_err();
        assert!(err.contains("evil"));
    }

    #[test]
    fn recognized_patch_passes() {
        let patch = serde_json::json!({
            "tone": "playful",
            "off_limits_topics": ["pricing"],
        });
        assert!(validate_settling_patch(&patch).is_ok());
    }

    #[test]
    fn non_object_patch_is_rejected() {
        assert!(validate_settling_patch(&serde_json::json!([1, 2])).is_err());
    }

    #[test]
    fn accessor_defaults() {
        let cfg = SettlingConfig::default();
        assert_eq!(cfg.company_name(), "our company");
        assert_eq!(cfg.tone(), "professional but warm");
        assert!(cfg.lead_capture_prompt().contains("email"));
    }
}
