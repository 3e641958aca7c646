use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SparkConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub spark: BehaviorConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    /// Optional on-disk orientation template directory. Templates named
    /// `<name>.md` here override the compiled-in defaults.
    #[serde(default)]
    pub orientations_dir: Option<PathBuf>,
}

impl SparkConfig {
    /// Load config from a TOML file (missing file = all defaults), then
    /// apply environment-variable overrides for secrets.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config: SparkConfig = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p)?;
                toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", p.display())))?
            }
            Some(p) => {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    p.display()
                )))
            }
            None => SparkConfig::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Overlay secrets from the environment. Env always wins so deploys
    /// never need secrets in the config file.
    pub fn apply_env(&mut self) {
        fn env(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.is_empty())
        }

        if let Some(v) = env("SUPABASE_URL") {
            self.store.supabase_url = v;
        }
        if let Some(v) = env("SUPABASE_SERVICE_KEY") {
            self.store.supabase_service_key = v;
        }
        if let Some(v) = env("GOOGLE_AI_API_KEY") {
            self.llm.google_ai_api_key = v;
        }
        if let Some(v) = env("MOONSHOT_API_KEY") {
            self.llm.moonshot_api_key = Some(v);
        }
        if let Some(v) = env("GROQ_API_KEY") {
            self.llm.groq_api_key = Some(v);
        }
        if let Some(v) = env("OPENAI_API_KEY") {
            self.llm.openai_api_key = v;
        }
    }

    /// Validate the config, returning a list of issues. Errors should
    /// abort startup; warnings are logged and tolerated.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.store.supabase_url.is_empty() {
            issues.push(ConfigIssue::error("store.supabase_url is not set"));
        }
        if self.store.supabase_service_key.is_empty() {
            issues.push(ConfigIssue::error("store.supabase_service_key is not set"));
        }
        if self.llm.google_ai_api_key.is_empty() {
            issues.push(ConfigIssue::error("llm.google_ai_api_key is not set"));
        }
        if self.llm.openai_api_key.is_empty() {
            issues.push(ConfigIssue::error(
                "llm.openai_api_key is not set (embeddings will fail)",
            ));
        }
        if self.llm.groq_api_key.is_none() {
            issues.push(ConfigIssue::warning(
                "llm.groq_api_key is not set — preflight classification will fail open",
            ));
        }
        if self.llm.moonshot_api_key.is_none() {
            issues.push(ConfigIssue::warning(
                "llm.moonshot_api_key is not set — no fallback model for chat",
            ));
        }
        if self.spark.max_turns_default == 0 {
            issues.push(ConfigIssue::error("spark.max_turns_default must be > 0"));
        }
        if self.spark.rate_limit_rpm == 0 {
            issues.push(ConfigIssue::error("spark.rate_limit_rpm must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.spark.doc_match_threshold) {
            issues.push(ConfigIssue::error(
                "spark.doc_match_threshold must be in [0, 1]",
            ));
        }
        if self.admin.cors_origins.is_empty() {
            issues.push(ConfigIssue::warning(
                "admin.cors_origins is empty — admin portal requests will be blocked by CORS",
            ));
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config issues
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl ConfigIssue {
    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_8000")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: 8000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Persistent store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub supabase_url: String,
    #[serde(default)]
    pub supabase_service_key: String,
    #[serde(default = "d_10000")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_service_key: String::new(),
            timeout_ms: 10_000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM + embeddings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub google_ai_api_key: String,
    #[serde(default)]
    pub moonshot_api_key: Option<String>,
    #[serde(default)]
    pub groq_api_key: Option<String>,
    #[serde(default)]
    pub openai_api_key: String,

    /// Model ids are `provider/model` — the prefix selects credentials
    /// and endpoint.
    #[serde(default = "d_primary_model")]
    pub spark_primary_model: String,
    #[serde(default = "d_fallback_model")]
    pub spark_fallback_model: String,
    #[serde(default = "d_preflight_model")]
    pub spark_preflight_model: String,

    #[serde(default = "d_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "d_2000")]
    pub embedding_dimensions: u32,

    /// Base-URL overrides per provider id (testing / proxies).
    #[serde(default)]
    pub endpoint_overrides: HashMap<String, String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            google_ai_api_key: String::new(),
            moonshot_api_key: None,
            groq_api_key: None,
            openai_api_key: String::new(),
            spark_primary_model: d_primary_model(),
            spark_fallback_model: d_fallback_model(),
            spark_preflight_model: d_preflight_model(),
            embedding_model: d_embedding_model(),
            embedding_dimensions: 2000,
            endpoint_overrides: HashMap::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Spark behavior knobs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorConfig {
    #[serde(default = "d_20")]
    pub max_turns_default: u32,
    #[serde(default = "d_3")]
    pub wind_down_turns: u32,
    #[serde(default = "d_5")]
    pub min_turns_before_winddown: u32,
    #[serde(default = "d_8")]
    pub context_turns: u32,
    #[serde(default = "d_30")]
    pub rate_limit_rpm: u32,
    #[serde(default = "d_5")]
    pub max_doc_chunks: u32,
    #[serde(default = "d_threshold")]
    pub doc_match_threshold: f32,
    #[serde(default = "d_30")]
    pub session_timeout_minutes: u32,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            max_turns_default: 20,
            wind_down_turns: 3,
            min_turns_before_winddown: 5,
            context_turns: 8,
            rate_limit_rpm: 30,
            max_doc_chunks: 5,
            doc_match_threshold: 0.3,
            session_timeout_minutes: 30,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Admin portal
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Exact origins allowed on the admin surface (credentials on).
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default = "d_60")]
    pub rate_limit_rpm: u32,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            cors_origins: Vec::new(),
            rate_limit_rpm: 60,
        }
    }
}

// ── serde default helpers ──────────────────────────────────────────

fn d_host() -> String {
    "0.0.0.0".into()
}
fn d_8000() -> u16 {
    8000
}
fn d_10000() -> u64 {
    10_000
}
fn d_2000() -> u32 {
    2000
}
fn d_3() -> u32 {
    3
}
fn d_5() -> u32 {
    5
}
fn d_8() -> u32 {
    8
}
fn d_20() -> u32 {
    20
}
fn d_30() -> u32 {
    30
}
fn d_60() -> u32 {
    60
}
fn d_threshold() -> f32 {
    0.3
}
fn d_primary_model() -> String {
    "google/gemini-3-flash-preview".into()
}
fn d_fallback_model() -> String {
    "moonshot/kimi-k2.5".into()
}
fn d_preflight_model() -> String {
    "groq/llama-3.1-8b-instant".into()
}
fn d_embedding_model() -> String {
    "text-embedding-3-large".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = SparkConfig::default();
        assert_eq!(cfg.spark.max_turns_default, 20);
        assert_eq!(cfg.spark.wind_down_turns, 3);
        assert_eq!(cfg.spark.min_turns_before_winddown, 5);
        assert_eq!(cfg.spark.context_turns, 8);
        assert_eq!(cfg.spark.rate_limit_rpm, 30);
        assert_eq!(cfg.spark.max_doc_chunks, 5);
        assert_eq!(cfg.spark.session_timeout_minutes, 30);
        assert_eq!(cfg.llm.embedding_dimensions, 2000);
        assert_eq!(cfg.server.port, 8000);
    }

    #[test]
    fn empty_toml_parses_to_defaults() {
        let cfg: SparkConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.spark.max_turns_default, 20);
        assert!(cfg.store.supabase_url.is_empty());
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let cfg: SparkConfig = toml::from_str(
            r#"
            [spark]
            max_turns_default = 10

            [server]
            port = 9000
            "#,
        )
        .unwrap();
        assert_eq!(cfg.spark.max_turns_default, 10);
        assert_eq!(cfg.spark.wind_down_turns, 3);
        assert_eq!(cfg.server.port, 9000);
    }

    #[test]
    fn validate_flags_missing_secrets() {
        let cfg = SparkConfig::default();
        let issues = cfg.validate();
        let errors: Vec<_> = issues
            .iter()
            .filter(|i| i.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.iter().any(|i| i.message.contains("supabase_url")));
        assert!(errors
            .iter()
            .any(|i| i.message.contains("google_ai_api_key")));
    }

    #[test]
    fn validate_rejects_out_of_range_threshold() {
        let mut cfg = SparkConfig::default();
        cfg.spark.doc_match_threshold = 1.5;
        assert!(cfg
            .validate()
            .iter()
            .any(|i| i.message.contains("doc_match_threshold")));
    }
}
