use std::sync::Arc;

use spark_domain::config::SparkConfig;
use spark_providers::{Embedder, LlmClient};
use spark_settling::TemplateStore;
use spark_store::SparkStore;

use crate::api::jwks::JwksCache;
use crate::runtime::rate_limit::RateLimiter;

/// Which preflight dispatch the orchestrator runs.
///
/// `Signals` (default) lets boundary signals flow into the prompt;
/// `Gate` is the legacy hard-deflection behavior, retained for rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreflightMode {
    Signals,
    Gate,
}

impl PreflightMode {
    /// Read `SPARK_PREFLIGHT_MODE` once at startup.
    pub fn from_env() -> Self {
        match std::env::var("SPARK_PREFLIGHT_MODE").as_deref() {
            Ok("gate") => PreflightMode::Gate,
            _ => PreflightMode::Signals,
        }
    }
}

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SparkConfig>,
    pub store: Arc<dyn SparkStore>,
    pub llm: Arc<LlmClient>,
    pub embeddings: Arc<dyn Embedder>,
    pub templates: Arc<TemplateStore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub jwks: Arc<JwksCache>,
    pub preflight_mode: PreflightMode,
}
