//! Model routing and fallback.
//!
//! Model identifiers are opaque `provider/model` strings. The provider
//! prefix selects the adapter (and thereby credentials + endpoint); the
//! remainder is passed through on the wire.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use spark_domain::config::LlmConfig;
use spark_domain::error::{Error, Result};
use spark_domain::stream::BoxStream;

use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::{ChatMessage, ChatProvider, ChatRequest, StreamEvent};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Options
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct CompletionOpts {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub json_mode: bool,
    pub timeout: Duration,
}

impl Default for CompletionOpts {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            max_tokens: None,
            json_mode: false,
            timeout: Duration::from_secs(30),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LlmClient
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct LlmClient {
    providers: HashMap<String, Arc<dyn ChatProvider>>,
    primary_model: String,
    fallback_model: String,
}

impl LlmClient {
    /// Build the client from config: one OpenAI-compatible adapter per
    /// configured credential.
    pub fn from_config(cfg: &LlmConfig) -> Self {
        let mut providers: HashMap<String, Arc<dyn ChatProvider>> = HashMap::new();

        let base = |id: &str, default: &str| -> String {
            cfg.endpoint_overrides
                .get(id)
                .cloned()
                .unwrap_or_else(|| default.to_string())
        };

        if !cfg.google_ai_api_key.is_empty() {
            providers.insert(
                "google".into(),
                Arc::new(OpenAiCompatProvider::new(
                    "google",
                    base(
                        "google",
                        "https://generativelanguage.googleapis.com/v1beta/openai",
                    ),
                    cfg.google_ai_api_key.clone(),
                )),
            );
        }
        if let Some(key) = cfg.moonshot_api_key.as_ref().filter(|k| !k.is_empty()) {
            providers.insert(
                "moonshot".into(),
                Arc::new(OpenAiCompatProvider::new(
                    "moonshot",
                    base("moonshot", "https://api.moonshot.ai/v1"),
                    key.clone(),
                )),
            );
        }
        if let Some(key) = cfg.groq_api_key.as_ref().filter(|k| !k.is_empty()) {
            providers.insert(
                "groq".into(),
                Arc::new(OpenAiCompatProvider::new(
                    "groq",
                    base("groq", "https://api.groq.com/openai/v1"),
                    key.clone(),
                )),
            );
        }
        if !cfg.openai_api_key.is_empty() {
            providers.insert(
                "openai".into(),
                Arc::new(OpenAiCompatProvider::new(
                    "openai",
                    base("openai", "https://api.openai.com/v1"),
                    cfg.openai_api_key.clone(),
                )),
            );
        }

        Self {
            providers,
            primary_model: cfg.spark_primary_model.clone(),
            fallback_model: cfg.spark_fallback_model.clone(),
        }
    }

    /// Build from explicit providers (tests).
    pub fn new(
        providers: HashMap<String, Arc<dyn ChatProvider>>,
        primary_model: impl Into<String>,
        fallback_model: impl Into<String>,
    ) -> Self {
        Self {
            providers,
            primary_model: primary_model.into(),
            fallback_model: fallback_model.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// The fallback chain is configured for the primary chat model only.
    fn fallback_for(&self, model: &str) -> Option<&str> {
        (model == self.primary_model && !self.fallback_model.is_empty())
            .then_some(self.fallback_model.as_str())
    }

    fn resolve(&self, model: &str) -> Result<(Arc<dyn ChatProvider>, ChatRequest)> {
        let (provider_id, model_name) = resolve_model(model);
        let provider = self
            .providers
            .get(provider_id)
            .cloned()
            .ok_or_else(|| Error::Config(format!("no provider configured for '{provider_id}'")))?;
        let req = ChatRequest {
            model: model_name.to_string(),
            ..Default::default()
        };
        Ok((provider, req))
    }

    // ── complete ─────────────────────────────────────────────────────

    /// Non-streaming completion. On any failure of the primary chat
    /// model, the fallback model is tried once with the same inputs.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
        opts: &CompletionOpts,
    ) -> Result<String> {
        match self.try_complete(messages, model, opts).await {
            Ok(text) => Ok(text),
            Err(e) => {
                let Some(fallback) = self.fallback_for(model) else {
                    return Err(e);
                };
                tracing::warn!(model, fallback, error = %e, "completion failed, falling back");
                self.try_complete(messages, fallback, opts).await
            }
        }
    }

    async fn try_complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
        opts: &CompletionOpts,
    ) -> Result<String> {
        let (provider, mut req) = self.resolve(model)?;
        req.messages = messages.to_vec();
        req.temperature = opts.temperature;
        req.max_tokens = opts.max_tokens;
        req.json_mode = opts.json_mode;

        match tokio::time::timeout(opts.timeout, provider.complete(&req)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "completion on '{model}' timed out after {:?}",
                opts.timeout
            ))),
        }
    }

    // ── stream ───────────────────────────────────────────────────────

    /// Streaming completion yielding text deltas.
    ///
    /// Fallback downgrades to non-streaming: one `complete()` call on
    /// the fallback model, yielded as a single delta. A failure after
    /// the fallback propagates as an `Err` item.
    pub async fn stream(
        &self,
        messages: &[ChatMessage],
        model: &str,
        opts: &CompletionOpts,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let (provider, mut req) = self.resolve(model)?;
        req.messages = messages.to_vec();
        req.temperature = opts.temperature;
        req.max_tokens = opts.max_tokens;

        // Fallback plan resolved up front so the stream owns everything.
        let fallback_plan = match self.fallback_for(model) {
            Some(fb_model) => match self.resolve(fb_model) {
                Ok((fb_provider, mut fb_req)) => {
                    fb_req.messages = messages.to_vec();
                    fb_req.temperature = opts.temperature;
                    fb_req.max_tokens = opts.max_tokens;
                    Some((fb_provider, fb_req))
                }
                Err(_) => None,
            },
            None => None,
        };

        let upstream = match tokio::time::timeout(opts.timeout, provider.stream(&req)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Timeout(format!(
                "stream on '{model}' timed out after {:?}",
                opts.timeout
            ))),
        };

        let model = model.to_string();
        let timeout = opts.timeout;

        let upstream = match upstream {
            Ok(stream) => stream,
            Err(e) => {
                // Could not even open the stream — go straight to fallback.
                let Some((fb_provider, fb_req)) = fallback_plan else {
                    return Err(e);
                };
                tracing::warn!(model = %model, error = %e, "stream failed, falling back to complete()");
                let text =
                    match tokio::time::timeout(timeout, fb_provider.complete(&fb_req)).await {
                        Ok(result) => result?,
                        Err(_) => {
                            return Err(Error::Timeout(format!(
                                "fallback completion timed out after {timeout:?}"
                            )))
                        }
                    };
                return Ok(Box::pin(async_stream::stream! { yield Ok(text); }));
            }
        };

        let stream = async_stream::stream! {
            let mut upstream = upstream;
            let mut fallback_plan = fallback_plan;

            use futures_util::StreamExt;
            while let Some(event) = upstream.next().await {
                match event {
                    Ok(StreamEvent::Delta(text)) => yield Ok(text),
                    Ok(StreamEvent::Done) => break,
                    Err(e) => {
                        match fallback_plan.take() {
                            Some((fb_provider, fb_req)) => {
                                tracing::warn!(
                                    model = %model,
                                    error = %e,
                                    "stream failed mid-flight, falling back to complete()"
                                );
                                match tokio::time::timeout(
                                    timeout,
                                    fb_provider.complete(&fb_req),
                                )
                                .await
                                {
                                    Ok(Ok(text)) => yield Ok(text),
                                    Ok(Err(fb_err)) => yield Err(fb_err),
                                    Err(_) => {
                                        yield Err(Error::Timeout(format!(
                                            "fallback completion timed out after {timeout:?}"
                                        )))
                                    }
                                }
                            }
                            None => yield Err(e),
                        }
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Split a `"provider/model"` string into its two components. Without a
/// `/`, the whole string is the provider id and the model name is empty.
pub fn resolve_model(model: &str) -> (&str, &str) {
    match model.split_once('/') {
        Some((provider, model)) => (provider, model),
        None => (model, ""),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn resolve_model_splits_on_first_slash() {
        assert_eq!(
            resolve_model("google/gemini-3-flash-preview"),
            ("google", "gemini-3-flash-preview")
        );
        assert_eq!(resolve_model("groq/a/b"), ("groq", "a/b"));
        assert_eq!(resolve_model("nomodel"), ("nomodel", ""));
    }

    /// A scripted provider: fails N times, then succeeds.
    struct FlakyProvider {
        id: String,
        failures: AtomicU32,
        response: String,
        calls: AtomicU32,
    }

    impl FlakyProvider {
        fn new(id: &str, failures: u32, response: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.into(),
                failures: AtomicU32::new(failures),
                response: response.into(),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl ChatProvider for FlakyProvider {
        async fn complete(&self, _req: &ChatRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::Provider {
                    provider: self.id.clone(),
                    message: "HTTP 503".into(),
                });
            }
            Ok(self.response.clone())
        }

        async fn stream(
            &self,
            req: &ChatRequest,
        ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::Provider {
                    provider: self.id.clone(),
                    message: "HTTP 503".into(),
                });
            }
            let _ = req;
            let text = self.response.clone();
            Ok(Box::pin(async_stream::stream! {
                for word in text.split_whitespace() {
                    yield Ok(StreamEvent::Delta(format!("{word} ")));
                }
                yield Ok(StreamEvent::Done);
            }))
        }

        fn provider_id(&self) -> &str {
            &self.id
        }
    }

    fn client_with(
        primary_fails: u32,
        fallback_fails: u32,
    ) -> (LlmClient, Arc<FlakyProvider>, Arc<FlakyProvider>) {
        let primary = FlakyProvider::new("google", primary_fails, "primary answer");
        let fallback = FlakyProvider::new("moonshot", fallback_fails, "fallback answer");
        let mut providers: HashMap<String, Arc<dyn ChatProvider>> = HashMap::new();
        providers.insert("google".into(), primary.clone());
        providers.insert("moonshot".into(), fallback.clone());
        let client = LlmClient::new(providers, "google/gemini", "moonshot/kimi");
        (client, primary, fallback)
    }

    #[tokio::test]
    async fn complete_uses_primary_when_healthy() {
        let (client, primary, fallback) = client_with(0, 0);
        let text = client
            .complete(
                &[ChatMessage::user("hi")],
                "google/gemini",
                &CompletionOpts::default(),
            )
            .await
            .unwrap();
        assert_eq!(text, "primary answer");
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn complete_falls_back_once_on_primary_failure() {
        let (client, _, fallback) = client_with(1, 0);
        let text = client
            .complete(
                &[ChatMessage::user("hi")],
                "google/gemini",
                &CompletionOpts::default(),
            )
            .await
            .unwrap();
        assert_eq!(text, "fallback answer");
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn complete_propagates_when_fallback_also_fails() {
        let (client, _, _) = client_with(1, 1);
        let err = client
            .complete(
                &[ChatMessage::user("hi")],
                "google/gemini",
                &CompletionOpts::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));
    }

    #[tokio::test]
    async fn non_primary_model_has_no_fallback() {
        let (client, _, fallback) = client_with(1, 0);
        // The preflight model is routed directly — never through fallback.
        let err = client
            .complete(
                &[ChatMessage::user("hi")],
                "google/other-model",
                &CompletionOpts::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stream_yields_deltas() {
        let (client, _, _) = client_with(0, 0);
        let stream = client
            .stream(
                &[ChatMessage::user("hi")],
                "google/gemini",
                &CompletionOpts::default(),
            )
            .await
            .unwrap();
        let parts: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(parts.join(""), "primary answer ");
    }

    #[tokio::test]
    async fn stream_fallback_degrades_to_single_delta() {
        let (client, _, fallback) = client_with(1, 0);
        let stream = client
            .stream(
                &[ChatMessage::user("hi")],
                "google/gemini",
                &CompletionOpts::default(),
            )
            .await
            .unwrap();
        let parts: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(parts, vec!["fallback answer".to_string()]);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stream_with_failed_fallback_errors() {
        let (client, _, _) = client_with(1, 1);
        let result = client
            .stream(
                &[ChatMessage::user("hi")],
                "google/gemini",
                &CompletionOpts::default(),
            )
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn from_config_registers_only_configured_providers() {
        let cfg = LlmConfig {
            google_ai_api_key: "g".into(),
            openai_api_key: "o".into(),
            ..Default::default()
        };
        let client = LlmClient::from_config(&cfg);
        assert!(client.providers.contains_key("google"));
        assert!(client.providers.contains_key("openai"));
        assert!(!client.providers.contains_key("groq"));
        assert!(!client.providers.contains_key("moonshot"));
    }
}
