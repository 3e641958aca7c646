use serde::{Deserialize, Serialize};

use spark_domain::error::Result;
use spark_domain::stream::BoxStream;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One chat message on the wire. Roles are the OpenAI-compatible
/// strings: `system`, `user`, `assistant`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// Bare model name (the `provider/` prefix is stripped by the router).
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Ask the model for a JSON object response.
    pub json_mode: bool,
}

/// Events on a provider completion stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A text delta.
    Delta(String),
    /// The stream is complete.
    Done,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One upstream chat-completion endpoint.
#[async_trait::async_trait]
pub trait ChatProvider: Send + Sync {
    /// Send a request and wait for the full response text.
    async fn complete(&self, req: &ChatRequest) -> Result<String>;

    /// Send a request and stream back events.
    async fn stream(&self, req: &ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>>;

    /// The identifier this provider is registered under (`groq`, ...).
    fn provider_id(&self) -> &str;
}
