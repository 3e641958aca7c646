//! OpenAI-compatible chat adapter.
//!
//! Covers every upstream we talk to — Groq, Moonshot, OpenAI, and the
//! Gemini OpenAI-compatibility endpoint — differing only in base URL
//! and credentials.

use serde::Deserialize;

use spark_domain::error::{Error, Result};
use spark_domain::stream::BoxStream;

use crate::sse::sse_response_stream;
use crate::traits::{ChatProvider, ChatRequest, StreamEvent};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatProvider {
    provider_id: String,
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(provider_id: impl Into<String>, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            http: reqwest::Client::new(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn request_body(&self, req: &ChatRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": req.model,
            "messages": req.messages,
            "temperature": req.temperature,
            "stream": stream,
        });
        if let Some(max_tokens) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if req.json_mode {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }
        body
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let resp = self
            .http
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(e.to_string())
                } else {
                    Error::Http(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Provider {
                provider: self.provider_id.clone(),
                message: format!("HTTP {status}: {text}"),
            });
        }
        Ok(resp)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Parse one SSE `data:` payload into stream events.
fn parse_stream_data(provider_id: &str, data: &str) -> Vec<Result<StreamEvent>> {
    if data == "[DONE]" {
        return vec![Ok(StreamEvent::Done)];
    }

    let chunk: StreamChunk = match serde_json::from_str(data) {
        Ok(c) => c,
        Err(e) => {
            return vec![Err(Error::Provider {
                provider: provider_id.to_string(),
                message: format!("bad stream chunk: {e}"),
            })]
        }
    };

    let mut events = Vec::new();
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                events.push(Ok(StreamEvent::Delta(content)));
            }
        }
        if choice.finish_reason.is_some() {
            events.push(Ok(StreamEvent::Done));
        }
    }
    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ChatProvider implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ChatProvider for OpenAiCompatProvider {
    async fn complete(&self, req: &ChatRequest) -> Result<String> {
        let body = self.request_body(req, false);
        let resp = self.post(&body).await?;

        let parsed: CompletionResponse = resp.json().await.map_err(|e| Error::Provider {
            provider: self.provider_id.clone(),
            message: format!("bad completion response: {e}"),
        })?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    async fn stream(&self, req: &ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let body = self.request_body(req, true);
        let resp = self.post(&body).await?;

        let provider_id = self.provider_id.clone();
        Ok(sse_response_stream(resp, move |data| {
            parse_stream_data(&provider_id, data)
        }))
    }

    fn provider_id(&self) -> &str {
        &self.provider_id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ChatMessage;

    fn provider() -> OpenAiCompatProvider {
        OpenAiCompatProvider::new("groq", "https://api.groq.com/openai/v1/", "k")
    }

    #[test]
    fn completions_url_strips_trailing_slash() {
        assert_eq!(
            provider().completions_url(),
            "https://api.groq.com/openai/v1/chat/completions"
        );
    }

    #[test]
    fn body_includes_json_mode_only_when_set() {
        let p = provider();
        let mut req = ChatRequest {
            messages: vec![ChatMessage::user("hi")],
            model: "llama-3.1-8b-instant".into(),
            temperature: 0.0,
            max_tokens: Some(200),
            json_mode: true,
        };
        let body = p.request_body(&req, false);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["max_tokens"], 200);
        assert_eq!(body["stream"], false);

        req.json_mode = false;
        req.max_tokens = None;
        let body = p.request_body(&req, true);
        assert!(body.get("response_format").is_none());
        assert!(body.get("max_tokens").is_none());
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn parse_stream_data_extracts_deltas() {
        let data = r#"{"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#;
        let events = parse_stream_data("groq", data);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::Delta(s) if s == "Hel"
        ));
    }

    #[test]
    fn parse_stream_data_done_sentinel() {
        let events = parse_stream_data("groq", "[DONE]");
        assert!(matches!(events[0].as_ref().unwrap(), StreamEvent::Done));
    }

    #[test]
    fn parse_stream_data_finish_reason_yields_done() {
        let data = r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        let events = parse_stream_data("groq", data);
        assert!(matches!(events[0].as_ref().unwrap(), StreamEvent::Done));
    }

    #[test]
    fn parse_stream_data_bad_json_is_an_error() {
        let events = parse_stream_data("groq", "{not json");
        assert!(events[0].is_err());
    }
}
