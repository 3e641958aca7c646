//! Text embeddings via the OpenAI embeddings endpoint.
//!
//! The vector dimension is fixed per deployment (default 2000) and must
//! match the store's vector columns.

use serde::Deserialize;

use spark_domain::config::LlmConfig;
use spark_domain::error::{Error, Result};

/// Anything that can turn text into vectors. The gateway depends on
/// this trait so retrieval and ingestion can be exercised without a
/// network.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

pub struct EmbeddingsClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: u32,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

impl EmbeddingsClient {
    pub fn from_config(cfg: &LlmConfig) -> Self {
        let base_url = cfg
            .endpoint_overrides
            .get("openai")
            .cloned()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key: cfg.openai_api_key.clone(),
            model: cfg.embedding_model.clone(),
            dimensions: cfg.embedding_dimensions,
        }
    }

    pub fn dimensions(&self) -> u32 {
        self.dimensions
    }

    /// Embed a single text.
    pub async fn create_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let mut batch = self.create_embeddings_batch(std::slice::from_ref(&text)).await?;
        batch
            .pop()
            .ok_or_else(|| Error::Provider {
                provider: "openai".into(),
                message: "embeddings response was empty".into(),
            })
    }

    /// Embed a batch of texts, returned in input order.
    pub async fn create_embeddings_batch<S: AsRef<str>>(
        &self,
        texts: &[S],
    ) -> Result<Vec<Vec<f32>>> {
        let inputs: Vec<&str> = texts.iter().map(|t| t.as_ref()).collect();
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "input": inputs,
                "dimensions": self.dimensions,
            }))
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
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Provider {
                provider: "openai".into(),
                message: format!("embeddings HTTP {status}: {body}"),
            });
        }

        let mut parsed: EmbeddingsResponse = resp.json().await.map_err(|e| Error::Provider {
            provider: "openai".into(),
            message: format!("bad embeddings response: {e}"),
        })?;

        // The API may return rows out of order; the index field is canonical.
        parsed.data.sort_by_key(|row| row.index);
        Ok(parsed.data.into_iter().map(|row| row.embedding).collect())
    }
}

#[async_trait::async_trait]
impl Embedder for EmbeddingsClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.create_embedding(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.create_embeddings_batch(texts).await
    }
}
