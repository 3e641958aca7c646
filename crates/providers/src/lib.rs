//! LLM access for Spark.
//!
//! A [`ChatProvider`] is one upstream endpoint (OpenAI-compatible wire
//! format). [`LlmClient`] routes `provider/model` identifiers to the
//! right adapter and applies the fallback policy: the primary chat model
//! falls back once to the configured secondary; the preflight classifier
//! model never falls back (it is already the cheap tier — failing open
//! beats thrashing).

pub mod client;
pub mod embeddings;
pub mod openai_compat;
pub mod sse;
pub mod traits;

pub use client::{resolve_model, CompletionOpts, LlmClient};
pub use embeddings::{Embedder, EmbeddingsClient};
pub use traits::{ChatMessage, ChatProvider, ChatRequest, StreamEvent};
