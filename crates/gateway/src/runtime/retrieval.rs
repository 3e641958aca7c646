//! Knowledge retrieval — the R branch of preflight.
//!
//! Embed the visitor's message, then run the knowledge-item and
//! document-chunk vector searches in parallel, merge by similarity, and
//! keep the top k. Degrades to an empty list on any failure: retrieval
//! must never take the turn down with it.

use uuid::Uuid;

use spark_domain::types::RetrievedChunk;
use spark_providers::Embedder;
use spark_store::SparkStore;

pub async fn retrieve(
    store: &dyn SparkStore,
    embeddings: &dyn Embedder,
    client_id: Uuid,
    query: &str,
    k: u32,
    threshold: f32,
) -> Vec<RetrievedChunk> {
    let embedding = match embeddings.embed(query).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(client_id = %client_id, error = %e, "query embedding failed");
            return Vec::new();
        }
    };

    let (knowledge, documents) = tokio::join!(
        store.match_knowledge(client_id, &embedding, k, threshold),
        store.match_documents(client_id, &embedding, k, threshold),
    );

    let knowledge = knowledge.unwrap_or_else(|e| {
        tracing::warn!(client_id = %client_id, error = %e, "knowledge search failed");
        Vec::new()
    });
    let documents = documents.unwrap_or_else(|e| {
        tracing::warn!(client_id = %client_id, error = %e, "document search failed");
        Vec::new()
    });

    let mut merged: Vec<RetrievedChunk> = knowledge.into_iter().chain(documents).collect();
    merged.sort_by(|a, b| {
        let sa = a.similarity.unwrap_or(0.0);
        let sb = b.similarity.unwrap_or(0.0);
        sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
    });
    merged.truncate(k as usize);

    tracing::debug!(
        client_id = %client_id,
        chunks = merged.len(),
        "retrieval complete"
    );
    merged
}
