//! Admin knowledge-base CRUD.
//!
//! Each item is one row, embedded whole (no chunking) with content
//! capped at 3000 chars. Duplicate content per tenant is a 409 via the
//! store's content-hash constraint. Updates re-embed only when the
//! content actually changed.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use spark_domain::types::KnowledgeItem;
use spark_providers::Embedder;
use spark_store::SparkStore;

use crate::api::admin::guard::authenticate_admin;
use crate::api::error::ApiError;
use crate::state::AppState;

const CONTENT_MAX_CHARS: usize = 3000;

fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

fn validate_content(content: &str) -> Result<(), ApiError> {
    if content.trim().is_empty() {
        return Err(ApiError::Validation("Content must not be empty".into()));
    }
    if content.chars().count() > CONTENT_MAX_CHARS {
        return Err(ApiError::Validation(format!(
            "Content exceeds {CONTENT_MAX_CHARS} characters"
        )));
    }
    Ok(())
}

// ── GET /spark/admin/knowledge ──────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
}

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let client = authenticate_admin(&state, &headers).await?;
    let items = state
        .store
        .list_knowledge(client.id, query.category.as_deref(), query.active)
        .await?;
    Ok(Json(serde_json::json!({ "items": items })))
}

// ── GET /spark/admin/knowledge/stats ────────────────────────────────

pub async fn stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let client = authenticate_admin(&state, &headers).await?;
    let items = state.store.list_knowledge(client.id, None, None).await?;

    let total = items.len();
    let active = items.iter().filter(|i| i.active).count();
    let mut categories: std::collections::HashMap<String, usize> =
        std::collections::HashMap::new();
    for item in &items {
        *categories.entry(item.category.clone()).or_default() += 1;
    }

    Ok(Json(serde_json::json!({
        "total_items": total,
        "active_items": active,
        "categories": categories,
    })))
}

// ── POST /spark/admin/knowledge ─────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct KnowledgeCreate {
    pub title: String,
    pub content: String,
    #[serde(default = "d_category")]
    pub category: String,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "d_true")]
    pub active: bool,
}

fn d_category() -> String {
    "company".into()
}
fn d_true() -> bool {
    true
}

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<KnowledgeCreate>,
) -> Result<Json<KnowledgeItem>, ApiError> {
    let client = authenticate_admin(&state, &headers).await?;
    validate_content(&body.content)?;
    if !(0..=100).contains(&body.priority) {
        return Err(ApiError::Validation("Priority must be in 0..100".into()));
    }

    let embedding = state
        .embeddings
        .embed(&body.content)
        .await
        .map_err(|e| ApiError::Internal(format!("embedding failed: {e}")))?;

    let item = state
        .store
        .insert_knowledge(serde_json::json!({
            "client_id": client.id,
            "title": body.title,
            "content": body.content,
            "category": body.category,
            "subcategory": body.subcategory,
            "priority": body.priority,
            "active": body.active,
            "embedding": embedding,
            "embedding_model": state.config.llm.embedding_model,
            "content_hash": content_hash(&body.content),
        }))
        .await?;

    Ok(Json(item))
}

// ── GET /spark/admin/knowledge/:id ──────────────────────────────────

pub async fn get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(item_id): Path<Uuid>,
) -> Result<Json<KnowledgeItem>, ApiError> {
    let client = authenticate_admin(&state, &headers).await?;
    let item = state
        .store
        .knowledge_by_id(client.id, item_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Knowledge item not found".into()))?;
    Ok(Json(item))
}

// ── PATCH /spark/admin/knowledge/:id ────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct KnowledgeUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub active: Option<bool>,
}

pub async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(item_id): Path<Uuid>,
    Json(body): Json<KnowledgeUpdate>,
) -> Result<Json<KnowledgeItem>, ApiError> {
    let client = authenticate_admin(&state, &headers).await?;

    let existing = state
        .store
        .knowledge_by_id(client.id, item_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Knowledge item not found".into()))?;

    let mut patch = serde_json::Map::new();
    if let Some(title) = body.title {
        patch.insert("title".into(), serde_json::json!(title));
    }
    if let Some(category) = body.category {
        patch.insert("category".into(), serde_json::json!(category));
    }
    if let Some(subcategory) = body.subcategory {
        patch.insert("subcategory".into(), serde_json::json!(subcategory));
    }
    if let Some(priority) = body.priority {
        if !(0..=100).contains(&priority) {
            return Err(ApiError::Validation("Priority must be in 0..100".into()));
        }
        patch.insert("priority".into(), serde_json::json!(priority));
    }
    if let Some(active) = body.active {
        patch.insert("active".into(), serde_json::json!(active));
    }

    // Content change: re-hash and re-embed; unchanged content skips both.
    if let Some(content) = body.content {
        if content != existing.content {
            validate_content(&content)?;
            let embedding = state
                .embeddings
                .embed(&content)
                .await
                .map_err(|e| ApiError::Internal(format!("embedding failed: {e}")))?;
            patch.insert("content_hash".into(), serde_json::json!(content_hash(&content)));
            patch.insert("embedding".into(), serde_json::json!(embedding));
            patch.insert(
                "embedding_model".into(),
                serde_json::json!(state.config.llm.embedding_model),
            );
            patch.insert("content".into(), serde_json::json!(content));
        }
    }

    if patch.is_empty() {
        return Ok(Json(existing));
    }
    patch.insert(
        "updated_at".into(),
        serde_json::json!(chrono::Utc::now().to_rfc3339()),
    );

    let item = state
        .store
        .update_knowledge(client.id, item_id, serde_json::Value::Object(patch))
        .await?;
    Ok(Json(item))
}

// ── DELETE /spark/admin/knowledge/:id ───────────────────────────────

pub async fn delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(item_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let client = authenticate_admin(&state, &headers).await?;

    state
        .store
        .knowledge_by_id(client.id, item_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Knowledge item not found".into()))?;

    state.store.delete_knowledge(client.id, item_id).await?;
    Ok(Json(serde_json::json!({ "status": "deleted" })))
}
