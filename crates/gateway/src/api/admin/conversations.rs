//! Admin conversation listing and transcripts.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use spark_domain::types::{Conversation, ConversationState, Message};
use spark_store::SparkStore;

use crate::api::admin::guard::authenticate_admin;
use crate::api::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub state: Option<ConversationState>,
    #[serde(default = "d_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn d_limit() -> u32 {
    50
}

#[derive(Debug, Serialize)]
pub struct ConversationListItem {
    pub id: Uuid,
    pub state: ConversationState,
    pub outcome: Option<spark_domain::types::Outcome>,
    pub turn_count: u32,
    pub boundary_signals_fired: u32,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<Conversation> for ConversationListItem {
    fn from(c: Conversation) -> Self {
        Self {
            id: c.id,
            state: c.state,
            outcome: c.outcome,
            turn_count: c.turn_count,
            boundary_signals_fired: c.boundary_signals_fired,
            created_at: c.created_at,
            ended_at: c.ended_at,
        }
    }
}

// ── GET /spark/admin/conversations ──────────────────────────────────

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let client = authenticate_admin(&state, &headers).await?;

    let limit = query.limit.min(200);
    let conversations = state
        .store
        .list_conversations(client.id, query.state, limit, query.offset)
        .await?;

    let items: Vec<ConversationListItem> =
        conversations.into_iter().map(Into::into).collect();
    Ok(Json(serde_json::json!({
        "items": items,
        "limit": limit,
        "offset": query.offset,
    })))
}

// ── GET /spark/admin/conversations/:id ──────────────────────────────

#[derive(Debug, Serialize)]
pub struct TranscriptMessage {
    pub role: spark_domain::types::Role,
    pub content: String,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

pub async fn detail(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let client = authenticate_admin(&state, &headers).await?;

    let conversation = state
        .store
        .conversation_by_id(client.id, conversation_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Conversation not found".into()))?;

    let transcript: Vec<TranscriptMessage> = state
        .store
        .messages(conversation.id)
        .await?
        .into_iter()
        .map(|m: Message| TranscriptMessage {
            role: m.role,
            content: m.content,
            created_at: m.created_at,
        })
        .collect();

    Ok(Json(serde_json::json!({
        "conversation": ConversationListItem::from(conversation),
        "transcript": transcript,
    })))
}
