//! `POST /spark/event` — widget analytics events.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use spark_store::SparkStore;

use crate::api::auth::{authenticate_widget, client_ip};
use crate::api::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EventRequest {
    pub event_type: String,
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    #[serde(default = "d_metadata")]
    pub metadata: serde_json::Value,
}

fn d_metadata() -> serde_json::Value {
    serde_json::json!({})
}

pub async fn record_event(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<EventRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let client = authenticate_widget(&state, &headers).await?;
    let ip = client_ip(&headers, peer);

    let rpm = client
        .rate_limit_rpm
        .unwrap_or(state.config.spark.rate_limit_rpm);
    if !state.rate_limiter.check(client.id, &ip, rpm) {
        return Err(ApiError::RateLimited);
    }

    if body.event_type.is_empty() || body.event_type.len() > 64 {
        return Err(ApiError::Validation("Invalid event_type".into()));
    }

    state
        .store
        .insert_event(
            client.id,
            body.conversation_id,
            &body.event_type,
            body.metadata,
        )
        .await
        .map_err(|e| ApiError::Internal(format!("event insert failed: {e}")))?;

    Ok(Json(serde_json::json!({ "status": "recorded" })))
}
