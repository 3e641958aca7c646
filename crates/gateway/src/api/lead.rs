//! `POST /spark/lead` — lead capture from the widget.
//!
//! Ownership is checked before the insert; the conversation gets the
//! `lead_captured` outcome without changing state, and CRM sync runs
//! off the request path.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use spark_domain::types::Outcome;
use spark_store::SparkStore;

use crate::api::auth::{authenticate_widget, client_ip};
use crate::api::error::ApiError;
use crate::runtime::crm::{self, LeadPayload};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LeadRequest {
    pub conversation_id: Uuid,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

pub async fn capture_lead(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<LeadRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let client = authenticate_widget(&state, &headers).await?;
    let ip = client_ip(&headers, peer);

    let rpm = client
        .rate_limit_rpm
        .unwrap_or(state.config.spark.rate_limit_rpm);
    if !state.rate_limiter.check(client.id, &ip, rpm) {
        return Err(ApiError::RateLimited);
    }

    let conversation = state
        .store
        .conversation_by_id(client.id, body.conversation_id)
        .await
        .map_err(|e| ApiError::Internal(format!("conversation lookup failed: {e}")))?
        .ok_or_else(|| ApiError::NotFound("Conversation not found".into()))?;

    let lead = state
        .store
        .insert_lead(serde_json::json!({
            "client_id": client.id,
            "conversation_id": conversation.id,
            "name": body.name,
            "email": body.email,
            "phone": body.phone,
            "notes": body.notes,
            "status": "new",
            "crm_sync_status": "pending",
        }))
        .await
        .map_err(|e| ApiError::Internal(format!("lead insert failed: {e}")))?;

    // Lead capture marks the outcome but never ends the conversation.
    if let Err(e) = state
        .store
        .set_outcome(conversation.id, Outcome::LeadCaptured)
        .await
    {
        tracing::warn!(conversation_id = %conversation.id, error = %e, "outcome update failed");
    }

    let payload = LeadPayload {
        name: body.name,
        email: body.email,
        phone: body.phone,
        notes: body.notes,
        company_name: client.settling_config.company_name.clone(),
        conversation_id: Some(conversation.id),
    };
    tokio::spawn(crm::sync_lead(
        state.store.clone(),
        client.id,
        lead.id,
        payload,
    ));

    tracing::info!(lead_id = %lead.id, client_id = %client.id, "lead captured");
    Ok(Json(serde_json::json!({ "status": "captured" })))
}
