//! Admin profile endpoints: `/spark/admin/me`, settings, onboarding,
//! and the orientation override.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use spark_domain::settling::validate_settling_patch;
use spark_domain::types::Client;
use spark_store::SparkStore;

use crate::api::admin::guard::authenticate_admin;
use crate::api::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ClientProfile {
    pub id: uuid::Uuid,
    pub slug: String,
    pub active: bool,
    pub max_turns: Option<u32>,
    pub rate_limit_rpm: Option<u32>,
    pub settling_config: spark_domain::settling::SettlingConfig,
}

impl From<Client> for ClientProfile {
    fn from(client: Client) -> Self {
        Self {
            id: client.id,
            slug: client.slug,
            active: client.active,
            max_turns: client.max_turns,
            rate_limit_rpm: client.rate_limit_rpm,
            settling_config: client.settling_config,
        }
    }
}

// ── GET /spark/admin/me ─────────────────────────────────────────────

pub async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ClientProfile>, ApiError> {
    let client = authenticate_admin(&state, &headers).await?;
    Ok(Json(client.into()))
}

// ── PATCH /spark/admin/settings ─────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SettingsUpdate {
    pub settling_config: serde_json::Value,
}

pub async fn update_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SettingsUpdate>,
) -> Result<Json<ClientProfile>, ApiError> {
    let client = authenticate_admin(&state, &headers).await?;

    // Unknown keys are rejected on write, never silently stored.
    validate_settling_patch(&body.settling_config).map_err(ApiError::Validation)?;

    // Merge the patch over the current config so partial updates work.
    let mut merged = serde_json::to_value(&client.settling_config)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if let (Some(merged_obj), Some(patch_obj)) =
        (merged.as_object_mut(), body.settling_config.as_object())
    {
        for (key, value) in patch_obj {
            merged_obj.insert(key.clone(), value.clone());
        }
    }

    let updated = state
        .store
        .update_client(client.id, serde_json::json!({ "settling_config": merged }))
        .await?;

    Ok(Json(updated.into()))
}

// ── GET/PATCH /spark/admin/onboarding ───────────────────────────────

pub async fn get_onboarding(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let client = authenticate_admin(&state, &headers).await?;
    Ok(Json(
        client.onboarding.unwrap_or_else(|| serde_json::json!({})),
    ))
}

pub async fn update_onboarding(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let client = authenticate_admin(&state, &headers).await?;

    if !body.is_object() {
        return Err(ApiError::Validation("Onboarding must be a JSON object".into()));
    }

    // Partial saves merge over whatever is already there.
    let mut merged = client.onboarding.unwrap_or_else(|| serde_json::json!({}));
    if let (Some(merged_obj), Some(patch_obj)) = (merged.as_object_mut(), body.as_object()) {
        for (key, value) in patch_obj {
            merged_obj.insert(key.clone(), value.clone());
        }
    }

    let updated = state
        .store
        .update_client(client.id, serde_json::json!({ "onboarding": merged }))
        .await?;

    Ok(Json(
        updated.onboarding.unwrap_or_else(|| serde_json::json!({})),
    ))
}

// ── GET/PUT /spark/admin/orientation ────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct OrientationUpdate {
    pub orientation: Option<String>,
}

pub async fn get_orientation(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let client = authenticate_admin(&state, &headers).await?;
    Ok(Json(
        serde_json::json!({ "orientation": client.client_orientation }),
    ))
}

pub async fn set_orientation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<OrientationUpdate>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let client = authenticate_admin(&state, &headers).await?;

    if let Some(text) = &body.orientation {
        if text.len() > 50_000 {
            return Err(ApiError::Validation("Orientation text too large".into()));
        }
    }

    let updated = state
        .store
        .update_client(
            client.id,
            serde_json::json!({ "client_orientation": body.orientation }),
        )
        .await?;

    Ok(Json(
        serde_json::json!({ "orientation": updated.client_orientation }),
    ))
}
