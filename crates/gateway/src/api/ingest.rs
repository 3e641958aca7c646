//! Ingestion endpoints: raw text and URL scrape.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use crate::api::auth::{authenticate_widget, client_ip};
use crate::api::error::ApiError;
use crate::runtime::ingestion;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct IngestTextRequest {
    pub content: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IngestUrlRequest {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
}

pub async fn ingest_text(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<IngestTextRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let client = authenticate_widget(&state, &headers).await?;
    let ip = client_ip(&headers, peer);

    let rpm = client
        .rate_limit_rpm
        .unwrap_or(state.config.spark.rate_limit_rpm);
    if !state.rate_limiter.check(client.id, &ip, rpm) {
        return Err(ApiError::RateLimited);
    }

    if body.content.trim().is_empty() {
        return Err(ApiError::Validation("Content must not be empty".into()));
    }

    let inserted = ingestion::ingest_text(
        &state,
        client.id,
        &body.content,
        body.title.as_deref(),
        "text",
        None,
    )
    .await?;

    Ok(Json(serde_json::json!({
        "status": "ingested",
        "chunks": inserted,
    })))
}

pub async fn ingest_url(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<IngestUrlRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let client = authenticate_widget(&state, &headers).await?;
    let ip = client_ip(&headers, peer);

    let rpm = client
        .rate_limit_rpm
        .unwrap_or(state.config.spark.rate_limit_rpm);
    if !state.rate_limiter.check(client.id, &ip, rpm) {
        return Err(ApiError::RateLimited);
    }

    let url = reqwest::Url::parse(&body.url)
        .map_err(|_| ApiError::Validation("Invalid URL".into()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ApiError::Validation("Invalid URL".into()));
    }

    let inserted =
        ingestion::ingest_url(&state, client.id, url.as_str(), body.title.as_deref()).await?;

    Ok(Json(serde_json::json!({
        "status": "ingested",
        "chunks": inserted,
    })))
}
