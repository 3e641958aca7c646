//! `POST /spark/chat` — the streaming conversation endpoint.
//!
//! Auth, rate limiting, and session resolution happen before the SSE
//! stream opens, so those failures surface as plain HTTP statuses. Once
//! the stream is up, the first event is always `session`, followed by
//! the orchestrator's events; `done` and `error` are terminal.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use serde::Deserialize;

use spark_store::sessions;

use crate::api::auth::{authenticate_widget, client_ip};
use crate::api::error::ApiError;
use crate::runtime::turn::{process_message, TurnArgs, TurnEvent};
use crate::state::AppState;

const MESSAGE_MAX_CHARS: usize = 4000;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
}

pub async fn chat(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let client = authenticate_widget(&state, &headers).await?;
    let ip = client_ip(&headers, peer);

    validate_message(&body.message)?;

    let rpm = client
        .rate_limit_rpm
        .unwrap_or(state.config.spark.rate_limit_rpm);
    if !state.rate_limiter.check(client.id, &ip, rpm) {
        return Err(ApiError::RateLimited);
    }

    // Resolve the session; a token from a different IP or an expired
    // session silently becomes a fresh conversation.
    let existing = match &body.session_token {
        Some(token) => sessions::resolve_session(state.store.as_ref(), token, &ip)
            .await
            .map_err(|e| ApiError::Internal(format!("session resolve failed: {e}")))?,
        None => None,
    };

    let conversation = match existing {
        Some(conversation) => conversation,
        None => sessions::create_session(
            state.store.as_ref(),
            client.id,
            &ip,
            body.fingerprint.as_deref(),
            state.config.spark.session_timeout_minutes,
        )
        .await
        .map_err(|e| ApiError::Internal(format!("session create failed: {e}")))?,
    };

    let max_turns = client
        .max_turns
        .unwrap_or(state.config.spark.max_turns_default);

    let session_event = TurnEvent::Session {
        session_token: conversation.session_token.clone(),
        conversation_id: conversation.id,
        turns_remaining: max_turns.saturating_sub(conversation.turn_count),
    };

    let args = TurnArgs {
        message: body.message,
        client_id: client.id,
        conversation_id: conversation.id,
        settling: client.settling_config.clone(),
        max_turns,
        orientation_text: client.client_orientation.clone(),
    };

    let turn_stream = process_message(state.clone(), args);

    let stream = async_stream::stream! {
        yield Ok::<_, std::convert::Infallible>(to_sse(&session_event));

        let mut turn_stream = turn_stream;
        while let Some(event) = turn_stream.next().await {
            let terminal = event.is_terminal();
            yield Ok(to_sse(&event));
            if terminal {
                break;
            }
        }
    };

    Ok(Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response())
}

fn validate_message(message: &str) -> Result<(), ApiError> {
    if message.is_empty() {
        return Err(ApiError::Validation("Message must not be empty".into()));
    }
    if message.chars().count() > MESSAGE_MAX_CHARS {
        return Err(ApiError::Validation(format!(
            "Message exceeds {MESSAGE_MAX_CHARS} characters"
        )));
    }
    Ok(())
}

fn to_sse(event: &TurnEvent) -> Event {
    Event::default()
        .event(event.name())
        .data(event.data().to_string())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
