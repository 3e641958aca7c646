//! The per-turn pipeline.
//!
//! `process_message` wires preflight, prompt assembly, and the model
//! stream into a sequence of [`TurnEvent`]s. The HTTP edge maps those to
//! SSE. Dropping the stream (visitor disconnect) stops the model pull;
//! the user message is already durable by then and no partial assistant
//! message is persisted.

use std::sync::Arc;

use chrono::{Duration, Utc};
use futures_util::StreamExt;
use uuid::Uuid;

use spark_domain::preflight::BoundarySignal;
use spark_domain::settling::SettlingConfig;
use spark_domain::stream::BoxStream;
use spark_domain::types::{ConversationState, Outcome, Role};
use spark_providers::{ChatMessage, CompletionOpts};
use spark_settling::{build_system_prompt, PromptInputs};
use spark_store::SparkStore;

use crate::runtime::normalize::normalize_format;
use crate::runtime::preflight::run_preflight;
use crate::state::{AppState, PreflightMode};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Events on the turn stream. `Done` and `Error` are terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    Session {
        session_token: String,
        conversation_id: Uuid,
        turns_remaining: u32,
    },
    Token {
        text: String,
    },
    WindDown {
        turns_remaining: u32,
    },
    Done {
        turns_remaining: Option<u32>,
        terminated: bool,
    },
    Error {
        message: String,
    },
}

impl TurnEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TurnEvent::Session { .. } => "session",
            TurnEvent::Token { .. } => "token",
            TurnEvent::WindDown { .. } => "wind_down",
            TurnEvent::Done { .. } => "done",
            TurnEvent::Error { .. } => "error",
        }
    }

    pub fn data(&self) -> serde_json::Value {
        match self {
            TurnEvent::Session {
                session_token,
                conversation_id,
                turns_remaining,
            } => serde_json::json!({
                "session_token": session_token,
                "conversation_id": conversation_id,
                "turns_remaining": turns_remaining,
            }),
            TurnEvent::Token { text } => serde_json::json!({ "text": text }),
            TurnEvent::WindDown { turns_remaining } => {
                serde_json::json!({ "turns_remaining": turns_remaining })
            }
            TurnEvent::Done {
                turns_remaining,
                terminated,
            } => {
                if *terminated {
                    serde_json::json!({ "terminated": true })
                } else if let Some(n) = turns_remaining {
                    serde_json::json!({ "turns_remaining": n })
                } else {
                    serde_json::json!({})
                }
            }
            TurnEvent::Error { message } => serde_json::json!({ "message": message }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnEvent::Done { .. } | TurnEvent::Error { .. })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TurnArgs {
    pub message: String,
    pub client_id: Uuid,
    pub conversation_id: Uuid,
    pub settling: SettlingConfig,
    pub max_turns: u32,
    /// DB-stored orientation override for this tenant.
    pub orientation_text: Option<String>,
}

/// Wind-down triggers when BOTH hold: enough turns have happened, and
/// few enough remain.
pub fn should_wind_down(
    turn_count: u32,
    max_turns: u32,
    min_turns_before_winddown: u32,
    wind_down_turns: u32,
) -> bool {
    let turns_remaining = max_turns.saturating_sub(turn_count);
    turn_count >= min_turns_before_winddown && turns_remaining <= wind_down_turns
}

const GENERIC_ERROR: &str = "Something went wrong. Please try again.";
const STREAM_ERROR: &str = "I hit a snag. Please try again.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fire-and-forget helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn spawn_analytics(
    store: Arc<dyn SparkStore>,
    client_id: Uuid,
    conversation_id: Uuid,
    event_type: &'static str,
    metadata: serde_json::Value,
) {
    tokio::spawn(async move {
        if let Err(e) = store
            .insert_event(client_id, Some(conversation_id), event_type, metadata)
            .await
        {
            tracing::warn!(event_type, error = %e, "analytics emit failed");
        }
    });
}

fn spawn_boundary_increment(store: Arc<dyn SparkStore>, conversation_id: Uuid) {
    tokio::spawn(async move {
        if let Err(e) = store.increment_boundary_signals(conversation_id).await {
            tracing::warn!(conversation_id = %conversation_id, error = %e, "boundary count increment failed");
        }
    });
}

// ── Legacy gate mode ────────────────────────────────────────────────

/// Canned deflection for gate mode, tenant-overridable per tier.
fn deflection_response(tier: &str, settling: &SettlingConfig) -> String {
    if let Some(text) = settling.jailbreak_responses.get(tier) {
        return text.clone();
    }
    match tier {
        "firm" => {
            "I'm not able to do that. I'm here to help with genuine questions. \
             Is there something real I can assist you with?"
        }
        "terminate" => {
            "I'm going to wrap up this conversation. If you have genuine \
             questions in the future, feel free to start a new chat."
        }
        _ => {
            "I appreciate the creativity, but I'm here to help with questions \
             about what we do. What can I actually help you with?"
        }
    }
    .to_string()
}

fn gate_tier(signal: Option<BoundarySignal>, terminate: bool) -> &'static str {
    if terminate {
        return "terminate";
    }
    match signal {
        Some(BoundarySignal::IdentityBreaking)
        | Some(BoundarySignal::ExtractionFraming)
        | Some(BoundarySignal::AdversarialStress) => "firm",
        _ => "subtle",
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// process_message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one turn. The returned stream ends with exactly one terminal
/// event (`done` or `error`).
pub fn process_message(state: AppState, args: TurnArgs) -> BoxStream<'static, TurnEvent> {
    Box::pin(async_stream::stream! {
        let store = state.store.clone();
        let cfg = state.config.clone();
        let conversation_id = args.conversation_id;

        // 1. Boundary count + history (history feeds preflight and the LLM).
        let prior_signals = match store.get_boundary_signals(conversation_id).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "boundary count fetch failed");
                0
            }
        };
        let history = match store.history(conversation_id, cfg.spark.context_turns).await {
            Ok(h) => h,
            Err(e) => {
                tracing::error!(error = %e, "history fetch failed");
                yield TurnEvent::Error { message: GENERIC_ERROR.into() };
                return;
            }
        };

        // 2. Preflight — three branches in parallel, each failing open.
        let preflight = run_preflight(
            &state,
            &args.message,
            args.client_id,
            (prior_signals > 0).then_some(history.as_slice()),
            prior_signals,
        )
        .await;

        // 3. Safety decision.
        match state.preflight_mode {
            PreflightMode::Gate => {
                if preflight.boundary_signal.is_some() || preflight.terminate {
                    let tier = gate_tier(preflight.boundary_signal, preflight.terminate);
                    let deflection = deflection_response(tier, &args.settling);

                    if let Err(e) = store.append_message(conversation_id, Role::User, &args.message).await {
                        tracing::error!(error = %e, "user message append failed");
                        yield TurnEvent::Error { message: GENERIC_ERROR.into() };
                        return;
                    }
                    let _ = store.append_message(conversation_id, Role::Assistant, &deflection).await;

                    for word in deflection.split(' ') {
                        yield TurnEvent::Token { text: format!("{word} ") };
                    }

                    let mut meta = serde_json::json!({ "tier": tier });
                    if let Some(signal) = preflight.boundary_signal {
                        meta["boundary_signal"] = serde_json::json!(signal.as_str());
                    }
                    spawn_analytics(store.clone(), args.client_id, conversation_id, "jailbreak_blocked", meta);

                    if preflight.terminate {
                        if let Err(e) = store
                            .end_conversation(conversation_id, ConversationState::Terminated, Some(Outcome::Terminated))
                            .await
                        {
                            tracing::error!(error = %e, "terminate transition failed");
                        }
                    }

                    yield TurnEvent::Done { turns_remaining: None, terminated: false };
                    return;
                }
            }
            PreflightMode::Signals => {
                if preflight.terminate {
                    // Nuclear option: no model call, conversation over.
                    if let Err(e) = store.append_message(conversation_id, Role::User, &args.message).await {
                        tracing::error!(error = %e, "user message append failed");
                    }
                    if let Err(e) = store
                        .end_conversation(conversation_id, ConversationState::Terminated, Some(Outcome::Terminated))
                        .await
                    {
                        tracing::error!(error = %e, "terminate transition failed");
                    }
                    yield TurnEvent::Done { turns_remaining: None, terminated: true };
                    return;
                }

                if preflight.boundary_signal.is_some() {
                    spawn_boundary_increment(store.clone(), conversation_id);
                }
            }
        }

        // 4. Count the turn.
        let new_expires = Utc::now() + Duration::minutes(cfg.spark.session_timeout_minutes as i64);
        let new_count = match store.increment_turn(conversation_id, new_expires).await {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(error = %e, "turn increment failed");
                yield TurnEvent::Error { message: GENERIC_ERROR.into() };
                return;
            }
        };
        let wind_down = should_wind_down(
            new_count,
            args.max_turns,
            cfg.spark.min_turns_before_winddown,
            cfg.spark.wind_down_turns,
        );
        let turns_remaining = args.max_turns.saturating_sub(new_count);

        // 5. Out of turns: canned farewell, no model call.
        if new_count >= args.max_turns {
            let farewell = args
                .settling
                .lead_capture_prompt
                .clone()
                .unwrap_or_else(|| {
                    "Thanks for chatting! If you'd like to continue the conversation, \
                     leave your email and we'll be in touch."
                        .to_string()
                });

            if let Err(e) = store.append_message(conversation_id, Role::User, &args.message).await {
                tracing::error!(error = %e, "user message append failed");
                yield TurnEvent::Error { message: GENERIC_ERROR.into() };
                return;
            }
            let _ = store.append_message(conversation_id, Role::Assistant, &farewell).await;

            for word in farewell.split(' ') {
                yield TurnEvent::Token { text: format!("{word} ") };
            }

            if let Err(e) = store
                .end_conversation(conversation_id, ConversationState::Completed, Some(Outcome::Completed))
                .await
            {
                tracing::error!(error = %e, "completed transition failed");
            }
            yield TurnEvent::Done { turns_remaining: Some(0), terminated: false };
            return;
        }

        // 6. Assemble the system prompt.
        let prompt = build_system_prompt(
            &state.templates,
            &PromptInputs {
                settling: &args.settling,
                chunks: &preflight.retrieved_chunks,
                turn_count: new_count,
                max_turns: args.max_turns,
                wind_down,
                conversation_state: preflight.conversation_state,
                boundary_signal: preflight.boundary_signal,
                orientation_text: args.orientation_text.as_deref(),
                now: Utc::now(),
            },
        );

        // 7. LLM input: system + sliding window + current message.
        // Empty rows are skipped — some providers reject them.
        let mut llm_messages = vec![ChatMessage::system(prompt)];
        for msg in &history {
            if !msg.content.is_empty() {
                llm_messages.push(ChatMessage {
                    role: msg.role.as_str().to_string(),
                    content: msg.content.clone(),
                });
            }
        }
        llm_messages.push(ChatMessage::user(args.message.clone()));

        // 8. Persist the user message before streaming starts, so it is
        // durable even if the visitor disconnects mid-stream.
        if let Err(e) = store.append_message(conversation_id, Role::User, &args.message).await {
            tracing::error!(error = %e, "user message append failed");
            yield TurnEvent::Error { message: GENERIC_ERROR.into() };
            return;
        }

        // 9. Stream the completion.
        let opts = CompletionOpts {
            temperature: 1.0,
            max_tokens: Some(1024),
            ..Default::default()
        };
        let mut upstream = match state
            .llm
            .stream(&llm_messages, &cfg.llm.spark_primary_model, &opts)
            .await
        {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "LLM stream failed");
                yield TurnEvent::Error { message: STREAM_ERROR.into() };
                return;
            }
        };

        let mut full_response = String::new();
        loop {
            match upstream.next().await {
                Some(Ok(text)) => {
                    full_response.push_str(&text);
                    yield TurnEvent::Token { text };
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "LLM stream failed mid-flight");
                    yield TurnEvent::Error { message: STREAM_ERROR.into() };
                    return;
                }
                None => break,
            }
        }

        // 10. Post-process and persist the assistant message.
        let normalized = normalize_format(&full_response);
        if let Err(e) = store.append_message(conversation_id, Role::Assistant, &normalized).await {
            tracing::error!(error = %e, "assistant message append failed");
            yield TurnEvent::Error { message: GENERIC_ERROR.into() };
            return;
        }

        if wind_down {
            yield TurnEvent::WindDown { turns_remaining };
        }

        // 11. Analytics, off the response path.
        let mut meta = serde_json::json!({});
        if let Some(signal) = preflight.boundary_signal {
            meta["boundary_signal"] = serde_json::json!(signal.as_str());
        }
        let event_type = if new_count == 1 { "first_message" } else { "message" };
        spawn_analytics(store.clone(), args.client_id, conversation_id, event_type, meta);
        if !preflight.in_scope {
            spawn_analytics(
                store.clone(),
                args.client_id,
                conversation_id,
                "out_of_scope",
                serde_json::json!({}),
            );
        }

        yield TurnEvent::Done { turns_remaining: Some(turns_remaining), terminated: false };
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
