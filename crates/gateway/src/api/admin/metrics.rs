//! Dashboard metrics: KPI summary and gap-filled timeseries.
//!
//! Both endpoints scan rows created inside a [1..90]-day window. Scans
//! are capped at 10,000 rows; hitting the cap logs a truncation warning
//! rather than failing the request.

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use spark_domain::types::{Conversation, ConversationState, Lead, Outcome};
use spark_store::SparkStore;

use crate::api::admin::guard::authenticate_admin;
use crate::api::error::ApiError;
use crate::state::AppState;

const SCAN_LIMIT: u32 = 10_000;

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    #[serde(default = "d_days")]
    pub days: i64,
}

fn d_days() -> i64 {
    30
}

fn clamp_days(days: i64) -> i64 {
    days.clamp(1, 90)
}

fn warn_if_truncated(rows: usize, what: &str) {
    if rows as u32 >= SCAN_LIMIT {
        tracing::warn!(rows, what, "metrics scan truncated at row cap");
    }
}

// ── GET /spark/admin/metrics/summary ────────────────────────────────

#[derive(Debug, Serialize)]
pub struct Summary {
    pub days: i64,
    pub total_conversations: usize,
    pub completed: usize,
    pub terminated: usize,
    pub expired: usize,
    pub active: usize,
    pub leads_captured: usize,
    pub avg_turns: f64,
    pub outcomes: HashMap<String, usize>,
}

pub async fn summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WindowQuery>,
) -> Result<Json<Summary>, ApiError> {
    let client = authenticate_admin(&state, &headers).await?;
    let days = clamp_days(query.days);
    let since = Utc::now() - Duration::days(days);

    let conversations = state
        .store
        .conversations_since(client.id, since, SCAN_LIMIT)
        .await?;
    warn_if_truncated(conversations.len(), "conversations");

    let leads = state.store.leads_since(client.id, since, SCAN_LIMIT).await?;
    warn_if_truncated(leads.len(), "leads");

    Ok(Json(summarize(days, &conversations, &leads)))
}

fn summarize(days: i64, conversations: &[Conversation], leads: &[Lead]) -> Summary {
    let count_state =
        |s: ConversationState| conversations.iter().filter(|c| c.state == s).count();

    let mut outcomes: HashMap<String, usize> = HashMap::new();
    for c in conversations {
        if let Some(outcome) = c.outcome {
            *outcomes.entry(outcome.as_str().to_string()).or_default() += 1;
        }
    }

    let total = conversations.len();
    let avg_turns = if total == 0 {
        0.0
    } else {
        conversations.iter().map(|c| c.turn_count as f64).sum::<f64>() / total as f64
    };

    Summary {
        days,
        total_conversations: total,
        completed: count_state(ConversationState::Completed),
        terminated: count_state(ConversationState::Terminated),
        expired: count_state(ConversationState::Expired),
        active: count_state(ConversationState::Active),
        leads_captured: conversations
            .iter()
            .filter(|c| c.outcome == Some(Outcome::LeadCaptured))
            .count()
            .max(leads.len()),
        avg_turns,
        outcomes,
    }
}

// ── GET /spark/admin/metrics/timeseries ─────────────────────────────

#[derive(Debug, Serialize, PartialEq)]
pub struct TimeseriesPoint {
    pub date: NaiveDate,
    pub conversations: usize,
    pub leads: usize,
}

pub async fn timeseries(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WindowQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let client = authenticate_admin(&state, &headers).await?;
    let days = clamp_days(query.days);
    let since = Utc::now() - Duration::days(days);

    let conversations = state
        .store
        .conversations_since(client.id, since, SCAN_LIMIT)
        .await?;
    warn_if_truncated(conversations.len(), "conversations");
    let leads = state.store.leads_since(client.id, since, SCAN_LIMIT).await?;
    warn_if_truncated(leads.len(), "leads");

    let conversation_dates: Vec<NaiveDate> = conversations
        .iter()
        .filter_map(|c| c.created_at.map(|t| t.date_naive()))
        .collect();
    let lead_dates: Vec<NaiveDate> = leads
        .iter()
        .filter_map(|l| l.created_at.map(|t| t.date_naive()))
        .collect();

    let end = Utc::now().date_naive();
    let points = gap_fill(end, days, &conversation_dates, &lead_dates);

    Ok(Json(serde_json::json!({ "days": days, "points": points })))
}

/// One point per calendar day over the window, zero-filled for days
/// with no activity.
fn gap_fill(
    end: NaiveDate,
    days: i64,
    conversation_dates: &[NaiveDate],
    lead_dates: &[NaiveDate],
) -> Vec<TimeseriesPoint> {
    let mut conv_counts: HashMap<NaiveDate, usize> = HashMap::new();
    for d in conversation_dates {
        *conv_counts.entry(*d).or_default() += 1;
    }
    let mut lead_counts: HashMap<NaiveDate, usize> = HashMap::new();
    for d in lead_dates {
        *lead_counts.entry(*d).or_default() += 1;
    }

    let start = end - Duration::days(days - 1);
    let mut points = Vec::with_capacity(days as usize);
    let mut date = start;
    while date <= end {
        points.push(TimeseriesPoint {
            date,
            conversations: conv_counts.get(&date).copied().unwrap_or(0),
            leads: lead_counts.get(&date).copied().unwrap_or(0),
        });
        date += Duration::days(1);
    }
    points
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn days_window_is_clamped() {
        assert_eq!(clamp_days(0), 1);
        assert_eq!(clamp_days(-5), 1);
        assert_eq!(clamp_days(30), 30);
        assert_eq!(clamp_days(365), 90);
    }

    #[test]
    fn gap_fill_covers_every_day() {
        let end = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let day_with_activity = NaiveDate::from_ymd_opt(2026, 3, 8).unwrap();
        let points = gap_fill(end, 7, &[day_with_activity, day_with_activity], &[]);

        assert_eq!(points.len(), 7);
        assert_eq!(points[0].date, NaiveDate::from_ymd_opt(2026, 3, 4).unwrap());
        assert_eq!(points[6].date, end);

        let busy = points.iter().find(|p| p.date == day_with_activity).unwrap();
        assert_eq!(busy.conversations, 2);
        // Every other day zero-filled.
        assert_eq!(
            points.iter().map(|p| p.conversations).sum::<usize>(),
            2
        );
    }

    #[test]
    fn summarize_counts_states_and_outcomes() {
        fn conv(state: ConversationState, outcome: Option<Outcome>, turns: u32) -> Conversation {
            Conversation {
                id: uuid::Uuid::new_v4(),
                client_id: uuid::Uuid::new_v4(),
                session_token: "t".into(),
                ip_address: "1.1.1.1".into(),
                visitor_fingerprint: None,
                turn_count: turns,
                state,
                outcome,
                sentiment: None,
                boundary_signals_fired: 0,
                created_at: None,
                updated_at: None,
                expires_at: Utc::now(),
                ended_at: None,
            }
        }

        let conversations = vec![
            conv(ConversationState::Completed, Some(Outcome::Completed), 20),
            conv(ConversationState::Terminated, Some(Outcome::Terminated), 2),
            conv(ConversationState::Active, Some(Outcome::LeadCaptured), 6),
        ];
        let summary = summarize(30, &conversations, &[]);

        assert_eq!(summary.total_conversations, 3);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.terminated, 1);
        assert_eq!(summary.active, 1);
        assert_eq!(summary.leads_captured, 1);
        assert!((summary.avg_turns - 28.0 / 3.0).abs() < 1e-9);
        assert_eq!(summary.outcomes["lead_captured"], 1);
    }

    #[test]
    fn summarize_empty_has_zero_average() {
        let summary = summarize(7, &[], &[]);
        assert_eq!(summary.avg_turns, 0.0);
        assert_eq!(summary.total_conversations, 0);
    }
}
