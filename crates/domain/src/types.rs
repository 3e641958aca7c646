//! Row types for the persistent store.
//!
//! Every row is exclusively owned by its client; the store layer carries
//! the `client_id` filter on every query path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::settling::SettlingConfig;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client (tenant)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: Uuid,
    pub slug: String,
    /// Identity-provider subject linked to this tenant (admin portal).
    #[serde(default)]
    pub user_id: Option<String>,
    /// SHA-256 hex digest of the publishable API key.
    pub api_key_hash: String,
    #[serde(default = "d_true")]
    pub active: bool,
    /// Per-tenant overrides; `None` falls back to the config defaults.
    #[serde(default)]
    pub max_turns: Option<u32>,
    #[serde(default)]
    pub rate_limit_rpm: Option<u32>,
    #[serde(default)]
    pub settling_config: SettlingConfig,
    /// DB-stored orientation text; overrides the named template.
    #[serde(default)]
    pub client_orientation: Option<String>,
    #[serde(default)]
    pub onboarding: Option<serde_json::Value>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn d_true() -> bool {
    true
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation (session)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationState {
    Active,
    Completed,
    Terminated,
    Expired,
}

impl ConversationState {
    /// Terminal states are sinks — no transition leaves them.
    pub fn is_terminal(self) -> bool {
        self != ConversationState::Active
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConversationState::Active => "active",
            ConversationState::Completed => "completed",
            ConversationState::Terminated => "terminated",
            ConversationState::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Abandoned,
    Terminated,
    LeadCaptured,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Abandoned => "abandoned",
            Outcome::Terminated => "terminated",
            Outcome::LeadCaptured => "lead_captured",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub client_id: Uuid,
    pub session_token: String,
    pub ip_address: String,
    #[serde(default)]
    pub visitor_fingerprint: Option<String>,
    pub turn_count: u32,
    pub state: ConversationState,
    #[serde(default)]
    pub outcome: Option<Outcome>,
    #[serde(default)]
    pub sentiment: Option<String>,
    #[serde(default)]
    pub boundary_signals_fired: u32,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// Immutable after insert; ordering by `created_at` is total within a
/// conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Knowledge
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Admin-managed knowledge item. The embedding column stays in the
/// store — nothing in process ever reads the vector back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub id: Uuid,
    pub client_id: Uuid,
    pub title: String,
    pub content: String,
    pub category: String,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "d_true")]
    pub active: bool,
    pub content_hash: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A vector-search hit from either the knowledge table or the document
/// table. Document chunks carry no category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub similarity: Option<f32>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Leads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadStatus {
    New,
    Contacted,
    Converted,
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrmSyncStatus {
    Pending,
    Synced,
    Failed,
}

impl CrmSyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CrmSyncStatus::Pending => "pending",
            CrmSyncStatus::Synced => "synced",
            CrmSyncStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    pub client_id: Uuid,
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub status: LeadStatus,
    pub crm_sync_status: CrmSyncStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_serde_round_trip() {
        for (state, s) in [
            (ConversationState::Active, "\"active\""),
            (ConversationState::Completed, "\"completed\""),
            (ConversationState::Terminated, "\"terminated\""),
            (ConversationState::Expired, "\"expired\""),
        ] {
            assert_eq!(serde_json::to_string(&state).unwrap(), s);
            let back: ConversationState = serde_json::from_str(s).unwrap();
            assert_eq!(back, state);
        }
    }

    #[test]
    fn only_active_is_non_terminal() {
        assert!(!ConversationState::Active.is_terminal());
        assert!(ConversationState::Completed.is_terminal());
        assert!(ConversationState::Terminated.is_terminal());
        assert!(ConversationState::Expired.is_terminal());
    }

    #[test]
    fn outcome_lead_captured_uses_snake_case() {
        assert_eq!(
            serde_json::to_string(&Outcome::LeadCaptured).unwrap(),
            "\"lead_captured\""
        );
    }

    #[test]
    fn conversation_deserializes_with_missing_optionals() {
        let raw = serde_json::json!({
            "id": Uuid::new_v4(),
            "client_id": Uuid::new_v4(),
            "session_token": "tok",
            "ip_address": "1.2.3.4",
            "turn_count": 0,
            "state": "active",
            "expires_at": "2026-03-01T00:00:00Z",
        });
        let conv: Conversation = serde_json::from_value(raw).unwrap();
        assert_eq!(conv.boundary_signals_fired, 0);
        assert!(conv.outcome.is_none());
        assert!(conv.ended_at.is_none());
    }
}
