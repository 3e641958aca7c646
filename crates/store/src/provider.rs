//! The store trait consumed by the gateway.
//!
//! Every mutation and query is tenant-scoped: methods either take the
//! owning `client_id` or operate on a conversation id the caller has
//! already resolved through a tenant-scoped path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use spark_domain::error::Result;
use spark_domain::types::{
    Client, Conversation, ConversationState, KnowledgeItem, Lead, Message, Outcome,
    RetrievedChunk, Role,
};

/// Row-oriented store with per-tenant vector search.
#[async_trait]
pub trait SparkStore: Send + Sync {
    // ── Clients ──────────────────────────────────────────────────────

    async fn client_by_key_hash(&self, key_hash: &str) -> Result<Option<Client>>;
    async fn client_by_user_id(&self, user_id: &str) -> Result<Option<Client>>;
    async fn client_by_id(&self, client_id: Uuid) -> Result<Option<Client>>;
    /// Patch tenant columns (settling_config, client_orientation, onboarding).
    async fn update_client(&self, client_id: Uuid, patch: serde_json::Value) -> Result<Client>;

    // ── Conversations ────────────────────────────────────────────────

    /// Insert a fresh conversation: `turn_count=0`, `state=active`,
    /// `expires_at = now + timeout`.
    async fn create_conversation(
        &self,
        client_id: Uuid,
        session_token: &str,
        ip_address: &str,
        fingerprint: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<Conversation>;

    /// Lookup by token, filtered on `state=active`. IP and expiry checks
    /// belong to [`crate::sessions::resolve_session`].
    async fn active_conversation_by_token(&self, token: &str) -> Result<Option<Conversation>>;

    async fn conversation_by_id(
        &self,
        client_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Option<Conversation>>;

    /// Atomic turn increment (store-side RPC), refreshing `expires_at`
    /// and `updated_at`. Returns the new count.
    async fn increment_turn(
        &self,
        conversation_id: Uuid,
        new_expires_at: DateTime<Utc>,
    ) -> Result<u32>;

    /// Terminal transition; idempotent on already-terminal rows.
    async fn end_conversation(
        &self,
        conversation_id: Uuid,
        state: ConversationState,
        outcome: Option<Outcome>,
    ) -> Result<()>;

    /// Set the outcome without touching `state` (lead capture).
    async fn set_outcome(&self, conversation_id: Uuid, outcome: Outcome) -> Result<()>;

    async fn increment_boundary_signals(&self, conversation_id: Uuid) -> Result<()>;
    async fn get_boundary_signals(&self, conversation_id: Uuid) -> Result<u32>;

    /// Admin listing, newest first.
    async fn list_conversations(
        &self,
        client_id: Uuid,
        state: Option<ConversationState>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Conversation>>;

    /// Conversations created since `since` (metrics scans).
    async fn conversations_since(
        &self,
        client_id: Uuid,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Conversation>>;

    // ── Messages ─────────────────────────────────────────────────────

    /// Last `2 * window_turns` messages in chronological order.
    async fn history(&self, conversation_id: Uuid, window_turns: u32) -> Result<Vec<Message>>;

    /// Full transcript in chronological order.
    async fn messages(&self, conversation_id: Uuid) -> Result<Vec<Message>>;

    async fn append_message(
        &self,
        conversation_id: Uuid,
        role: Role,
        content: &str,
    ) -> Result<Message>;

    // ── Vector search ────────────────────────────────────────────────

    async fn match_knowledge(
        &self,
        client_id: Uuid,
        embedding: &[f32],
        k: u32,
        threshold: f32,
    ) -> Result<Vec<RetrievedChunk>>;

    async fn match_documents(
        &self,
        client_id: Uuid,
        embedding: &[f32],
        k: u32,
        threshold: f32,
    ) -> Result<Vec<RetrievedChunk>>;

    // ── Knowledge items ──────────────────────────────────────────────

    async fn list_knowledge(
        &self,
        client_id: Uuid,
        category: Option<&str>,
        active: Option<bool>,
    ) -> Result<Vec<KnowledgeItem>>;

    async fn knowledge_by_id(
        &self,
        client_id: Uuid,
        item_id: Uuid,
    ) -> Result<Option<KnowledgeItem>>;

    /// Returns `Error::Duplicate` on a content-hash collision.
    async fn insert_knowledge(&self, row: serde_json::Value) -> Result<KnowledgeItem>;

    async fn update_knowledge(
        &self,
        client_id: Uuid,
        item_id: Uuid,
        patch: serde_json::Value,
    ) -> Result<KnowledgeItem>;

    async fn delete_knowledge(&self, client_id: Uuid, item_id: Uuid) -> Result<()>;

    // ── Document chunks ──────────────────────────────────────────────

    /// Subset of `hashes` already present for this client.
    async fn existing_document_hashes(
        &self,
        client_id: Uuid,
        hashes: &[String],
    ) -> Result<Vec<String>>;

    async fn insert_documents(&self, rows: Vec<serde_json::Value>) -> Result<()>;

    async fn delete_documents_by_source(&self, client_id: Uuid, source_url: &str) -> Result<()>;

    // ── Leads ────────────────────────────────────────────────────────

    async fn insert_lead(&self, row: serde_json::Value) -> Result<Lead>;

    async fn lead_by_id(&self, client_id: Uuid, lead_id: Uuid) -> Result<Option<Lead>>;

    async fn update_lead(
        &self,
        client_id: Uuid,
        lead_id: Uuid,
        patch: serde_json::Value,
    ) -> Result<Lead>;

    async fn list_leads(&self, client_id: Uuid, limit: u32, offset: u32) -> Result<Vec<Lead>>;

    async fn leads_since(
        &self,
        client_id: Uuid,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Lead>>;

    /// Best-effort CRM status update (callers log failures, never raise).
    async fn set_lead_sync_status(&self, lead_id: Uuid, status: &str) -> Result<()>;

    // ── Analytics events ─────────────────────────────────────────────

    async fn insert_event(
        &self,
        client_id: Uuid,
        conversation_id: Option<Uuid>,
        event_type: &str,
        metadata: serde_json::Value,
    ) -> Result<()>;
}
