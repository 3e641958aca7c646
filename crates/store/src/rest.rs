//! PostgREST implementation of [`SparkStore`].
//!
//! `RestStore` wraps a `reqwest::Client` and translates every trait
//! method into the corresponding `/rest/v1` call: equality and `in.`
//! filters for row access, `/rest/v1/rpc/*` for vector search and the
//! atomic counters. The service key authenticates every request; row
//! isolation is enforced by the `client_id` filters each method carries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client as HttpClient, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use spark_domain::config::StoreConfig;
use spark_domain::error::{Error, Result};
use spark_domain::types::{
    Client, Conversation, ConversationState, KnowledgeItem, Lead, Message, Outcome,
    RetrievedChunk, Role,
};

use crate::provider::SparkStore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// REST client for the Spark store. Created once; the underlying
/// `reqwest::Client` keeps a connection pool.
#[derive(Debug, Clone)]
pub struct RestStore {
    http: HttpClient,
    base_url: String,
    service_key: String,
}

impl RestStore {
    pub fn new(cfg: &StoreConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(std::time::Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            http,
            base_url: cfg.supabase_url.trim_end_matches('/').to_owned(),
            service_key: cfg.supabase_service_key.clone(),
        })
    }

    // ── request plumbing ─────────────────────────────────────────────

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn rpc_url(&self, function: &str) -> String {
        format!("{}/rest/v1/rpc/{function}", self.base_url)
    }

    fn decorate(&self, rb: RequestBuilder) -> RequestBuilder {
        rb.header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }

    async fn send(&self, rb: RequestBuilder, context: &str) -> Result<reqwest::Response> {
        let resp = self
            .decorate(rb)
            .send()
            .await
            .map_err(|e| from_reqwest(e, context))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        // PostgREST reports unique violations as 409 with code 23505.
        if status == StatusCode::CONFLICT || body.contains("23505") {
            return Err(Error::Duplicate(format!("{context}: {body}")));
        }
        Err(Error::Store(format!("{context} returned {status}: {body}")))
    }

    async fn parse<T: DeserializeOwned>(resp: reqwest::Response, context: &str) -> Result<T> {
        let body = resp
            .text()
            .await
            .map_err(|e| Error::Store(format!("{context}: reading body: {e}")))?;
        serde_json::from_str(&body)
            .map_err(|e| Error::Store(format!("{context}: parsing response: {e}: {body}")))
    }

    /// GET rows matching the given query pairs.
    async fn get_rows<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let context = format!("GET {table}");
        let rb = self.http.get(self.table_url(table)).query(query);
        let resp = self.send(rb, &context).await?;
        Self::parse(resp, &context).await
    }

    /// GET at most one row; `None` when the result set is empty.
    async fn get_first<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>> {
        let mut query = query.to_vec();
        query.push(("limit", "1".into()));
        let mut rows: Vec<T> = self.get_rows(table, &query).await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    /// Insert one row and return its representation.
    async fn insert_one<T: DeserializeOwned>(
        &self,
        table: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let context = format!("POST {table}");
        let rb = self
            .http
            .post(self.table_url(table))
            .header("Prefer", "return=representation")
            .json(&body);
        let resp = self.send(rb, &context).await?;
        let mut rows: Vec<T> = Self::parse(resp, &context).await?;
        if rows.is_empty() {
            return Err(Error::Store(format!("{context}: insert returned no rows")));
        }
        Ok(rows.swap_remove(0))
    }

    /// Batch insert without reading representations back.
    async fn insert_many(&self, table: &str, body: serde_json::Value) -> Result<()> {
        let context = format!("POST {table}");
        let rb = self
            .http
            .post(self.table_url(table))
            .header("Prefer", "return=minimal")
            .json(&body);
        self.send(rb, &context).await?;
        Ok(())
    }

    /// PATCH rows matching the query; returns the updated representations.
    async fn patch_rows<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
        body: serde_json::Value,
    ) -> Result<Vec<T>> {
        let context = format!("PATCH {table}");
        let rb = self
            .http
            .patch(self.table_url(table))
            .query(query)
            .header("Prefer", "return=representation")
            .json(&body);
        let resp = self.send(rb, &context).await?;
        Self::parse(resp, &context).await
    }

    /// PATCH without reading rows back.
    async fn patch_quiet(
        &self,
        table: &str,
        query: &[(&str, String)],
        body: serde_json::Value,
    ) -> Result<()> {
        let context = format!("PATCH {table}");
        let rb = self
            .http
            .patch(self.table_url(table))
            .query(query)
            .header("Prefer", "return=minimal")
            .json(&body);
        self.send(rb, &context).await?;
        Ok(())
    }

    async fn delete_rows(&self, table: &str, query: &[(&str, String)]) -> Result<()> {
        let context = format!("DELETE {table}");
        let rb = self.http.delete(self.table_url(table)).query(query);
        self.send(rb, &context).await?;
        Ok(())
    }

    async fn rpc<T: DeserializeOwned>(
        &self,
        function: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        let context = format!("RPC {function}");
        let rb = self.http.post(self.rpc_url(function)).json(&params);
        let resp = self.send(rb, &context).await?;
        Self::parse(resp, &context).await
    }

    /// RPCs declared `void` answer with an empty body.
    async fn rpc_void(&self, function: &str, params: serde_json::Value) -> Result<()> {
        let context = format!("RPC {function}");
        let rb = self.http.post(self.rpc_url(function)).json(&params);
        self.send(rb, &context).await?;
        Ok(())
    }
}

fn from_reqwest(e: reqwest::Error, context: &str) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("{context}: {e}"))
    } else {
        Error::Http(format!("{context}: {e}"))
    }
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{value}")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
impl SparkStore for RestStore {
    // ── Clients ──────────────────────────────────────────────────────

    async fn client_by_key_hash(&self, key_hash: &str) -> Result<Option<Client>> {
        self.get_first("spark_clients", &[("api_key_hash", eq(key_hash))])
            .await
    }

    async fn client_by_user_id(&self, user_id: &str) -> Result<Option<Client>> {
        self.get_first("spark_clients", &[("user_id", eq(user_id))])
            .await
    }

    async fn client_by_id(&self, client_id: Uuid) -> Result<Option<Client>> {
        self.get_first("spark_clients", &[("id", eq(client_id))])
            .await
    }

    async fn update_client(&self, client_id: Uuid, patch: serde_json::Value) -> Result<Client> {
        let mut rows: Vec<Client> = self
            .patch_rows("spark_clients", &[("id", eq(client_id))], patch)
            .await?;
        if rows.is_empty() {
            return Err(Error::NotFound(format!("client {client_id}")));
        }
        Ok(rows.swap_remove(0))
    }

    // ── Conversations ────────────────────────────────────────────────

    async fn create_conversation(
        &self,
        client_id: Uuid,
        session_token: &str,
        ip_address: &str,
        fingerprint: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<Conversation> {
        self.insert_one(
            "spark_conversations",
            serde_json::json!({
                "client_id": client_id,
                "session_token": session_token,
                "ip_address": ip_address,
                "visitor_fingerprint": fingerprint,
                "turn_count": 0,
                "state": "active",
                "boundary_signals_fired": 0,
                "expires_at": expires_at.to_rfc3339(),
            }),
        )
        .await
    }

    async fn active_conversation_by_token(&self, token: &str) -> Result<Option<Conversation>> {
        self.get_first(
            "spark_conversations",
            &[("session_token", eq(token)), ("state", eq("active"))],
        )
        .await
    }

    async fn conversation_by_id(
        &self,
        client_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Option<Conversation>> {
        self.get_first(
            "spark_conversations",
            &[("id", eq(conversation_id)), ("client_id", eq(client_id))],
        )
        .await
    }

    async fn increment_turn(
        &self,
        conversation_id: Uuid,
        new_expires_at: DateTime<Utc>,
    ) -> Result<u32> {
        // Serialized store-side; concurrent callers each get a distinct count.
        self.rpc(
            "increment_spark_turn",
            serde_json::json!({
                "p_conversation_id": conversation_id,
                "p_expires_at": new_expires_at.to_rfc3339(),
            }),
        )
        .await
    }

    async fn end_conversation(
        &self,
        conversation_id: Uuid,
        state: ConversationState,
        outcome: Option<Outcome>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let mut body = serde_json::json!({
            "state": state.as_str(),
            "ended_at": now,
            "updated_at": now,
        });
        if let Some(outcome) = outcome {
            body["outcome"] = serde_json::json!(outcome.as_str());
        }
        // Filter on state=active keeps terminal states sinks (idempotent).
        self.patch_quiet(
            "spark_conversations",
            &[("id", eq(conversation_id)), ("state", eq("active"))],
            body,
        )
        .await
    }

    async fn set_outcome(&self, conversation_id: Uuid, outcome: Outcome) -> Result<()> {
        self.patch_quiet(
            "spark_conversations",
            &[("id", eq(conversation_id))],
            serde_json::json!({
                "outcome": outcome.as_str(),
                "updated_at": Utc::now().to_rfc3339(),
            }),
        )
        .await
    }

    async fn increment_boundary_signals(&self, conversation_id: Uuid) -> Result<()> {
        self.rpc_void(
            "increment_boundary_signals",
            serde_json::json!({ "p_conversation_id": conversation_id }),
        )
        .await
    }

    async fn get_boundary_signals(&self, conversation_id: Uuid) -> Result<u32> {
        #[derive(serde::Deserialize)]
        struct Row {
            boundary_signals_fired: u32,
        }
        let row: Option<Row> = self
            .get_first(
                "spark_conversations",
                &[
                    ("id", eq(conversation_id)),
                    ("select", "boundary_signals_fired".into()),
                ],
            )
            .await?;
        Ok(row.map(|r| r.boundary_signals_fired).unwrap_or(0))
    }

    async fn list_conversations(
        &self,
        client_id: Uuid,
        state: Option<ConversationState>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Conversation>> {
        let mut query = vec![
            ("client_id", eq(client_id)),
            ("order", "created_at.desc".into()),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ];
        if let Some(state) = state {
            query.push(("state", eq(state.as_str())));
        }
        self.get_rows("spark_conversations", &query).await
    }

    async fn conversations_since(
        &self,
        client_id: Uuid,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Conversation>> {
        self.get_rows(
            "spark_conversations",
            &[
                ("client_id", eq(client_id)),
                ("created_at", format!("gte.{}", since.to_rfc3339())),
                ("order", "created_at.asc".into()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    // ── Messages ─────────────────────────────────────────────────────

    async fn history(&self, conversation_id: Uuid, window_turns: u32) -> Result<Vec<Message>> {
        // Fetch newest-first to apply the window, then restore order.
        let mut rows: Vec<Message> = self
            .get_rows(
                "spark_messages",
                &[
                    ("conversation_id", eq(conversation_id)),
                    ("order", "created_at.desc".into()),
                    ("limit", (window_turns * 2).to_string()),
                ],
            )
            .await?;
        rows.reverse();
        Ok(rows)
    }

    async fn messages(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        self.get_rows(
            "spark_messages",
            &[
                ("conversation_id", eq(conversation_id)),
                ("order", "created_at.asc".into()),
            ],
        )
        .await
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        role: Role,
        content: &str,
    ) -> Result<Message> {
        self.insert_one(
            "spark_messages",
            serde_json::json!({
                "conversation_id": conversation_id,
                "role": role.as_str(),
                "content": content,
            }),
        )
        .await
    }

    // ── Vector search ────────────────────────────────────────────────

    async fn match_knowledge(
        &self,
        client_id: Uuid,
        embedding: &[f32],
        k: u32,
        threshold: f32,
    ) -> Result<Vec<RetrievedChunk>> {
        self.rpc(
            "match_spark_knowledge",
            serde_json::json!({
                "p_client_id": client_id,
                "p_query_embedding": embedding,
                "p_match_count": k,
                "p_threshold": threshold,
            }),
        )
        .await
    }

    async fn match_documents(
        &self,
        client_id: Uuid,
        embedding: &[f32],
        k: u32,
        threshold: f32,
    ) -> Result<Vec<RetrievedChunk>> {
        self.rpc(
            "match_spark_documents",
            serde_json::json!({
                "p_client_id": client_id,
                "p_query_embedding": embedding,
                "p_match_count": k,
                "p_threshold": threshold,
            }),
        )
        .await
    }

    // ── Knowledge items ──────────────────────────────────────────────

    async fn list_knowledge(
        &self,
        client_id: Uuid,
        category: Option<&str>,
        active: Option<bool>,
    ) -> Result<Vec<KnowledgeItem>> {
        let mut query = vec![
            ("client_id", eq(client_id)),
            ("order", "priority.desc,created_at.desc".into()),
        ];
        if let Some(category) = category {
            query.push(("category", eq(category)));
        }
        if let Some(active) = active {
            query.push(("active", eq(active)));
        }
        self.get_rows("spark_knowledge_items", &query).await
    }

    async fn knowledge_by_id(
        &self,
        client_id: Uuid,
        item_id: Uuid,
    ) -> Result<Option<KnowledgeItem>> {
        self.get_first(
            "spark_knowledge_items",
            &[("id", eq(item_id)), ("client_id", eq(client_id))],
        )
        .await
    }

    async fn insert_knowledge(&self, row: serde_json::Value) -> Result<KnowledgeItem> {
        self.insert_one("spark_knowledge_items", row).await
    }

    async fn update_knowledge(
        &self,
        client_id: Uuid,
        item_id: Uuid,
        patch: serde_json::Value,
    ) -> Result<KnowledgeItem> {
        let mut rows: Vec<KnowledgeItem> = self
            .patch_rows(
                "spark_knowledge_items",
                &[("id", eq(item_id)), ("client_id", eq(client_id))],
                patch,
            )
            .await?;
        if rows.is_empty() {
            return Err(Error::NotFound(format!("knowledge item {item_id}")));
        }
        Ok(rows.swap_remove(0))
    }

    async fn delete_knowledge(&self, client_id: Uuid, item_id: Uuid) -> Result<()> {
        self.delete_rows(
            "spark_knowledge_items",
            &[("id", eq(item_id)), ("client_id", eq(client_id))],
        )
        .await
    }

    // ── Document chunks ──────────────────────────────────────────────

    async fn existing_document_hashes(
        &self,
        client_id: Uuid,
        hashes: &[String],
    ) -> Result<Vec<String>> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        #[derive(serde::Deserialize)]
        struct Row {
            content_hash: String,
        }
        let rows: Vec<Row> = self
            .get_rows(
                "spark_documents",
                &[
                    ("client_id", eq(client_id)),
                    ("content_hash", format!("in.({})", hashes.join(","))),
                    ("select", "content_hash".into()),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(|r| r.content_hash).collect())
    }

    async fn insert_documents(&self, rows: Vec<serde_json::Value>) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.insert_many("spark_documents", serde_json::Value::Array(rows))
            .await
    }

    async fn delete_documents_by_source(&self, client_id: Uuid, source_url: &str) -> Result<()> {
        self.delete_rows(
            "spark_documents",
            &[
                ("client_id", eq(client_id)),
                ("source_url", eq(source_url)),
            ],
        )
        .await
    }

    // ── Leads ────────────────────────────────────────────────────────

    async fn insert_lead(&self, row: serde_json::Value) -> Result<Lead> {
        self.insert_one("spark_leads", row).await
    }

    async fn lead_by_id(&self, client_id: Uuid, lead_id: Uuid) -> Result<Option<Lead>> {
        self.get_first(
            "spark_leads",
            &[("id", eq(lead_id)), ("client_id", eq(client_id))],
        )
        .await
    }

    async fn update_lead(
        &self,
        client_id: Uuid,
        lead_id: Uuid,
        patch: serde_json::Value,
    ) -> Result<Lead> {
        let mut rows: Vec<Lead> = self
            .patch_rows(
                "spark_leads",
                &[("id", eq(lead_id)), ("client_id", eq(client_id))],
                patch,
            )
            .await?;
        if rows.is_empty() {
            return Err(Error::NotFound(format!("lead {lead_id}")));
        }
        Ok(rows.swap_remove(0))
    }

    async fn list_leads(&self, client_id: Uuid, limit: u32, offset: u32) -> Result<Vec<Lead>> {
        self.get_rows(
            "spark_leads",
            &[
                ("client_id", eq(client_id)),
                ("order", "created_at.desc".into()),
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
            ],
        )
        .await
    }

    async fn leads_since(
        &self,
        client_id: Uuid,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Lead>> {
        self.get_rows(
            "spark_leads",
            &[
                ("client_id", eq(client_id)),
                ("created_at", format!("gte.{}", since.to_rfc3339())),
                ("order", "created_at.asc".into()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    async fn set_lead_sync_status(&self, lead_id: Uuid, status: &str) -> Result<()> {
        self.patch_quiet(
            "spark_leads",
            &[("id", eq(lead_id))],
            serde_json::json!({ "crm_sync_status": status }),
        )
        .await
    }

    // ── Analytics events ─────────────────────────────────────────────

    async fn insert_event(
        &self,
        client_id: Uuid,
        conversation_id: Option<Uuid>,
        event_type: &str,
        metadata: serde_json::Value,
    ) -> Result<()> {
        self.insert_many(
            "spark_events",
            serde_json::json!([{
                "client_id": client_id,
                "conversation_id": conversation_id,
                "event_type": event_type,
                "metadata": metadata,
            }]),
        )
        .await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RestStore {
        RestStore::new(&StoreConfig {
            supabase_url: "https://example.supabase.co/".into(),
            supabase_service_key: "key".into(),
            timeout_ms: 1000,
        })
        .unwrap()
    }

    #[test]
    fn urls_strip_trailing_slash() {
        let s = store();
        assert_eq!(
            s.table_url("spark_clients"),
            "https://example.supabase.co/rest/v1/spark_clients"
        );
        assert_eq!(
            s.rpc_url("match_spark_knowledge"),
            "https://example.supabase.co/rest/v1/rpc/match_spark_knowledge"
        );
    }

    #[test]
    fn eq_filter_formats() {
        assert_eq!(eq("abc"), "eq.abc");
        assert_eq!(eq(7), "eq.7");
    }
}
