//! Widget-surface authentication and client IP extraction.
//!
//! Spark API keys are publishable — they sit in page source by design.
//! Security comes from rate limiting, IP-bound sessions, and per-tenant
//! data isolation, not from key secrecy. The server stores only the
//! SHA-256 of the key and looks tenants up by that digest.

use std::net::SocketAddr;

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

use spark_domain::types::Client;
use spark_store::SparkStore;

use crate::api::error::ApiError;
use crate::state::AppState;

/// SHA-256 hex digest of an API key, as stored in `api_key_hash`.
pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Pull the key from `Authorization: Bearer` or `X-Spark-Key`.
pub fn extract_api_key(headers: &HeaderMap) -> Result<&str, ApiError> {
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        if let Some(key) = auth.strip_prefix("Bearer ") {
            return Ok(key);
        }
    }
    if let Some(key) = headers.get("x-spark-key").and_then(|v| v.to_str().ok()) {
        return Ok(key);
    }
    Err(ApiError::Unauthorized("Missing API key".into()))
}

/// Verify the widget API key and return the owning tenant.
pub async fn authenticate_widget(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Client, ApiError> {
    let key_hash = hash_api_key(extract_api_key(headers)?);

    let client = state
        .store
        .client_by_key_hash(&key_hash)
        .await
        .map_err(|e| ApiError::Internal(format!("key lookup failed: {e}")))?
        .ok_or_else(|| ApiError::Unauthorized("Invalid API key".into()))?;

    if !client.active {
        return Err(ApiError::Forbidden("Client deactivated".into()));
    }
    Ok(client)
}

/// Client IP: first comma-separated `X-Forwarded-For` value when
/// present (we sit behind a proxy), else the transport peer.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    peer.ip().to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> SocketAddr {
        "10.0.0.9:443".parse().unwrap()
    }

    #[test]
    fn hash_is_sha256_hex() {
        let h = hash_api_key("spark_pk_test");
        assert_eq!(h.len(), 64);
        assert_eq!(h, hash_api_key("spark_pk_test"));
    }

    #[test]
    fn bearer_header_wins_over_spark_key() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc"));
        headers.insert("x-spark-key", HeaderValue::from_static("def"));
        assert_eq!(extract_api_key(&headers).unwrap(), "abc");
    }

    #[test]
    fn spark_key_header_accepted_alone() {
        let mut headers = HeaderMap::new();
        headers.insert("x-spark-key", HeaderValue::from_static("def"));
        assert_eq!(extract_api_key(&headers).unwrap(), "def");
    }

    #[test]
    fn missing_key_is_401() {
        let headers = HeaderMap::new();
        assert!(matches!(
            extract_api_key(&headers),
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[test]
    fn non_bearer_authorization_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic Zm9v"));
        assert!(extract_api_key(&headers).is_err());
    }

    #[test]
    fn forwarded_for_first_value_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers, peer()), "203.0.113.7");
    }

    #[test]
    fn peer_used_without_forwarded_header() {
        let headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, peer()), "10.0.0.9");
    }

    #[test]
    fn empty_forwarded_header_falls_back_to_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(""));
        assert_eq!(client_ip(&headers, peer()), "10.0.0.9");
    }
}
