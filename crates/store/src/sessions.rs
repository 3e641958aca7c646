//! Session lifecycle on top of raw conversation rows.
//!
//! Sessions are IP-bound and expire after a configurable idle timeout.
//! Tokens carry 256 bits of entropy, rendered URL-safe.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use rand::RngCore;

use spark_domain::error::Result;
use spark_domain::types::{Conversation, ConversationState, Outcome};

use crate::provider::SparkStore;

/// Generate a fresh session token: 32 random bytes, URL-safe base64.
pub fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Create a new conversation for the given tenant and caller IP.
pub async fn create_session(
    store: &dyn SparkStore,
    client_id: uuid::Uuid,
    ip_address: &str,
    fingerprint: Option<&str>,
    timeout_minutes: u32,
) -> Result<Conversation> {
    let token = generate_session_token();
    let expires_at = Utc::now() + Duration::minutes(timeout_minutes as i64);
    let conversation = store
        .create_conversation(client_id, &token, ip_address, fingerprint, expires_at)
        .await?;
    tracing::info!(
        conversation_id = %conversation.id,
        client_id = %client_id,
        "session created"
    );
    Ok(conversation)
}

/// Resolve a session token for a caller IP.
///
/// Returns `None` when the token is unknown, the conversation is no
/// longer active, the IP does not match, or the session has expired.
/// Expiry is a one-way transition: the row moves to
/// `expired`/`abandoned` with `ended_at` set, then resolves as absent.
pub async fn resolve_session(
    store: &dyn SparkStore,
    token: &str,
    ip_address: &str,
) -> Result<Option<Conversation>> {
    let Some(conversation) = store.active_conversation_by_token(token).await? else {
        return Ok(None);
    };

    if conversation.ip_address != ip_address {
        // Presenting a valid token from a new IP starts a fresh
        // conversation; the original stays bound to its IP.
        tracing::warn!(
            conversation_id = %conversation.id,
            expected = %conversation.ip_address,
            got = %ip_address,
            "session IP mismatch"
        );
        return Ok(None);
    }

    if Utc::now() > conversation.expires_at {
        tracing::info!(conversation_id = %conversation.id, "session expired");
        store
            .end_conversation(
                conversation.id,
                ConversationState::Expired,
                Some(Outcome::Abandoned),
            )
            .await?;
        return Ok(None);
    }

    Ok(Some(conversation))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_url_safe_and_long_enough() {
        let token = generate_session_token();
        // 32 bytes -> 43 base64 chars without padding.
        assert_eq!(token.len(), 43);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn tokens_are_unique() {
        let a = generate_session_token();
        let b = generate_session_token();
        assert_ne!(a, b);
    }
}
