//! Admin-surface authentication.
//!
//! The portal sends the identity provider's access token as a Bearer
//! token. We verify it against the JWKS endpoint (RS256 or ES256),
//! require the documented audience and a non-empty subject, then map
//! the subject to the owning tenant. Admin calls share the rate limiter
//! under a token-keyed namespace.

use axum::http::HeaderMap;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use spark_domain::types::Client;
use spark_store::SparkStore;

use crate::api::error::ApiError;
use crate::state::AppState;

const AUDIENCE: &str = "authenticated";

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    sub: String,
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("Missing authorization token".into()))
}

/// Only the asymmetric algorithms the provider actually signs with.
fn allowed_algorithm(alg: Algorithm) -> Result<Algorithm, ApiError> {
    match alg {
        Algorithm::RS256 | Algorithm::ES256 => Ok(alg),
        other => Err(ApiError::Unauthorized(format!(
            "Unsupported token algorithm {other:?}"
        ))),
    }
}

/// Verify the admin JWT and resolve the tenant it belongs to.
pub async fn authenticate_admin(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Client, ApiError> {
    let token = bearer_token(headers)?;

    // Rate limit keyed on a hash prefix of the token, in the admin
    // namespace so widget traffic can never starve portal calls.
    let token_hash = hex::encode(Sha256::digest(token.as_bytes()));
    if !state
        .rate_limiter
        .check_admin(&token_hash[..12], state.config.admin.rate_limit_rpm)
    {
        return Err(ApiError::RateLimited);
    }

    let header = decode_header(token)
        .map_err(|e| ApiError::Unauthorized(format!("Invalid token: {e}")))?;
    let alg = allowed_algorithm(header.alg)?;
    let kid = header
        .kid
        .ok_or_else(|| ApiError::Unauthorized("Invalid token: no key id".into()))?;

    let key = state
        .jwks
        .decoding_key(&kid)
        .await
        .map_err(|e| ApiError::Unauthorized(format!("Token verification failed: {e}")))?;

    let mut validation = Validation::new(alg);
    validation.set_audience(&[AUDIENCE]);

    let data = decode::<Claims>(token, &key, &validation)
        .map_err(|e| ApiError::Unauthorized(format!("Invalid token: {e}")))?;

    if data.claims.sub.is_empty() {
        return Err(ApiError::Unauthorized("Invalid token: no subject".into()));
    }

    let client = state
        .store
        .client_by_user_id(&data.claims.sub)
        .await
        .map_err(|e| ApiError::Internal(format!("client lookup failed: {e}")))?
        .ok_or_else(|| ApiError::Forbidden("No Spark client linked to this account".into()))?;

    if !client.active {
        return Err(ApiError::Forbidden("Client deactivated".into()));
    }
    Ok(client)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer tok.en"));
        assert_eq!(bearer_token(&headers).unwrap(), "tok.en");

        let empty = HeaderMap::new();
        assert!(bearer_token(&empty).is_err());
    }

    #[test]
    fn only_rs256_and_es256_allowed() {
        assert!(allowed_algorithm(Algorithm::RS256).is_ok());
        assert!(allowed_algorithm(Algorithm::ES256).is_ok());
        assert!(allowed_algorithm(Algorithm::HS256).is_err());
    }
}
