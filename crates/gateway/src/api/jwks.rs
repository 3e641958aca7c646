//! JWKS client for admin-token verification.
//!
//! The identity provider publishes its signing keys at
//! `{base}/auth/v1/.well-known/jwks.json`. Keys are cached in-process
//! for an hour; the refresh happens outside any lock so readers never
//! block on the fetch.

use std::time::{Duration, Instant};

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::DecodingKey;
use parking_lot::RwLock;

use spark_domain::error::{Error, Result};

const JWKS_TTL: Duration = Duration::from_secs(3600);

struct CachedKeys {
    fetched_at: Instant,
    keys: JwkSet,
}

pub struct JwksCache {
    url: String,
    http: reqwest::Client,
    cached: RwLock<Option<CachedKeys>>,
}

impl JwksCache {
    pub fn new(identity_base_url: &str) -> Self {
        Self {
            url: format!(
                "{}/auth/v1/.well-known/jwks.json",
                identity_base_url.trim_end_matches('/')
            ),
            http: reqwest::Client::new(),
            cached: RwLock::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Resolve the decoding key for a token's `kid`, refreshing the key
    /// set when the cache is stale or the kid is unknown.
    pub async fn decoding_key(&self, kid: &str) -> Result<DecodingKey> {
        if let Some(key) = self.lookup(kid, false) {
            return key;
        }

        // Stale or unknown kid (rotation): fetch a fresh set.
        let keys: JwkSet = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::Auth(format!("JWKS fetch failed: {e}")))?
            .json()
            .await
            .map_err(|e| Error::Auth(format!("JWKS parse failed: {e}")))?;

        tracing::info!(url = %self.url, keys = keys.keys.len(), "JWKS refreshed");
        *self.cached.write() = Some(CachedKeys {
            fetched_at: Instant::now(),
            keys,
        });

        self.lookup(kid, true)
            .unwrap_or_else(|| Err(Error::Auth(format!("no JWKS key for kid '{kid}'"))))
    }

    /// Try the cache. `allow_stale` skips the TTL check (right after a
    /// refresh).
    fn lookup(&self, kid: &str, allow_stale: bool) -> Option<Result<DecodingKey>> {
        let cached = self.cached.read();
        let entry = cached.as_ref()?;
        if !allow_stale && entry.fetched_at.elapsed() > JWKS_TTL {
            return None;
        }
        let jwk = entry.keys.find(kid)?;
        Some(
            DecodingKey::from_jwk(jwk)
                .map_err(|e| Error::Auth(format!("bad JWK for kid '{kid}': {e}"))),
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_is_the_well_known_path() {
        let cache = JwksCache::new("https://proj.supabase.co/");
        assert_eq!(
            cache.url(),
            "https://proj.supabase.co/auth/v1/.well-known/jwks.json"
        );
    }

    #[test]
    fn empty_cache_misses() {
        let cache = JwksCache::new("https://proj.supabase.co");
        assert!(cache.lookup("kid-1", false).is_none());
        assert!(cache.lookup("kid-1", true).is_none());
    }
}
