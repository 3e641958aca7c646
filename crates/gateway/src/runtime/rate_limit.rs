//! In-memory sliding-window rate limiter.
//!
//! Keyed by `client_id:ip` on the widget surface and by
//! `admin:<token-hash-prefix>` on the admin surface. State is volatile:
//! a restart resets every window (documented MVP limitation).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use uuid::Uuid;

const WINDOW: Duration = Duration::from_secs(60);

/// Sliding window limiter. The hot path is short — prune, length check,
/// append — and holds the lock for its whole (non-async) duration.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, Vec<Instant>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Admit or reject a widget request for `(client, ip)`.
    pub fn check(&self, client_id: Uuid, ip: &str, rpm_limit: u32) -> bool {
        self.check_key_at(&format!("{client_id}:{ip}"), rpm_limit, Instant::now())
    }

    /// Admit or reject an admin request, keyed by a token-hash prefix.
    pub fn check_admin(&self, token_hash_prefix: &str, rpm_limit: u32) -> bool {
        self.check_key_at(
            &format!("admin:{token_hash_prefix}"),
            rpm_limit,
            Instant::now(),
        )
    }

    fn check_key_at(&self, key: &str, rpm_limit: u32, now: Instant) -> bool {
        let mut windows = self.windows.lock();
        let timestamps = windows.entry(key.to_string()).or_default();

        // checked_sub: Instant can't represent times before process epoch.
        let window_start = now.checked_sub(WINDOW);
        timestamps.retain(|t| window_start.map_or(true, |ws| *t > ws));

        if timestamps.len() >= rpm_limit as usize {
            tracing::warn!(key = %key, rpm_limit, "rate limit hit");
            return false;
        }

        timestamps.push(now);
        true
    }

    /// Clear all windows (tests).
    pub fn reset(&self) {
        self.windows.lock().clear();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_limit_then_rejects() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        for _ in 0..30 {
            assert!(limiter.check_key_at("c:1.2.3.4", 30, now));
        }
        // Admission limit+1 inside the window is rejected.
        assert!(!limiter.check_key_at("c:1.2.3.4", 30, now));
    }

    #[test]
    fn admits_again_after_window_elapses() {
        let limiter = RateLimiter::new();
        let start = Instant::now();
        for _ in 0..5 {
            assert!(limiter.check_key_at("k", 5, start));
        }
        assert!(!limiter.check_key_at("k", 5, start));

        // 61 seconds later the old timestamps have aged out.
        let later = start + Duration::from_secs(61);
        assert!(limiter.check_key_at("k", 5, later));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        assert!(limiter.check_key_at("a:1.1.1.1", 1, now));
        assert!(!limiter.check_key_at("a:1.1.1.1", 1, now));
        // Same tenant, different IP — separate window.
        assert!(limiter.check_key_at("a:2.2.2.2", 1, now));
        // Admin namespace never collides with widget keys.
        assert!(limiter.check_key_at("admin:a", 1, now));
    }

    #[test]
    fn reset_clears_windows() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        assert!(limiter.check_key_at("k", 1, now));
        assert!(!limiter.check_key_at("k", 1, now));
        limiter.reset();
        assert!(limiter.check_key_at("k", 1, now));
    }

    #[test]
    fn partial_expiry_frees_exactly_the_aged_slots() {
        let limiter = RateLimiter::new();
        let start = Instant::now();
        assert!(limiter.check_key_at("k", 2, start));
        assert!(limiter.check_key_at("k", 2, start + Duration::from_secs(30)));
        assert!(!limiter.check_key_at("k", 2, start + Duration::from_secs(31)));
        // First admission ages out at +60s; the +30s one remains.
        let later = start + Duration::from_secs(62);
        assert!(limiter.check_key_at("k", 2, later));
        assert!(!limiter.check_key_at("k", 2, later));
    }
}
