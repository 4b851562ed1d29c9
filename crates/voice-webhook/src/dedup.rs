//! Idempotency cache for webhook delivery (SPEC_FULL §G.4): the same
//! `(providerCallId, status)` pair seen twice within the TTL must not
//! re-trigger a retry or double-apply a transition.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);
const MAX_ENTRIES: usize = 10_000;

pub struct DedupCache {
    ttl: Duration,
    seen: Mutex<HashMap<(String, String), Instant>>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` the first time this key is observed (or after its
    /// prior entry has expired), `false` on a within-TTL duplicate.
    pub fn observe(&self, provider_call_id: &str, status: &str) -> bool {
        let key = (provider_call_id.to_string(), status.to_string());
        let now = Instant::now();
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());

        if seen.len() > MAX_ENTRIES {
            seen.retain(|_, at| now.duration_since(*at) < self.ttl);
        }

        match seen.get(&key) {
            Some(at) if now.duration_since(*at) < self.ttl => false,
            _ => {
                seen.insert(key, now);
                true
            }
        }
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new()
    }
}
