//! In-process registry of outbound calls currently in flight (§4.5 "active-
//! calls map"). Used for the concurrency cap and for C9's terminal-status
//! cleanup; entries older than an hour are swept as a backstop against
//! leaked registrations from calls whose webhook was lost.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

const SWEEP_AGE: Duration = Duration::from_secs(60 * 60);

#[derive(Default)]
pub struct ActiveCalls {
    entries: Mutex<HashMap<Uuid, DateTime<Utc>>>,
}

impl ActiveCalls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn register(&self, call_id: Uuid, at: DateTime<Utc>) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).insert(call_id, at);
    }

    /// Sweeps stale entries, checks the concurrency cap, and (if there's
    /// room) inserts `call_id` -- all under one lock acquisition, so a
    /// caller never observes a capacity reading that a concurrent caller
    /// can invalidate before it acts on it. Returns `false` without
    /// reserving anything once `max_concurrent_outbound` entries are live.
    pub fn try_reserve(&self, call_id: Uuid, now: DateTime<Utc>, max_concurrent_outbound: usize) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, registered_at| {
            now.signed_duration_since(*registered_at)
                .to_std()
                .map(|age| age < SWEEP_AGE)
                .unwrap_or(true)
        });
        if entries.len() >= max_concurrent_outbound {
            return false;
        }
        entries.insert(call_id, now);
        true
    }

    pub fn remove(&self, call_id: Uuid) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).remove(&call_id);
    }

    pub fn contains(&self, call_id: Uuid) -> bool {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).contains_key(&call_id)
    }

    /// Drops entries registered more than an hour before `now`. Returns how
    /// many were swept, for logging.
    pub fn sweep_stale(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, registered_at| {
            now.signed_duration_since(*registered_at)
                .to_std()
                .map(|age| age < SWEEP_AGE)
                .unwrap_or(true)
        });
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn register_and_remove_round_trip() {
        let active = ActiveCalls::new();
        let id = Uuid::new_v4();
        active.register(id, Utc::now());
        assert_eq!(active.len(), 1);
        active.remove(id);
        assert_eq!(active.len(), 0);
    }

    #[test]
    fn try_reserve_rejects_once_the_cap_is_reached() {
        let active = ActiveCalls::new();
        let now = Utc::now();
        assert!(active.try_reserve(Uuid::new_v4(), now, 2));
        assert!(active.try_reserve(Uuid::new_v4(), now, 2));
        assert!(!active.try_reserve(Uuid::new_v4(), now, 2));
        assert_eq!(active.len(), 2);
    }

    #[test]
    fn try_reserve_sweeps_stale_entries_before_checking_the_cap() {
        let active = ActiveCalls::new();
        let now = Utc::now();
        active.register(Uuid::new_v4(), now - ChronoDuration::hours(2));
        assert!(active.try_reserve(Uuid::new_v4(), now, 1));
    }

    #[test]
    fn sweep_drops_only_stale_entries() {
        let active = ActiveCalls::new();
        let now = Utc::now();
        let fresh = Uuid::new_v4();
        let stale = Uuid::new_v4();
        active.register(fresh, now);
        active.register(stale, now - ChronoDuration::hours(2));
        let swept = active.sweep_stale(now);
        assert_eq!(swept, 1);
        assert!(active.contains(fresh));
        assert!(!active.contains(stale));
    }
}
