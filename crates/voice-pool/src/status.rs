//! Shared health-bucket classification for C1/C2 pools (§4.1, SPEC_FULL §G.3).

use serde::{Deserialize, Serialize};

/// Alerting buckets derived from a pool's utilisation percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    Healthy,
    Moderate,
    High,
    Critical,
}

impl PoolStatus {
    /// Classify a utilisation percentage (0.0..=100.0) into a status bucket.
    /// healthy (<50%), moderate (50-75%), high (>=75%), critical (>=90%).
    pub fn from_utilisation_pct(pct: f64) -> Self {
        if pct >= 90.0 {
            PoolStatus::Critical
        } else if pct >= 75.0 {
            PoolStatus::High
        } else if pct >= 50.0 {
            PoolStatus::Moderate
        } else {
            PoolStatus::Healthy
        }
    }
}

/// A point-in-time snapshot of a bounded pool's occupancy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub active: u32,
    pub queued: u32,
    pub capacity: u32,
    pub lifetime_acquired: u64,
    pub lifetime_released: u64,
    pub lifetime_queued: u64,
    pub lifetime_timeouts: u64,
    pub lifetime_failures: u64,
}

impl PoolSnapshot {
    pub fn utilisation_pct(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            f64::from(self.active) / f64::from(self.capacity) * 100.0
        }
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus::from_utilisation_pct(self.utilisation_pct())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_match_spec_thresholds() {
        assert_eq!(PoolStatus::from_utilisation_pct(0.0), PoolStatus::Healthy);
        assert_eq!(PoolStatus::from_utilisation_pct(49.9), PoolStatus::Healthy);
        assert_eq!(PoolStatus::from_utilisation_pct(50.0), PoolStatus::Moderate);
        assert_eq!(PoolStatus::from_utilisation_pct(74.9), PoolStatus::Moderate);
        assert_eq!(PoolStatus::from_utilisation_pct(75.0), PoolStatus::High);
        assert_eq!(PoolStatus::from_utilisation_pct(89.9), PoolStatus::High);
        assert_eq!(PoolStatus::from_utilisation_pct(90.0), PoolStatus::Critical);
        assert_eq!(PoolStatus::from_utilisation_pct(100.0), PoolStatus::Critical);
    }

    #[test]
    fn snapshot_computes_utilisation() {
        let snap = PoolSnapshot {
            active: 15,
            queued: 0,
            capacity: 20,
            lifetime_acquired: 0,
            lifetime_released: 0,
            lifetime_queued: 0,
            lifetime_timeouts: 0,
            lifetime_failures: 0,
        };
        assert_eq!(snap.utilisation_pct(), 75.0);
        assert_eq!(snap.status(), PoolStatus::High);
    }

    #[test]
    fn zero_capacity_is_healthy_not_divide_by_zero() {
        let snap = PoolSnapshot {
            active: 0,
            queued: 0,
            capacity: 0,
            lifetime_acquired: 0,
            lifetime_released: 0,
            lifetime_queued: 0,
            lifetime_timeouts: 0,
            lifetime_failures: 0,
        };
        assert_eq!(snap.utilisation_pct(), 0.0);
    }
}
