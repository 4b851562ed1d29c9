//! Prometheus gauges for pool occupancy (SPEC_FULL §F).

use prometheus::{IntGaugeVec, Opts, Registry};

/// Registers the three pool-occupancy gauge vectors once per process and
/// hands out per-pool label handles via [`PoolMetricsRegistry::for_pool`].
pub struct PoolMetricsRegistry {
    active: IntGaugeVec,
    queued: IntGaugeVec,
    capacity: IntGaugeVec,
}

impl PoolMetricsRegistry {
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let active = IntGaugeVec::new(
            Opts::new("voice_pool_active", "Active slots in use"),
            &["pool"],
        )?;
        registry.register(Box::new(active.clone()))?;

        let queued = IntGaugeVec::new(
            Opts::new("voice_pool_queued", "Waiters queued for a slot"),
            &["pool"],
        )?;
        registry.register(Box::new(queued.clone()))?;

        let capacity = IntGaugeVec::new(
            Opts::new("voice_pool_capacity", "Configured pool capacity"),
            &["pool"],
        )?;
        registry.register(Box::new(capacity.clone()))?;

        Ok(Self {
            active,
            queued,
            capacity,
        })
    }

    pub fn for_pool(&self, pool_name: &str) -> PoolMetrics {
        PoolMetrics {
            active: self.active.with_label_values(&[pool_name]),
            queued: self.queued.with_label_values(&[pool_name]),
            capacity: self.capacity.with_label_values(&[pool_name]),
        }
    }
}

/// Gauge handles scoped to one pool name.
pub struct PoolMetrics {
    active: prometheus::IntGauge,
    queued: prometheus::IntGauge,
    capacity: prometheus::IntGauge,
}

impl PoolMetrics {
    pub fn update(&self, snapshot: &crate::status::PoolSnapshot) {
        self.active.set(i64::from(snapshot.active));
        self.queued.set(i64::from(snapshot.queued));
        self.capacity.set(i64::from(snapshot.capacity));
    }
}
