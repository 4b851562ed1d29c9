//! `GET /metrics`: Prometheus text exposition, backed by
//! [`voice_pool::PoolMetricsRegistry`] for the STT pool plus the default
//! process collector the teacher registers on every binary.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, Registry, TextEncoder};

use voice_pool::{PoolMetricsRegistry, SttConnector, SttPool};

#[derive(Clone)]
pub struct MetricsState {
    registry: Arc<Registry>,
}

/// Registers the STT pool gauges and spawns the periodic snapshot tick
/// that keeps them current; returns the shared state for the `/metrics`
/// route.
pub fn install<C: SttConnector + 'static>(
    stt_pool: Arc<SttPool<C>>,
) -> Result<MetricsState, prometheus::Error> {
    let registry = Registry::new();
    registry.register(Box::new(prometheus::process_collector::ProcessCollector::for_self()))?;
    let pool_metrics = PoolMetricsRegistry::register(&registry)?;
    let gauges = pool_metrics.for_pool("stt");

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;
            gauges.update(&stt_pool.snapshot().await);
        }
    });

    Ok(MetricsState {
        registry: Arc::new(registry),
    })
}

pub fn routes() -> Router<MetricsState> {
    Router::new().route("/metrics", get(handle_metrics))
}

async fn handle_metrics(State(state): State<MetricsState>) -> Result<(StatusCode, [(header::HeaderName, &'static str); 1], Vec<u8>), StatusCode> {
    let metric_families = state.registry.gather();
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder
        .encode(&metric_families, &mut buf)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok((StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4")], buf))
}
