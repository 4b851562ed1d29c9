//! C2: per-provider concurrency-limited synthesis dispatcher (§4.2).

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tracing::debug;

/// Synthesis request parameters (§4.2).
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub voice_id: String,
    pub model: Option<String>,
}

struct ProviderLane {
    semaphore: Arc<Semaphore>,
    cap: u32,
    queued: AtomicU32,
}

/// Per-provider concurrency caps, applied to synthesis requests. The queue
/// is provider-specific because upstream caps differ (§4.2 "Policy").
pub struct TtsQueue {
    lanes: Mutex<HashMap<String, Arc<ProviderLane>>>,
    default_caps: HashMap<String, u32>,
}

impl TtsQueue {
    pub fn new(default_caps: HashMap<String, u32>) -> Arc<Self> {
        Arc::new(Self {
            lanes: Mutex::new(HashMap::new()),
            default_caps,
        })
    }

    async fn lane_for(&self, provider: &str) -> Arc<ProviderLane> {
        let mut lanes = self.lanes.lock().await;
        if let Some(lane) = lanes.get(provider) {
            return lane.clone();
        }
        let cap = *self.default_caps.get(provider).unwrap_or(&10);
        let lane = Arc::new(ProviderLane {
            semaphore: Arc::new(Semaphore::new(cap as usize)),
            cap,
            queued: AtomicU32::new(0),
        });
        lanes.insert(provider.to_string(), lane.clone());
        lane
    }

    /// Run `task` while holding one of `provider`'s synthesis slots,
    /// queueing FIFO on overflow with no timeout imposed by the queue
    /// itself (§4.2 algorithm). The slot is released on completion whether
    /// `task` succeeds or fails.
    pub async fn synthesize<F, Fut, T, E>(&self, provider: &str, task: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let lane = self.lane_for(provider).await;
        lane.queued.fetch_add(1, Ordering::Relaxed);
        debug!(provider, "TTS request waiting for a synthesis slot");
        // tokio::sync::Semaphore serves waiters in FIFO order.
        let permit = lane
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore is never closed");
        lane.queued.fetch_sub(1, Ordering::Relaxed);
        let result = task().await;
        drop(permit);
        result
    }

    pub async fn snapshot(&self, provider: &str) -> TtsLaneSnapshot {
        let lanes = self.lanes.lock().await;
        match lanes.get(provider) {
            Some(lane) => TtsLaneSnapshot {
                provider: provider.to_string(),
                cap: lane.cap,
                active: lane.cap - lane.semaphore.available_permits() as u32,
                queued: lane.queued.load(Ordering::Relaxed),
            },
            None => TtsLaneSnapshot {
                provider: provider.to_string(),
                cap: *self.default_caps.get(provider).unwrap_or(&10),
                active: 0,
                queued: 0,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct TtsLaneSnapshot {
    pub provider: String,
    pub cap: u32,
    pub active: u32,
    pub queued: u32,
}

impl TtsLaneSnapshot {
    /// Whether the primary provider's queue is over the given threshold, so
    /// the session can switch to a fallback provider (§4.2 "Policy").
    pub fn over_threshold(&self, threshold: u32) -> bool {
        self.queued > threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn caps() -> HashMap<String, u32> {
        let mut m = HashMap::new();
        m.insert("provider-a".to_string(), 2);
        m
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cap_is_never_exceeded() {
        let queue = TtsQueue::new(caps());
        let active = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let queue = queue.clone();
            let active = active.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .synthesize::<_, _, (), ()>("provider-a", || async {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn slot_released_on_task_failure() {
        let queue = TtsQueue::new(caps());
        let err: Result<(), &str> = queue
            .synthesize("provider-a", || async { Err("boom") })
            .await;
        assert!(err.is_err());
        let snap = queue.snapshot("provider-a").await;
        assert_eq!(snap.active, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_provider_uses_default_cap() {
        let queue = TtsQueue::new(caps());
        let snap = queue.snapshot("provider-z").await;
        assert_eq!(snap.cap, 10);
    }

    #[test]
    fn over_threshold_detects_saturation() {
        let snap = TtsLaneSnapshot {
            provider: "provider-a".into(),
            cap: 10,
            active: 10,
            queued: 5,
        };
        assert!(snap.over_threshold(3));
        assert!(!snap.over_threshold(10));
    }
}
