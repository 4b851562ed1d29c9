//! C1: bounded pool of live streaming STT connections (§4.1).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::PoolError;
use crate::events::{SttEvent, SttOptions};
use crate::status::PoolSnapshot;

/// A live, bidirectional streaming STT connection. The pool abstracts the
/// underlying transport (§6 "STT (streaming)").
#[async_trait]
pub trait SttStream: Send {
    async fn send_audio(&mut self, frame: &[u8]) -> Result<(), String>;
    async fn next_event(&mut self) -> Option<SttEvent>;
    async fn close(&mut self);
}

/// Factory for upstream STT connections, injected into the pool (DESIGN
/// NOTES: "global singleton services" -> explicit dependency-injected
/// components with lifecycle).
#[async_trait]
pub trait SttConnector: Send + Sync {
    async fn connect(
        &self,
        client_id: &str,
        options: &SttOptions,
    ) -> Result<Box<dyn SttStream>, String>;
}

#[derive(Default)]
struct LifetimeCounters {
    acquired: AtomicU64,
    released: AtomicU64,
    queued: AtomicU64,
    timeouts: AtomicU64,
    failures: AtomicU64,
}

struct Waiter {
    client_id: String,
    resolver: oneshot::Sender<()>,
}

struct PoolState {
    active: HashMap<String, ()>,
    queue: VecDeque<Waiter>,
}

/// Configuration for [`SttPool`] (§4.1 defaults).
#[derive(Debug, Clone)]
pub struct SttPoolConfig {
    pub capacity: u32,
    pub queue_timeout: Duration,
    pub max_queue_len: u32,
}

impl Default for SttPoolConfig {
    fn default() -> Self {
        Self {
            capacity: 20,
            queue_timeout: Duration::from_secs(30),
            max_queue_len: 50,
        }
    }
}

/// Bounded pool guaranteeing at most `capacity` concurrent upstream STT
/// connections, with a strict-FIFO overflow queue.
pub struct SttPool<C: SttConnector> {
    connector: Arc<C>,
    config: SttPoolConfig,
    state: Mutex<PoolState>,
    counters: LifetimeCounters,
}

/// An acquired STT slot. Exactly one session owns this handle at a time; it
/// must be released via [`SttSlot::release`] on every exit path. Dropping it
/// without releasing is treated as a bug and logged, with a best-effort
/// background release so the pool doesn't leak capacity.
pub struct SttSlot<C: SttConnector> {
    pool: Arc<SttPool<C>>,
    client_id: String,
    stream: Option<Box<dyn SttStream>>,
    released: bool,
}

impl<C: SttConnector> SttSlot<C> {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub async fn send_audio(&mut self, frame: &[u8]) -> Result<(), String> {
        match &mut self.stream {
            Some(s) => s.send_audio(frame).await,
            None => Err("slot has no active stream".to_string()),
        }
    }

    pub async fn next_event(&mut self) -> Option<SttEvent> {
        match &mut self.stream {
            Some(s) => s.next_event().await,
            None => None,
        }
    }

    /// Idempotent teardown: closes the upstream connection, removes this
    /// client from the active set, and wakes the next queued waiter.
    pub async fn release(mut self) {
        if self.released {
            return;
        }
        if let Some(mut stream) = self.stream.take() {
            stream.close().await;
        }
        self.pool.release(&self.client_id).await;
        self.released = true;
    }
}

impl<C: SttConnector> Drop for SttSlot<C> {
    fn drop(&mut self) {
        if !self.released {
            warn!(client_id = %self.client_id, "STT slot dropped without explicit release; releasing in background");
            let pool = self.pool.clone();
            let client_id = self.client_id.clone();
            tokio::spawn(async move {
                pool.release(&client_id).await;
            });
        }
    }
}

impl<C: SttConnector + 'static> SttPool<C> {
    pub fn new(connector: C, config: SttPoolConfig) -> Arc<Self> {
        Arc::new(Self {
            connector: Arc::new(connector),
            config,
            state: Mutex::new(PoolState {
                active: HashMap::new(),
                queue: VecDeque::new(),
            }),
            counters: LifetimeCounters::default(),
        })
    }

    /// Acquire a streaming STT slot for `client_id`, queueing FIFO on
    /// overflow (§4.1 algorithm).
    pub async fn acquire(
        self: &Arc<Self>,
        client_id: impl Into<String>,
        options: SttOptions,
    ) -> Result<SttSlot<C>, PoolError> {
        let client_id = client_id.into();
        let reserved = {
            let mut state = self.state.lock().await;
            if (state.active.len() as u32) < self.config.capacity {
                state.active.insert(client_id.clone(), ());
                true
            } else if (state.queue.len() as u32) >= self.config.max_queue_len {
                return Err(PoolError::QueueFull {
                    max_queue_len: self.config.max_queue_len,
                });
            } else {
                let (tx, rx) = oneshot::channel();
                state.queue.push_back(Waiter {
                    client_id: client_id.clone(),
                    resolver: tx,
                });
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
                debug!(client_id = %client_id, queue_len = state.queue.len(), "STT acquire queued");
                drop(state);
                match tokio::time::timeout(self.config.queue_timeout, rx).await {
                    Ok(Ok(())) => true,
                    Ok(Err(_)) | Err(_) => {
                        self.expire_waiter(&client_id).await;
                        self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                        return Err(PoolError::PoolTimeout);
                    }
                }
            }
        };
        debug_assert!(reserved);

        match self.connector.connect(&client_id, &options).await {
            Ok(stream) => {
                self.counters.acquired.fetch_add(1, Ordering::Relaxed);
                Ok(SttSlot {
                    pool: self.clone(),
                    client_id,
                    stream: Some(stream),
                    released: false,
                })
            }
            Err(reason) => {
                // Provider failure must not consume a slot.
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                self.release(&client_id).await;
                Err(PoolError::ProviderError(reason))
            }
        }
    }

    /// Remove a timed-out waiter from the queue (it never held a slot).
    async fn expire_waiter(&self, client_id: &str) {
        let mut state = self.state.lock().await;
        if let Some(pos) = state.queue.iter().position(|w| w.client_id == client_id) {
            state.queue.remove(pos);
        }
    }

    /// Release a slot held by `client_id`: decrement active, and if a
    /// waiter is queued, hand the freed slot to the head of the FIFO queue.
    async fn release(&self, client_id: &str) {
        let mut state = self.state.lock().await;
        state.active.remove(client_id);
        self.counters.released.fetch_add(1, Ordering::Relaxed);
        while let Some(waiter) = state.queue.pop_front() {
            state.active.insert(waiter.client_id.clone(), ());
            if waiter.resolver.send(()).is_ok() {
                return;
            }
            // Receiver already gone (e.g. it timed out right as we woke it);
            // undo the reservation and try the next waiter.
            state.active.remove(&waiter.client_id);
        }
    }

    pub async fn snapshot(&self) -> PoolSnapshot {
        let state = self.state.lock().await;
        PoolSnapshot {
            active: state.active.len() as u32,
            queued: state.queue.len() as u32,
            capacity: self.config.capacity,
            lifetime_acquired: self.counters.acquired.load(Ordering::Relaxed),
            lifetime_released: self.counters.released.load(Ordering::Relaxed),
            lifetime_queued: self.counters.queued.load(Ordering::Relaxed),
            lifetime_timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            lifetime_failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }
}

/// Generates unique client ids for callers that don't already have one
/// (e.g. tests standing up ad-hoc sessions).
pub fn new_client_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::mpsc;

    struct FakeStream {
        events: mpsc::UnboundedReceiver<SttEvent>,
    }

    #[async_trait]
    impl SttStream for FakeStream {
        async fn send_audio(&mut self, _frame: &[u8]) -> Result<(), String> {
            Ok(())
        }
        async fn next_event(&mut self) -> Option<SttEvent> {
            self.events.recv().await
        }
        async fn close(&mut self) {}
    }

    struct FakeConnector {
        fail_next: AtomicBool,
    }

    impl FakeConnector {
        fn new() -> Self {
            Self {
                fail_next: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl SttConnector for FakeConnector {
        async fn connect(
            &self,
            _client_id: &str,
            _options: &SttOptions,
        ) -> Result<Box<dyn SttStream>, String> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err("upstream rejected".to_string());
            }
            let (_tx, rx) = mpsc::unbounded_channel();
            Ok(Box::new(FakeStream { events: rx }))
        }
    }

    fn opts() -> SttOptions {
        SttOptions {
            language: "en-US".to_string(),
            endpointing_ms: 500,
            vad_enabled: true,
            model: None,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn acquire_and_release_within_capacity() {
        let pool = SttPool::new(
            FakeConnector::new(),
            SttPoolConfig {
                capacity: 2,
                ..Default::default()
            },
        );
        let slot = pool.acquire("a", opts()).await.unwrap();
        let snap = pool.snapshot().await;
        assert_eq!(snap.active, 1);
        slot.release().await;
        let snap = pool.snapshot().await;
        assert_eq!(snap.active, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn capacity_is_never_exceeded() {
        let pool = SttPool::new(
            FakeConnector::new(),
            SttPoolConfig {
                capacity: 2,
                queue_timeout: Duration::from_millis(200),
                max_queue_len: 50,
            },
        );
        let s1 = pool.acquire("a", opts()).await.unwrap();
        let s2 = pool.acquire("b", opts()).await.unwrap();
        assert_eq!(pool.snapshot().await.active, 2);

        let pool2 = pool.clone();
        let waiter = tokio::spawn(async move { pool2.acquire("c", opts()).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.snapshot().await.queued, 1);

        s1.release().await;
        let slot_c = waiter.await.unwrap().unwrap();
        assert_eq!(pool.snapshot().await.active, 2);
        slot_c.release().await;
        s2.release().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn queue_full_is_reported_distinctly() {
        let pool = SttPool::new(
            FakeConnector::new(),
            SttPoolConfig {
                capacity: 1,
                queue_timeout: Duration::from_secs(30),
                max_queue_len: 1,
            },
        );
        let s1 = pool.acquire("a", opts()).await.unwrap();
        let pool2 = pool.clone();
        let _queued = tokio::spawn(async move { pool2.acquire("b", opts()).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = pool.acquire("c", opts()).await.unwrap_err();
        assert!(matches!(err, PoolError::QueueFull { .. }));
        s1.release().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pool_timeout_returns_capacity() {
        let pool = SttPool::new(
            FakeConnector::new(),
            SttPoolConfig {
                capacity: 1,
                queue_timeout: Duration::from_millis(50),
                max_queue_len: 50,
            },
        );
        let _s1 = pool.acquire("a", opts()).await.unwrap();
        let err = pool.acquire("b", opts()).await.unwrap_err();
        assert!(matches!(err, PoolError::PoolTimeout));
        assert_eq!(pool.snapshot().await.queued, 0, "timed-out waiter must not linger in queue");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn provider_error_does_not_consume_a_slot() {
        let connector = FakeConnector::new();
        connector.fail_next.store(true, Ordering::SeqCst);
        let pool = SttPool::new(connector, SttPoolConfig::default());
        let err = pool.acquire("a", opts()).await.unwrap_err();
        assert!(matches!(err, PoolError::ProviderError(_)));
        assert_eq!(pool.snapshot().await.active, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn release_is_strict_fifo() {
        let pool = SttPool::new(
            FakeConnector::new(),
            SttPoolConfig {
                capacity: 1,
                queue_timeout: Duration::from_secs(5),
                max_queue_len: 10,
            },
        );
        let s1 = pool.acquire("a", opts()).await.unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let pool_b = pool.clone();
        let order_b = order.clone();
        let b = tokio::spawn(async move {
            let slot = pool_b.acquire("b", opts()).await.unwrap();
            order_b.lock().await.push("b");
            slot
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let pool_c = pool.clone();
        let order_c = order.clone();
        let c = tokio::spawn(async move {
            let slot = pool_c.acquire("c", opts()).await.unwrap();
            order_c.lock().await.push("c");
            slot
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        s1.release().await;
        let slot_b = b.await.unwrap();
        slot_b.release().await;
        let slot_c = c.await.unwrap();
        assert_eq!(*order.lock().await, vec!["b", "c"]);
        slot_c.release().await;
    }
}
