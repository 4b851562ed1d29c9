//! Batches transcript turns per call before flushing to the [`Store`] (§4.8):
//! "buffer transcript turns per call and flush in batches of
//! `TranscriptBatchSize`... or every `TranscriptBatchInterval`". Flushes are
//! serialised behind one lock so concurrent pushes can never reorder a call's
//! turns (§9 open question, resolved: correctness over per-call parallelism).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use voice_types::{CallId, TranscriptTurn};

use crate::store::Store;

#[derive(Debug, Clone, Copy)]
pub struct TranscriptBufferConfig {
    pub batch_size: usize,
    pub batch_interval: Duration,
}

impl Default for TranscriptBufferConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            batch_interval: Duration::from_secs(10),
        }
    }
}

/// Owns no background task by itself; call [`TranscriptBuffer::spawn_flush_loop`]
/// once at startup and [`TranscriptBuffer::flush_all`] during graceful shutdown.
pub struct TranscriptBuffer<S> {
    store: Arc<S>,
    config: TranscriptBufferConfig,
    pending: Mutex<HashMap<CallId, Vec<TranscriptTurn>>>,
}

impl<S: Store + 'static> TranscriptBuffer<S> {
    pub fn new(store: Arc<S>, config: TranscriptBufferConfig) -> Self {
        Self {
            store,
            config,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Buffers `turn`; flushes this call's buffer immediately if it has
    /// reached `batch_size`. The flush happens while still holding the
    /// `pending` lock -- not released beforehand -- so it can never run
    /// concurrently with another push's flush or with [`flush_all`], which
    /// is what actually serialises flushes as the module doc promises.
    pub async fn push(&self, turn: TranscriptTurn) {
        let call_id = turn.call_id;
        let mut pending = self.pending.lock().await;
        let buf = pending.entry(call_id).or_default();
        buf.push(turn);
        if buf.len() >= self.config.batch_size {
            let batch = std::mem::take(buf);
            pending.remove(&call_id);
            self.write_batch(&mut pending, call_id, batch).await;
        }
    }

    /// Drains and flushes every non-empty buffer. Used both by the periodic
    /// tick and by shutdown drain. Holds the `pending` lock for the whole
    /// drain, same reasoning as [`push`](Self::push): a periodic tick must
    /// never overlap a size-triggered flush for the same call.
    pub async fn flush_all(&self) {
        let mut pending = self.pending.lock().await;
        let drained: Vec<(CallId, Vec<TranscriptTurn>)> =
            pending.drain().filter(|(_, turns)| !turns.is_empty()).collect();
        for (call_id, batch) in drained {
            self.write_batch(&mut pending, call_id, batch).await;
        }
    }

    /// Writes one call's batch to the store, re-buffering it on failure.
    /// Callers must already hold `pending`'s lock and pass it through, so
    /// the write stays inside the same critical section as the buffer
    /// mutation that produced `batch`.
    async fn write_batch(
        &self,
        pending: &mut MutexGuard<'_, HashMap<CallId, Vec<TranscriptTurn>>>,
        call_id: CallId,
        batch: Vec<TranscriptTurn>,
    ) {
        if batch.is_empty() {
            return;
        }
        if let Err(err) = self.store.append_transcript(call_id, batch.clone()).await {
            tracing::error!(%call_id, %err, "transcript flush failed, re-buffering for retry");
            pending.entry(call_id).or_default().splice(0..0, batch);
        }
    }

    /// Spawns the periodic flush tick; the returned handle should be aborted
    /// (or left to finish) once [`flush_all`](Self::flush_all) has drained
    /// everything during shutdown.
    pub fn spawn_flush_loop(self: Arc<Self>) -> JoinHandle<()> {
        let mut interval = tokio::time::interval(self.config.batch_interval);
        tokio::spawn(async move {
            loop {
                interval.tick().await;
                self.flush_all().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::memory::MemoryStore;
    use crate::store::{CallFilter, JobFilter};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use voice_types::{Agent, JobId, RetryAttempt, ScheduledJob};
    use voice_types::{PhoneNumber, Speaker};

    /// Wraps [`MemoryStore`] and makes `append_transcript` a slow
    /// read-modify-write -- the same shape as `MongoStore::append_transcript`
    /// (get, mutate, put back) -- so a test can detect two calls for the
    /// same call overlapping in time, which would silently drop turns on
    /// the real Mongo backend.
    struct SlowAppendStore {
        inner: Arc<MemoryStore>,
        in_flight: AtomicUsize,
        max_observed_concurrency: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Store for SlowAppendStore {
        async fn insert_call(&self, call: voice_types::Call) -> Result<()> {
            self.inner.insert_call(call).await
        }
        async fn get_call(&self, id: CallId) -> Result<Option<voice_types::Call>> {
            self.inner.get_call(id).await
        }
        async fn update_call(&self, call: voice_types::Call) -> Result<()> {
            self.inner.update_call(call).await
        }
        async fn find_call_by_provider_id(&self, provider_call_id: &str) -> Result<Option<voice_types::Call>> {
            self.inner.find_call_by_provider_id(provider_call_id).await
        }
        async fn list_calls(&self, filter: CallFilter) -> Result<Vec<voice_types::Call>> {
            self.inner.list_calls(filter).await
        }
        async fn append_transcript(&self, call_id: CallId, turns: Vec<TranscriptTurn>) -> Result<()> {
            let concurrency = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_observed_concurrency.fetch_max(concurrency, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            let result = self.inner.append_transcript(call_id, turns).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
        async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>> {
            self.inner.get_agent(agent_id).await
        }
        async fn insert_job(&self, job: ScheduledJob) -> Result<()> {
            self.inner.insert_job(job).await
        }
        async fn get_job(&self, id: &JobId) -> Result<Option<ScheduledJob>> {
            self.inner.get_job(id).await
        }
        async fn update_job(&self, job: ScheduledJob) -> Result<()> {
            self.inner.update_job(job).await
        }
        async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<ScheduledJob>> {
            self.inner.list_jobs(filter).await
        }
        async fn due_jobs(&self, now: chrono::DateTime<chrono::Utc>) -> Result<Vec<ScheduledJob>> {
            self.inner.due_jobs(now).await
        }
        async fn insert_retry_attempt(&self, attempt: RetryAttempt) -> Result<()> {
            self.inner.insert_retry_attempt(attempt).await
        }
        async fn get_retry_attempt(&self, id: uuid::Uuid) -> Result<Option<RetryAttempt>> {
            self.inner.get_retry_attempt(id).await
        }
        async fn update_retry_attempt(&self, attempt: RetryAttempt) -> Result<()> {
            self.inner.update_retry_attempt(attempt).await
        }
        async fn list_retry_attempts_for_call(&self, original_call_id: CallId) -> Result<Vec<RetryAttempt>> {
            self.inner.list_retry_attempts_for_call(original_call_id).await
        }
    }

    fn turn(call_id: CallId, text: &str) -> TranscriptTurn {
        TranscriptTurn::new(call_id, Speaker::User, text)
    }

    async fn seeded_store() -> (Arc<MemoryStore>, CallId) {
        let store = Arc::new(MemoryStore::new());
        let call = voice_types::Call::new_outbound(
            PhoneNumber::parse("+14155552671").unwrap(),
            "agent-1".into(),
            None,
            chrono::Utc::now(),
            serde_json::Value::Null,
        );
        let call_id = call.id;
        store.insert_call(call).await.unwrap();
        (store, call_id)
    }

    #[tokio::test]
    async fn flushes_automatically_at_batch_size() {
        let (store, call_id) = seeded_store().await;
        let buffer = TranscriptBuffer::new(
            store.clone(),
            TranscriptBufferConfig {
                batch_size: 2,
                batch_interval: Duration::from_secs(3600),
            },
        );
        buffer.push(turn(call_id, "one")).await;
        buffer.push(turn(call_id, "two")).await;
        let call = store.get_call(call_id).await.unwrap().unwrap();
        let turns = call.metadata.get("transcript").unwrap().as_array().unwrap();
        assert_eq!(turns.len(), 2);
    }

    #[tokio::test]
    async fn flush_all_drains_partial_buffers() {
        let (store, call_id) = seeded_store().await;
        let buffer = TranscriptBuffer::new(
            store.clone(),
            TranscriptBufferConfig {
                batch_size: 100,
                batch_interval: Duration::from_secs(3600),
            },
        );
        buffer.push(turn(call_id, "only one")).await;
        buffer.flush_all().await;
        let call = store.get_call(call_id).await.unwrap().unwrap();
        let turns = call.metadata.get("transcript").unwrap().as_array().unwrap();
        assert_eq!(turns.len(), 1);
    }

    /// A size-triggered flush from `push` racing a periodic `flush_all` for
    /// the same call must never let two `append_transcript` calls for that
    /// call overlap -- on a real-modify-write backend like `MongoStore`,
    /// overlap silently drops the loser's turns (§8 property 8).
    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_push_and_flush_all_never_overlap_for_the_same_call() {
        let memory = Arc::new(MemoryStore::new());
        let call = voice_types::Call::new_outbound(
            PhoneNumber::parse("+14155552671").unwrap(),
            "agent-1".into(),
            None,
            chrono::Utc::now(),
            serde_json::Value::Null,
        );
        let call_id = call.id;
        memory.insert_call(call).await.unwrap();

        let store = Arc::new(SlowAppendStore {
            inner: memory,
            in_flight: AtomicUsize::new(0),
            max_observed_concurrency: AtomicUsize::new(0),
        });
        let buffer = Arc::new(TranscriptBuffer::new(
            store.clone(),
            TranscriptBufferConfig {
                batch_size: 2,
                batch_interval: Duration::from_secs(3600),
            },
        ));

        // Pre-fill one turn below the batch size, then race a second push
        // (which trips the size-triggered flush) against `flush_all`.
        buffer.push(turn(call_id, "zero")).await;

        let push_buffer = buffer.clone();
        let pusher = tokio::spawn(async move {
            push_buffer.push(turn(call_id, "one")).await;
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        let flush_buffer = buffer.clone();
        let flusher = tokio::spawn(async move {
            flush_buffer.flush_all().await;
        });

        pusher.await.unwrap();
        flusher.await.unwrap();
        buffer.flush_all().await;

        assert_eq!(
            store.max_observed_concurrency.load(Ordering::SeqCst),
            1,
            "append_transcript must never run concurrently for the same call"
        );
        let call = store.get_call(call_id).await.unwrap().unwrap();
        let turns = call.metadata.get("transcript").unwrap().as_array().unwrap();
        assert_eq!(turns.len(), 2, "no turn should be lost to a lost write");
    }
}
