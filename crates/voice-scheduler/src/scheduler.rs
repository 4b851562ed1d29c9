//! The delayed-job queue itself (§4.6).
//!
//! The `DelayQueue` lives entirely inside [`Scheduler::run`]'s task — no
//! other method ever touches it directly. `schedule`/`cancel`/`reschedule`
//! persist to the store (the source of truth) and then send a fire-and-
//! forget [`Command`] that only adjusts *when* the run loop wakes up.
//! [`Scheduler::dispatch_one`] re-checks the job's persisted status before
//! acting, so a stale or duplicate timer is harmless (§4.6 "exactly-once").

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::StreamExt;
use tokio_util::time::delay_queue::Key;
use tokio_util::time::DelayQueue;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use voice_persistence::{JobFilter, Store};
use voice_types::{BusinessHoursPolicy, CallId, JobId, JobKind, JobStatus, Recurrence, ScheduledJob};

use crate::business_hours::adjust_for_business_hours;
use crate::error::{Result, SchedulerError};
use crate::recurrence::next_run;

/// Invoked when a job becomes due; the concrete handlers (C5's `initiate`
/// for scheduled calls, C7's retry dispatch for retries) live in crates
/// that depend on this one, so the scheduler only knows this trait — never
/// a concrete orchestrator or retry engine (avoids a dependency cycle).
#[async_trait]
pub trait JobDispatchHandler: Send + Sync {
    async fn handle_scheduled_call(&self, call_id: CallId) -> std::result::Result<(), String>;
    async fn handle_retry(&self, retry_attempt_id: Uuid) -> std::result::Result<(), String>;
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleOptions {
    pub timezone: Option<chrono_tz::Tz>,
    pub business_hours_policy: Option<BusinessHoursPolicy>,
    pub recurrence: Option<Recurrence>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SchedulerStats {
    pub waiting: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub canceled: usize,
}

enum Command {
    Enqueue(ScheduledJob),
    Cancel(JobId),
    Reschedule(JobId, DateTime<Utc>),
}

pub struct Scheduler<S> {
    store: Arc<S>,
    commands_tx: mpsc::UnboundedSender<Command>,
    commands_rx: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
}

impl<S: Store> Scheduler<S> {
    pub fn new(store: Arc<S>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            store,
            commands_tx: tx,
            commands_rx: Mutex::new(Some(rx)),
        }
    }

    /// Re-arms timers for every still-pending job in the store. Call once
    /// at startup, before [`Scheduler::run`].
    pub async fn reload_pending(&self) -> Result<()> {
        let jobs = self
            .store
            .list_jobs(JobFilter {
                status: Some(JobStatus::Pending),
                call_id: None,
            })
            .await?;
        for job in jobs {
            let _ = self.commands_tx.send(Command::Enqueue(job));
        }
        Ok(())
    }

    /// `schedule(callId, dueAt, opts) -> jobId` (§4.6).
    #[instrument(skip(self, opts))]
    pub async fn schedule(&self, call_id: CallId, due_at: DateTime<Utc>, opts: ScheduleOptions) -> Result<JobId> {
        let due_at = match &opts.business_hours_policy {
            Some(policy) => adjust_for_business_hours(due_at, policy),
            None => due_at,
        };
        let job = ScheduledJob {
            id: format!("job-{}", Uuid::new_v4()),
            call_id,
            kind: JobKind::ScheduledCall { call_id },
            due_at,
            timezone: opts.timezone.unwrap_or(chrono_tz::UTC),
            status: JobStatus::Pending,
            business_hours_policy: opts.business_hours_policy,
            recurrence: opts.recurrence,
            next_run: None,
            processed_at: None,
            occurrence_count: 0,
        };
        self.enqueue(job).await
    }

    /// Enqueues a fully-built job (used by C7 for retries, whose job ids
    /// are deterministic). Exactly-once: if a job with this id already
    /// exists, this is a no-op.
    pub async fn enqueue(&self, job: ScheduledJob) -> Result<JobId> {
        if self.store.get_job(&job.id).await?.is_some() {
            info!(job_id = %job.id, "duplicate enqueue ignored");
            return Ok(job.id);
        }
        let job_id = job.id.clone();
        self.store.insert_job(job.clone()).await?;
        let _ = self.commands_tx.send(Command::Enqueue(job));
        Ok(job_id)
    }

    pub async fn cancel(&self, job_id: &JobId) -> Result<()> {
        let mut job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.clone()))?;
        if job.status != JobStatus::Pending {
            return Err(SchedulerError::NotPending(job_id.clone()));
        }
        job.transition(JobStatus::Canceled).ok();
        self.store.update_job(job).await?;
        let _ = self.commands_tx.send(Command::Cancel(job_id.clone()));
        Ok(())
    }

    pub async fn reschedule(&self, job_id: &JobId, new_due_at: DateTime<Utc>) -> Result<()> {
        let mut job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.clone()))?;
        if job.status != JobStatus::Pending {
            return Err(SchedulerError::NotPending(job_id.clone()));
        }
        let adjusted = match &job.business_hours_policy {
            Some(policy) => adjust_for_business_hours(new_due_at, policy),
            None => new_due_at,
        };
        job.due_at = adjusted;
        self.store.update_job(job).await?;
        let _ = self.commands_tx.send(Command::Reschedule(job_id.clone(), adjusted));
        Ok(())
    }

    pub async fn list(&self, filter: JobFilter) -> Result<Vec<ScheduledJob>> {
        Ok(self.store.list_jobs(filter).await?)
    }

    pub async fn stats(&self) -> Result<SchedulerStats> {
        let all = self.store.list_jobs(JobFilter::default()).await?;
        let mut stats = SchedulerStats::default();
        for job in &all {
            match job.status {
                JobStatus::Pending => stats.waiting += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Canceled => stats.canceled += 1,
            }
        }
        Ok(stats)
    }

    /// Drives dispatch. Owns the `DelayQueue` for the lifetime of the loop;
    /// may only be called once per `Scheduler` (a second call panics).
    pub async fn run(self: &Arc<Self>, handler: Arc<dyn JobDispatchHandler>) {
        let mut commands = self
            .commands_rx
            .lock()
            .await
            .take()
            .expect("Scheduler::run called more than once");

        let mut queue: DelayQueue<JobId> = DelayQueue::new();
        let mut keys: HashMap<JobId, Key> = HashMap::new();

        loop {
            tokio::select! {
                cmd = commands.recv() => {
                    match cmd {
                        Some(Command::Enqueue(job)) => {
                            let delay = (job.due_at - Utc::now()).to_std().unwrap_or(std::time::Duration::ZERO);
                            let key = queue.insert(job.id.clone(), delay);
                            keys.insert(job.id, key);
                        }
                        Some(Command::Cancel(job_id)) => {
                            if let Some(key) = keys.remove(&job_id) {
                                queue.try_remove(&key);
                            }
                        }
                        Some(Command::Reschedule(job_id, due_at)) => {
                            let delay = (due_at - Utc::now()).to_std().unwrap_or(std::time::Duration::ZERO);
                            if let Some(key) = keys.get(&job_id) {
                                queue.reset(key, delay);
                            } else {
                                let key = queue.insert(job_id.clone(), delay);
                                keys.insert(job_id, key);
                            }
                        }
                        None => break,
                    }
                }
                Some(expired) = queue.next(), if !queue.is_empty() => {
                    let job_id = expired.into_inner();
                    keys.remove(&job_id);
                    self.dispatch_one(job_id, &handler).await;
                }
            }
        }
    }

    async fn dispatch_one(&self, job_id: JobId, handler: &Arc<dyn JobDispatchHandler>) {
        let job = match self.store.get_job(&job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => return,
            Err(err) => {
                warn!(%job_id, %err, "failed to load due job");
                return;
            }
        };
        if job.status != JobStatus::Pending {
            return;
        }
        let mut job = job;
        if job.transition(JobStatus::Processing).is_err() {
            return;
        }
        if let Err(err) = self.store.update_job(job.clone()).await {
            warn!(%job_id, %err, "failed to mark job processing");
            return;
        }

        let outcome = match &job.kind {
            JobKind::ScheduledCall { call_id } => handler.handle_scheduled_call(*call_id).await,
            JobKind::Retry { retry_attempt_id } => handler.handle_retry(*retry_attempt_id).await,
        };

        match outcome {
            Ok(()) => {
                job.transition(JobStatus::Completed).ok();
                job.processed_at = Some(Utc::now());
                job.occurrence_count += 1;
                if let Err(err) = self.store.update_job(job.clone()).await {
                    warn!(%job_id, %err, "failed to mark job completed");
                }
                self.enqueue_recurrence_successor(&job).await;
            }
            Err(reason) => {
                warn!(%job_id, %reason, "job handler failed");
                job.transition(JobStatus::Failed).ok();
                job.processed_at = Some(Utc::now());
                if let Err(err) = self.store.update_job(job).await {
                    warn!(%job_id, %err, "failed to mark job failed");
                }
            }
        }
    }

    async fn enqueue_recurrence_successor(&self, completed: &ScheduledJob) {
        let Some(recurrence) = &completed.recurrence else {
            return;
        };
        let Some(due_at) = next_run(recurrence, completed.due_at, completed.occurrence_count) else {
            return;
        };
        let successor = ScheduledJob {
            id: format!("job-{}", Uuid::new_v4()),
            call_id: completed.call_id,
            kind: completed.kind.clone(),
            due_at,
            timezone: completed.timezone,
            status: JobStatus::Pending,
            business_hours_policy: completed.business_hours_policy.clone(),
            recurrence: completed.recurrence.clone(),
            next_run: None,
            processed_at: None,
            occurrence_count: completed.occurrence_count,
        };
        if let Err(err) = self.enqueue(successor).await {
            warn!(job_id = %completed.id, %err, "failed to enqueue recurrence successor");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;
    use voice_persistence::MemoryStore;

    struct RecordingHandler {
        calls: AtomicUsize,
        retries: AtomicUsize,
    }

    impl RecordingHandler {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                retries: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl JobDispatchHandler for RecordingHandler {
        async fn handle_scheduled_call(&self, _call_id: CallId) -> std::result::Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn handle_retry(&self, _retry_attempt_id: Uuid) -> std::result::Result<(), String> {
            self.retries.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", start_paused = true)]
    async fn a_due_job_is_dispatched_and_marked_completed() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = Arc::new(Scheduler::new(store.clone()));
        let handler = Arc::new(RecordingHandler::new());

        let call_id = Uuid::new_v4();
        let job_id = scheduler
            .schedule(call_id, Utc::now() + chrono::Duration::milliseconds(50), ScheduleOptions::default())
            .await
            .unwrap();

        let scheduler_clone = scheduler.clone();
        let handler_clone = handler.clone();
        let run_handle = tokio::spawn(async move { scheduler_clone.run(handler_clone).await });

        tokio::time::advance(StdDuration::from_millis(100)).await;
        for _ in 0..50 {
            let job = scheduler.store.get_job(&job_id).await.unwrap().unwrap();
            if job.status == JobStatus::Completed {
                break;
            }
            tokio::time::advance(StdDuration::from_millis(10)).await;
        }

        let job = store.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        run_handle.abort();
    }

    #[tokio::test]
    async fn cancel_only_allowed_while_pending() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = Scheduler::new(store.clone());
        let job_id = scheduler
            .schedule(Uuid::new_v4(), Utc::now() + chrono::Duration::hours(1), ScheduleOptions::default())
            .await
            .unwrap();
        scheduler.cancel(&job_id).await.unwrap();
        let err = scheduler.cancel(&job_id).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NotPending(_)));
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = Scheduler::new(store.clone());
        let job = ScheduledJob {
            id: "job-fixed".into(),
            call_id: Uuid::new_v4(),
            kind: JobKind::ScheduledCall { call_id: Uuid::new_v4() },
            due_at: Utc::now() + chrono::Duration::hours(1),
            timezone: chrono_tz::UTC,
            status: JobStatus::Pending,
            business_hours_policy: None,
            recurrence: None,
            next_run: None,
            processed_at: None,
            occurrence_count: 0,
        };
        scheduler.enqueue(job.clone()).await.unwrap();
        scheduler.enqueue(job).await.unwrap();
        let all = store.list_jobs(JobFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
    }
}
