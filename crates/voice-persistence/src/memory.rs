//! In-memory reference [`Store`] (mirrors the teacher's `MemoryCheckpointer`
//! pattern): the test double every other crate's unit tests build on, and a
//! viable backend for local development.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use voice_types::{Agent, Call, CallId, JobId, JobStatus, RetryAttempt, ScheduledJob, TranscriptTurn};

use crate::error::{Result, StoreError};
use crate::store::{CallFilter, JobFilter, Store};

#[derive(Default)]
struct Inner {
    calls: HashMap<CallId, Call>,
    agents: HashMap<String, Agent>,
    jobs: HashMap<JobId, ScheduledJob>,
    retry_attempts: HashMap<Uuid, RetryAttempt>,
}

/// Does not persist across process restarts; guarded by a single
/// `std::sync::Mutex` since all operations are cheap in-memory map access.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Seed an agent for tests; the agent-configuration CRUD itself is out
    /// of scope (§1 Non-goals).
    pub fn seed_agent(&self, agent: Agent) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).agents.insert(agent.id.clone(), agent);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_call(&self, call: Call) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.calls.contains_key(&call.id) {
            return Err(StoreError::Conflict {
                kind: "Call",
                id: call.id.to_string(),
            });
        }
        inner.calls.insert(call.id, call);
        Ok(())
    }

    async fn get_call(&self, id: CallId) -> Result<Option<Call>> {
        Ok(self.inner.lock().unwrap_or_else(|e| e.into_inner()).calls.get(&id).cloned())
    }

    async fn update_call(&self, call: Call) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !inner.calls.contains_key(&call.id) {
            return Err(StoreError::NotFound {
                kind: "Call",
                id: call.id.to_string(),
            });
        }
        inner.calls.insert(call.id, call);
        Ok(())
    }

    async fn find_call_by_provider_id(&self, provider_call_id: &str) -> Result<Option<Call>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .calls
            .values()
            .find(|c| c.provider_call_id.as_deref() == Some(provider_call_id))
            .cloned())
    }

    async fn list_calls(&self, filter: CallFilter) -> Result<Vec<Call>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut calls: Vec<Call> = inner
            .calls
            .values()
            .filter(|c| filter.direction.map_or(true, |d| c.direction == d))
            .filter(|c| filter.status.map_or(true, |s| c.status == s))
            .cloned()
            .collect();
        calls.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            calls.truncate(limit as usize);
        }
        Ok(calls)
    }

    async fn append_transcript(&self, call_id: CallId, turns: Vec<TranscriptTurn>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let call = inner.calls.get_mut(&call_id).ok_or_else(|| StoreError::NotFound {
            kind: "Call",
            id: call_id.to_string(),
        })?;
        let existing = call
            .metadata
            .get("transcript")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let mut combined = existing;
        for turn in turns {
            combined.push(serde_json::to_value(turn).expect("TranscriptTurn always serialises"));
        }
        if let Some(obj) = call.metadata.as_object_mut() {
            obj.insert("transcript".to_string(), serde_json::Value::Array(combined));
        } else {
            call.metadata = serde_json::json!({ "transcript": combined });
        }
        Ok(())
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>> {
        Ok(self.inner.lock().unwrap_or_else(|e| e.into_inner()).agents.get(agent_id).cloned())
    }

    async fn insert_job(&self, job: ScheduledJob) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.jobs.contains_key(&job.id) {
            return Err(StoreError::Conflict {
                kind: "ScheduledJob",
                id: job.id.clone(),
            });
        }
        inner.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> Result<Option<ScheduledJob>> {
        Ok(self.inner.lock().unwrap_or_else(|e| e.into_inner()).jobs.get(id).cloned())
    }

    async fn update_job(&self, job: ScheduledJob) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !inner.jobs.contains_key(&job.id) {
            return Err(StoreError::NotFound {
                kind: "ScheduledJob",
                id: job.id.clone(),
            });
        }
        inner.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<ScheduledJob>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .jobs
            .values()
            .filter(|j| filter.status.map_or(true, |s| j.status == s))
            .filter(|j| filter.call_id.map_or(true, |id| j.call_id == id))
            .cloned()
            .collect())
    }

    async fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledJob>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && j.due_at <= now)
            .cloned()
            .collect())
    }

    async fn insert_retry_attempt(&self, attempt: RetryAttempt) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let duplicate = inner.retry_attempts.values().any(|a| {
            a.original_call_id == attempt.original_call_id
                && a.attempt_number == attempt.attempt_number
        });
        if duplicate {
            return Err(StoreError::Conflict {
                kind: "RetryAttempt",
                id: format!("{}:{}", attempt.original_call_id, attempt.attempt_number),
            });
        }
        inner.retry_attempts.insert(attempt.id, attempt);
        Ok(())
    }

    async fn get_retry_attempt(&self, id: Uuid) -> Result<Option<RetryAttempt>> {
        Ok(self.inner.lock().unwrap_or_else(|e| e.into_inner()).retry_attempts.get(&id).cloned())
    }

    async fn update_retry_attempt(&self, attempt: RetryAttempt) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !inner.retry_attempts.contains_key(&attempt.id) {
            return Err(StoreError::NotFound {
                kind: "RetryAttempt",
                id: attempt.id.to_string(),
            });
        }
        inner.retry_attempts.insert(attempt.id, attempt);
        Ok(())
    }

    async fn list_retry_attempts_for_call(&self, original_call_id: CallId) -> Result<Vec<RetryAttempt>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .retry_attempts
            .values()
            .filter(|a| a.original_call_id == original_call_id)
            .cloned()
            .collect())
    }
}
