//! MongoDB-backed [`Store`] (§4.8): one collection per entity, the four
//! required compound indexes, atomic replace-by-filter updates.

use async_trait::async_trait;
use bson::doc;
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, Database, IndexModel};
use uuid::Uuid;

use voice_types::{Agent, Call, JobId, JobStatus, RetryAttempt, ScheduledJob, TranscriptTurn};

use crate::error::{Result, StoreError};
use crate::store::{CallFilter, JobFilter, Store};

const CALLS: &str = "calls";
const AGENTS: &str = "agents";
const JOBS: &str = "scheduled_jobs";
const RETRY_ATTEMPTS: &str = "retry_attempts";

/// Backed by a live `mongodb::Database`. Construct via [`MongoStore::connect`]
/// then call [`MongoStore::ensure_indexes`] once at startup.
#[derive(Clone)]
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        Ok(Self {
            db: client.database(db_name),
        })
    }

    pub fn from_database(db: Database) -> Self {
        Self { db }
    }

    fn calls(&self) -> Collection<Call> {
        self.db.collection(CALLS)
    }

    fn agents(&self) -> Collection<Agent> {
        self.db.collection(AGENTS)
    }

    fn jobs(&self) -> Collection<ScheduledJob> {
        self.db.collection(JOBS)
    }

    fn retry_attempts(&self) -> Collection<RetryAttempt> {
        self.db.collection(RETRY_ATTEMPTS)
    }

    /// Creates the four indexes named in §4.8. Safe to call on every
    /// startup: `createIndexes` is idempotent for unchanged definitions.
    pub async fn ensure_indexes(&self) -> Result<()> {
        self.calls()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "direction": 1, "status": 1, "created_at": -1 })
                    .build(),
            )
            .await?;
        self.calls()
            .create_index(IndexModel::builder().keys(doc! { "provider_call_id": 1 }).build())
            .await?;
        self.jobs()
            .create_index(IndexModel::builder().keys(doc! { "due_at": 1, "status": 1 }).build())
            .await?;
        self.retry_attempts()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "original_call_id": 1, "attempt_number": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await?;
        Ok(())
    }

    /// Upserts an agent document. Agent-configuration CRUD is out of scope
    /// (§1 Non-goals) -- this exists only so a Mongo-backed deployment has
    /// some way to bootstrap the agents an operator configures out of band,
    /// mirroring [`crate::MemoryStore::seed_agent`]'s role for tests.
    pub async fn seed_agent(&self, agent: Agent) -> Result<()> {
        self.agents()
            .replace_one(doc! { "id": agent.id.clone() }, &agent)
            .upsert(true)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Store for MongoStore {
    async fn insert_call(&self, call: Call) -> Result<()> {
        self.calls()
            .insert_one(&call)
            .await
            .map_err(|e| classify_duplicate(e, "Call", call.id.to_string()))?;
        Ok(())
    }

    async fn get_call(&self, id: voice_types::CallId) -> Result<Option<Call>> {
        Ok(self.calls().find_one(doc! { "id": id.to_string() }).await?)
    }

    async fn update_call(&self, call: Call) -> Result<()> {
        let result = self
            .calls()
            .replace_one(doc! { "id": call.id.to_string() }, &call)
            .await?;
        if result.matched_count == 0 {
            return Err(StoreError::NotFound {
                kind: "Call",
                id: call.id.to_string(),
            });
        }
        Ok(())
    }

    async fn find_call_by_provider_id(&self, provider_call_id: &str) -> Result<Option<Call>> {
        Ok(self
            .calls()
            .find_one(doc! { "provider_call_id": provider_call_id })
            .await?)
    }

    async fn list_calls(&self, filter: CallFilter) -> Result<Vec<Call>> {
        use futures::TryStreamExt;

        let mut query = doc! {};
        if let Some(direction) = filter.direction {
            query.insert("direction", bson::to_bson(&direction)?);
        }
        if let Some(status) = filter.status {
            query.insert("status", bson::to_bson(&status)?);
        }
        let mut find = self.calls().find(query).sort(doc! { "created_at": -1 });
        if let Some(limit) = filter.limit {
            find = find.limit(i64::from(limit));
        }
        let cursor = find.await?;
        Ok(cursor.try_collect().await?)
    }

    async fn append_transcript(&self, call_id: voice_types::CallId, turns: Vec<TranscriptTurn>) -> Result<()> {
        let mut call = self
            .get_call(call_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
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
            combined.push(serde_json::to_value(turn).map_err(|e| StoreError::Backend(e.to_string()))?);
        }
        if let Some(obj) = call.metadata.as_object_mut() {
            obj.insert("transcript".to_string(), serde_json::Value::Array(combined));
        } else {
            call.metadata = serde_json::json!({ "transcript": combined });
        }
        self.update_call(call).await
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>> {
        Ok(self.agents().find_one(doc! { "id": agent_id }).await?)
    }

    async fn insert_job(&self, job: ScheduledJob) -> Result<()> {
        self.jobs()
            .insert_one(&job)
            .await
            .map_err(|e| classify_duplicate(e, "ScheduledJob", job.id.clone()))?;
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> Result<Option<ScheduledJob>> {
        Ok(self.jobs().find_one(doc! { "id": id }).await?)
    }

    async fn update_job(&self, job: ScheduledJob) -> Result<()> {
        let result = self.jobs().replace_one(doc! { "id": job.id.clone() }, &job).await?;
        if result.matched_count == 0 {
            return Err(StoreError::NotFound {
                kind: "ScheduledJob",
                id: job.id,
            });
        }
        Ok(())
    }

    async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<ScheduledJob>> {
        use futures::TryStreamExt;

        let mut query = doc! {};
        if let Some(status) = filter.status {
            query.insert("status", bson::to_bson(&status)?);
        }
        if let Some(call_id) = filter.call_id {
            query.insert("call_id", call_id.to_string());
        }
        let cursor = self.jobs().find(query).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledJob>> {
        use futures::TryStreamExt;

        let query = doc! {
            "status": bson::to_bson(&JobStatus::Pending)?,
            "due_at": { "$lte": now },
        };
        let cursor = self.jobs().find(query).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn insert_retry_attempt(&self, attempt: RetryAttempt) -> Result<()> {
        self.retry_attempts()
            .insert_one(&attempt)
            .await
            .map_err(|e| classify_duplicate(e, "RetryAttempt", attempt.id.to_string()))?;
        Ok(())
    }

    async fn get_retry_attempt(&self, id: Uuid) -> Result<Option<RetryAttempt>> {
        Ok(self.retry_attempts().find_one(doc! { "id": id.to_string() }).await?)
    }

    async fn update_retry_attempt(&self, attempt: RetryAttempt) -> Result<()> {
        let result = self
            .retry_attempts()
            .replace_one(doc! { "id": attempt.id.to_string() }, &attempt)
            .await?;
        if result.matched_count == 0 {
            return Err(StoreError::NotFound {
                kind: "RetryAttempt",
                id: attempt.id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_retry_attempts_for_call(&self, original_call_id: voice_types::CallId) -> Result<Vec<RetryAttempt>> {
        use futures::TryStreamExt;

        let cursor = self
            .retry_attempts()
            .find(doc! { "original_call_id": original_call_id.to_string() })
            .await?;
        Ok(cursor.try_collect().await?)
    }
}

/// Maps Mongo's E11000 duplicate-key error onto [`StoreError::Conflict`];
/// everything else passes through the blanket `From<mongodb::error::Error>`.
fn classify_duplicate(err: mongodb::error::Error, kind: &'static str, id: String) -> StoreError {
    if err.to_string().contains("E11000") {
        StoreError::Conflict { kind, id }
    } else {
        StoreError::from(err)
    }
}
