//! Job store: TTL'd key-value persistence for job records.
//!
//! Records are stored as JSON strings under `job:<id>` (uploads) and
//! `query:<id>` (queries and schema requests); the split is preserved because
//! the status endpoint checks both namespaces. Every write resets the TTL.
//! Updates are read-merge-write under the assumption of no concurrent writers
//! per key: the coordinator owns the initial `queued` write, the worker that
//! holds the delivery owns everything after.
//!
//! Updates against an expired or unknown key are lost silently (logged, not
//! fatal) so that late worker writes never fail a job that has already aged
//! out.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use deadpool_redis::redis::AsyncCommands;
use deadpool_redis::{Config as RedisConfig, Pool, PoolConfig, Runtime};

use crate::error::{Error, Result};
use crate::job::{Job, JobKind, JobUpdate};

/// Connections per worker in the Redis pool.
const POOL_SIZE: usize = 8;

const UPLOAD_PREFIX: &str = "job:";
const QUERY_PREFIX: &str = "query:";

fn key_for(kind: JobKind, id: &str) -> String {
    match kind {
        JobKind::Upload => format!("{UPLOAD_PREFIX}{id}"),
        JobKind::Query | JobKind::Schema => format!("{QUERY_PREFIX}{id}"),
    }
}

/// Persistence contract for job records.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Writes the initial `queued` record (or replaces an existing one).
    async fn create(&self, job: &Job) -> Result<()>;

    /// Returns the record for `id`, checking both key namespaces.
    async fn get(&self, id: &str) -> Result<Option<Job>>;

    /// Reads, merges, and writes back, resetting the TTL.
    ///
    /// A missing or expired key is logged and ignored.
    async fn update(&self, id: &str, update: &JobUpdate) -> Result<()>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-memory job store for testing; honors TTL semantics.
#[derive(Debug)]
pub struct MemoryJobStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryJobStore {
    /// Creates a store with the given TTL in seconds.
    #[must_use]
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            ttl: Duration::from_secs(ttl_seconds),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn read(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().expect("job store lock");
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn write(&self, key: String, value: String) {
        let expires = Instant::now() + self.ttl;
        self.entries
            .lock()
            .expect("job store lock")
            .insert(key, (value, expires));
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &Job) -> Result<()> {
        let encoded = serde_json::to_string(job)?;
        self.write(key_for(job.kind, &job.id), encoded);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Job>> {
        for prefix in [UPLOAD_PREFIX, QUERY_PREFIX] {
            if let Some(raw) = self.read(&format!("{prefix}{id}")) {
                return Ok(Some(serde_json::from_str(&raw)?));
            }
        }
        Ok(None)
    }

    async fn update(&self, id: &str, update: &JobUpdate) -> Result<()> {
        let Some(mut job) = self.get(id).await? else {
            tracing::warn!(job_id = id, "cannot update job status: job not found");
            return Ok(());
        };
        if !accepts_transition(&job, update) {
            return Ok(());
        }
        job.apply(update);
        self.create(&job).await
    }
}

/// Status only moves forward; a write that would regress (a redelivered
/// message touching a terminal job, a duplicate `processing`) is dropped with
/// a warning rather than rewinding the record.
fn accepts_transition(job: &Job, update: &JobUpdate) -> bool {
    if job.status.can_transition_to(update.status) {
        return true;
    }
    tracing::warn!(
        job_id = %job.id,
        from = job.status.as_str(),
        to = update.status.as_str(),
        "ignoring non-monotone status transition"
    );
    false
}

// ============================================================================
// Redis store
// ============================================================================

/// Redis-backed job store with a bounded connection pool.
pub struct RedisJobStore {
    pool: Pool,
    ttl_seconds: u64,
}

impl std::fmt::Debug for RedisJobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisJobStore")
            .field("ttl_seconds", &self.ttl_seconds)
            .finish_non_exhaustive()
    }
}

impl RedisJobStore {
    /// Connects a pooled client to `redis://<host>:<port>`.
    ///
    /// # Errors
    ///
    /// Returns `Error::JobStore` when the pool cannot be created.
    pub fn connect(host: &str, port: u16, ttl_seconds: u64) -> Result<Self> {
        let mut config = RedisConfig::from_url(format!("redis://{host}:{port}"));
        config.pool = Some(PoolConfig::new(POOL_SIZE));
        let pool = config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::job_store(format!("failed to create redis pool: {e}")))?;

        Ok(Self { pool, ttl_seconds })
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::job_store(format!("failed to get redis connection: {e}")))
    }

    async fn read(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        conn.get(key)
            .await
            .map_err(|e| Error::job_store(format!("redis GET {key} failed: {e}")))
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(key, value, self.ttl_seconds)
            .await
            .map_err(|e| Error::job_store(format!("redis SETEX {key} failed: {e}")))
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn create(&self, job: &Job) -> Result<()> {
        let encoded = serde_json::to_string(job)?;
        self.write(&key_for(job.kind, &job.id), &encoded).await
    }

    async fn get(&self, id: &str) -> Result<Option<Job>> {
        for prefix in [UPLOAD_PREFIX, QUERY_PREFIX] {
            if let Some(raw) = self.read(&format!("{prefix}{id}")).await? {
                return Ok(Some(serde_json::from_str(&raw)?));
            }
        }
        Ok(None)
    }

    async fn update(&self, id: &str, update: &JobUpdate) -> Result<()> {
        let Some(mut job) = self.get(id).await? else {
            tracing::warn!(job_id = id, "cannot update job status: job not found");
            return Ok(());
        };
        if !accepts_transition(&job, update) {
            return Ok(());
        }
        job.apply(update);
        self.create(&job).await
    }
}
