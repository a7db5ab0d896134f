//! Redis queue backend
//!
//! Key layout, all under a configurable prefix:
//!
//! | Key                 | Type   | Contents                                  |
//! |---------------------|--------|-------------------------------------------|
//! | `{prefix}:job:{id}` | string | JSON [`StoredJob`] for every live job     |
//! | `{prefix}:waiting`  | list   | ids, pushed left and claimed from the right |
//! | `{prefix}:delayed`  | zset   | ids scored by the time they become due    |
//! | `{prefix}:active`   | zset   | ids scored by claim time                  |
//! | `{prefix}:completed`| string | running total                             |
//! | `{prefix}:failed`   | string | running total                             |
//! | `{prefix}:dlq`      | hash   | id to JSON [`DeadLetterEntry`]            |
//!
//! Multi-key mutations run as Lua scripts or `MULTI`/`EXEC` pipelines, so a
//! job is never visible in two states at once. Scripts build job keys from
//! the prefix, which ties the layout to a single Redis node (no cluster).

use std::{
    future::Future,
    sync::{
        LazyLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use redis::{Script, aio::ConnectionManager};
use tracing::info;

use super::{JobCounts, QueueBackend, redrive_job};
use crate::{
    dead_letter::DeadLetterEntry,
    error::BackendError,
    job::{JobHandle, JobId, StoredJob},
};

/// KEYS: waiting, dlq. ARGV: job key prefix, then id/json pairs.
/// Returns 1 per written job and 0 per duplicate.
static ENQUEUE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        local written = {}
        for i = 2, #ARGV, 2 do
            local id = ARGV[i]
            local key = ARGV[1] .. id
            if redis.call('HEXISTS', KEYS[2], id) == 0
                and redis.call('SET', key, ARGV[i + 1], 'NX') then
                redis.call('LPUSH', KEYS[1], id)
                table.insert(written, 1)
            else
                table.insert(written, 0)
            end
        end
        return written
        ",
    )
});

/// KEYS: delayed, waiting, active. ARGV: now, job key prefix.
static CLAIM: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 100)
        for _, id in ipairs(due) do
            redis.call('ZREM', KEYS[1], id)
            redis.call('LPUSH', KEYS[2], id)
        end
        while true do
            local id = redis.call('RPOP', KEYS[2])
            if not id then
                return false
            end
            local job = redis.call('GET', ARGV[2] .. id)
            if job then
                redis.call('ZADD', KEYS[3], ARGV[1], id)
                return job
            end
        end
        ",
    )
});

/// KEYS: active, waiting. ARGV: id.
static RELEASE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        if redis.call('ZREM', KEYS[1], ARGV[1]) == 1 then
            redis.call('RPUSH', KEYS[2], ARGV[1])
            return 1
        end
        return 0
        ",
    )
});

/// KEYS: active, waiting. ARGV: cutoff (exclusive).
static RECOVER_STALLED: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', '(' .. ARGV[1])
        for _, id in ipairs(ids) do
            redis.call('ZREM', KEYS[1], id)
            redis.call('RPUSH', KEYS[2], id)
        end
        return #ids
        ",
    )
});

/// KEYS: dlq, waiting, new job key. ARGV: old id, new id, new job json.
static REDRIVE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        if redis.call('HDEL', KEYS[1], ARGV[1]) == 0 then
            return 0
        end
        redis.call('SET', KEYS[3], ARGV[3])
        redis.call('LPUSH', KEYS[2], ARGV[2])
        return 1
        ",
    )
});

/// Redis-backed queue storage
pub struct RedisBackend {
    conn: ConnectionManager,
    prefix: String,
    command_timeout: Duration,
    closed: AtomicBool,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("connection", &"ConnectionManager")
            .field("prefix", &self.prefix)
            .field("command_timeout", &self.command_timeout)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl RedisBackend {
    /// Connect to `url` (`redis://host:port/db`)
    ///
    /// Fails with [`BackendError::Unavailable`] if no connection is
    /// established within `command_timeout`.
    pub async fn connect(
        url: &str,
        prefix: impl Into<String>,
        command_timeout: Duration,
    ) -> Result<Self, BackendError> {
        let prefix = prefix.into();
        info!(%prefix, "Connecting to Redis queue backend");

        let client = redis::Client::open(url)?;
        let conn = tokio::time::timeout(command_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                BackendError::Unavailable(format!(
                    "Timed out connecting to Redis after {}ms",
                    command_timeout.as_millis()
                ))
            })??;

        info!("Connected to Redis queue backend");

        Ok(Self {
            conn,
            prefix,
            command_timeout,
            closed: AtomicBool::new(false),
        })
    }

    fn key(&self, name: &str) -> String {
        format!("{}:{name}", self.prefix)
    }

    fn job_prefix(&self) -> String {
        format!("{}:job:", self.prefix)
    }

    fn job_key(&self, id: &JobId) -> String {
        format!("{}:job:{id}", self.prefix)
    }

    /// Run one round-trip with the closed check and command timeout applied
    async fn run<T, F, Fut>(&self, op: F) -> Result<T, BackendError>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Closed);
        }

        tokio::time::timeout(self.command_timeout, op(self.conn.clone()))
            .await
            .map_err(|_| {
                BackendError::Unavailable(format!(
                    "Redis command timed out after {}ms",
                    self.command_timeout.as_millis()
                ))
            })?
            .map_err(BackendError::from)
    }
}

#[async_trait]
impl QueueBackend for RedisBackend {
    async fn ping(&self) -> Result<(), BackendError> {
        self.run(|mut conn| async move {
            redis::cmd("PING").query_async::<String>(&mut conn).await
        })
        .await
        .map(|_| ())
    }

    async fn enqueue(&self, jobs: Vec<StoredJob>) -> Result<Vec<JobHandle>, BackendError> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        let mut invocation = ENQUEUE.prepare_invoke();
        invocation
            .key(self.key("waiting"))
            .key(self.key("dlq"))
            .arg(self.job_prefix());
        for job in &jobs {
            invocation.arg(job.id.as_str()).arg(serde_json::to_string(job)?);
        }

        let written: Vec<i64> = self
            .run(|mut conn| async move { invocation.invoke_async(&mut conn).await })
            .await?;

        Ok(jobs
            .into_iter()
            .zip(written)
            .map(|(job, written)| JobHandle {
                id: job.id,
                deduplicated: written == 0,
            })
            .collect())
    }

    async fn claim(&self, now_ms: u64) -> Result<Option<StoredJob>, BackendError> {
        let mut invocation = CLAIM.prepare_invoke();
        invocation
            .key(self.key("delayed"))
            .key(self.key("waiting"))
            .key(self.key("active"))
            .arg(now_ms)
            .arg(self.job_prefix());

        let job: Option<String> = self
            .run(|mut conn| async move { invocation.invoke_async(&mut conn).await })
            .await?;

        job.map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(BackendError::from)
    }

    async fn complete(&self, id: &JobId) -> Result<(), BackendError> {
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("ZREM")
            .arg(self.key("active"))
            .arg(id.as_str())
            .ignore()
            .cmd("DEL")
            .arg(self.job_key(id))
            .ignore()
            .cmd("INCR")
            .arg(self.key("completed"))
            .ignore();

        self.run(|mut conn| async move { pipe.query_async::<()>(&mut conn).await })
            .await
    }

    async fn schedule_retry(&self, job: StoredJob, ready_at_ms: u64) -> Result<(), BackendError> {
        let json = serde_json::to_string(&job)?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("ZREM")
            .arg(self.key("active"))
            .arg(job.id.as_str())
            .ignore()
            .cmd("SET")
            .arg(self.job_key(&job.id))
            .arg(json)
            .ignore()
            .cmd("ZADD")
            .arg(self.key("delayed"))
            .arg(ready_at_ms)
            .arg(job.id.as_str())
            .ignore();

        self.run(|mut conn| async move { pipe.query_async::<()>(&mut conn).await })
            .await
    }

    async fn dead_letter(&self, entry: DeadLetterEntry) -> Result<(), BackendError> {
        let json = serde_json::to_string(&entry)?;
        let id = entry.job_id.as_str();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("ZREM")
            .arg(self.key("active"))
            .arg(id)
            .ignore()
            .cmd("DEL")
            .arg(self.job_key(&entry.job_id))
            .ignore()
            .cmd("INCR")
            .arg(self.key("failed"))
            .ignore()
            .cmd("HSET")
            .arg(self.key("dlq"))
            .arg(id)
            .arg(json)
            .ignore();

        self.run(|mut conn| async move { pipe.query_async::<()>(&mut conn).await })
            .await
    }

    async fn release(&self, id: &JobId) -> Result<(), BackendError> {
        let mut invocation = RELEASE.prepare_invoke();
        invocation
            .key(self.key("active"))
            .key(self.key("waiting"))
            .arg(id.as_str());

        self.run(|mut conn| async move { invocation.invoke_async::<i64>(&mut conn).await })
            .await
            .map(|_| ())
    }

    async fn recover_stalled(&self, claimed_before_ms: u64) -> Result<usize, BackendError> {
        let mut invocation = RECOVER_STALLED.prepare_invoke();
        invocation
            .key(self.key("active"))
            .key(self.key("waiting"))
            .arg(claimed_before_ms);

        self.run(|mut conn| async move { invocation.invoke_async::<usize>(&mut conn).await })
            .await
    }

    async fn counts(&self) -> Result<JobCounts, BackendError> {
        let mut pipe = redis::pipe();
        pipe.cmd("LLEN")
            .arg(self.key("waiting"))
            .cmd("ZCARD")
            .arg(self.key("active"))
            .cmd("ZCARD")
            .arg(self.key("delayed"))
            .cmd("GET")
            .arg(self.key("completed"))
            .cmd("GET")
            .arg(self.key("failed"))
            .cmd("HLEN")
            .arg(self.key("dlq"));

        let (waiting, active, delayed, completed, failed, dead_letter): (
            u64,
            u64,
            u64,
            Option<u64>,
            Option<u64>,
            u64,
        ) = self
            .run(|mut conn| async move { pipe.query_async(&mut conn).await })
            .await?;

        Ok(JobCounts {
            waiting,
            active,
            delayed,
            completed: completed.unwrap_or_default(),
            failed: failed.unwrap_or_default(),
            dead_letter,
        })
    }

    async fn retry_dead_letter(&self, id: &JobId) -> Result<Option<JobHandle>, BackendError> {
        let dlq = self.key("dlq");
        let lookup = dlq.clone();
        let field = id.to_string();
        let entry: Option<String> = self
            .run(|mut conn| async move {
                redis::cmd("HGET")
                    .arg(lookup)
                    .arg(field)
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        let Some(entry) = entry else {
            return Ok(None);
        };

        let job = redrive_job(serde_json::from_str(&entry)?);
        let mut invocation = REDRIVE.prepare_invoke();
        invocation
            .key(dlq)
            .key(self.key("waiting"))
            .key(self.job_key(&job.id))
            .arg(id.as_str())
            .arg(job.id.as_str())
            .arg(serde_json::to_string(&job)?);

        let moved: i64 = self
            .run(|mut conn| async move { invocation.invoke_async(&mut conn).await })
            .await?;

        // Someone else retried or purged the entry in between
        Ok((moved == 1).then_some(JobHandle {
            id: job.id,
            deduplicated: false,
        }))
    }

    async fn list_dead_letters(&self) -> Result<Vec<DeadLetterEntry>, BackendError> {
        let dlq = self.key("dlq");
        let values: Vec<String> = self
            .run(|mut conn| async move {
                redis::cmd("HVALS").arg(dlq).query_async(&mut conn).await
            })
            .await?;

        let mut entries = values
            .iter()
            .map(|json| serde_json::from_str::<DeadLetterEntry>(json))
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by(|a, b| {
            a.failed_at
                .cmp(&b.failed_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });

        Ok(entries)
    }

    async fn purge_dead_letter(&self, id: &JobId) -> Result<bool, BackendError> {
        let dlq = self.key("dlq");
        let field = id.to_string();
        let removed: i64 = self
            .run(|mut conn| async move {
                redis::cmd("HDEL").arg(dlq).arg(field).query_async(&mut conn).await
            })
            .await?;

        Ok(removed > 0)
    }

    async fn close(&self) -> Result<(), BackendError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("Redis queue backend closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{classify::ErrorCategory, job::EmailJobData};

    fn job(id: &str) -> StoredJob {
        StoredJob::new(EmailJobData::new("a@b", "s", "h").with_job_id(id))
    }

    /// Backend under a fresh prefix, so tests can share one server
    async fn backend() -> RedisBackend {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let prefix = format!("tribe-test:{}", JobId::generate());
        RedisBackend::connect(&url, prefix, Duration::from_secs(2))
            .await
            .unwrap()
    }

    async fn flush(backend: &RedisBackend) {
        let pattern = format!("{}:*", backend.prefix);
        backend
            .run(|mut conn| async move {
                let keys: Vec<String> = redis::cmd("KEYS")
                    .arg(pattern)
                    .query_async(&mut conn)
                    .await?;
                if keys.is_empty() {
                    return Ok(());
                }
                redis::cmd("DEL").arg(keys).query_async::<()>(&mut conn).await
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    #[ignore = "Requires a Redis server at REDIS_URL"]
    async fn test_enqueue_claim_complete() {
        let backend = backend().await;

        let handles = backend.enqueue(vec![job("1"), job("2")]).await.unwrap();
        assert!(handles.iter().all(|h| !h.deduplicated));
        assert_eq!(backend.counts().await.unwrap().waiting, 2);

        // First in, first out
        let first = backend.claim(0).await.unwrap().unwrap();
        assert_eq!(first.id.as_str(), "1");
        let counts = backend.counts().await.unwrap();
        assert_eq!((counts.waiting, counts.active), (1, 1));

        backend.complete(&first.id).await.unwrap();
        let counts = backend.counts().await.unwrap();
        assert_eq!((counts.active, counts.completed), (0, 1));

        flush(&backend).await;
    }

    #[tokio::test]
    #[ignore = "Requires a Redis server at REDIS_URL"]
    async fn test_duplicate_ids_are_not_rewritten() {
        let backend = backend().await;

        backend.enqueue(vec![job("same")]).await.unwrap();
        let mut changed = job("same");
        changed.data.email.subject = "changed".to_string();
        let handles = backend
            .enqueue(vec![changed, job("other"), job("other")])
            .await
            .unwrap();

        assert_eq!(
            handles.iter().map(|h| h.deduplicated).collect::<Vec<_>>(),
            vec![true, false, true]
        );
        assert_eq!(backend.counts().await.unwrap().waiting, 2);

        let stored = backend.claim(0).await.unwrap().unwrap();
        assert_eq!(stored.id.as_str(), "same");
        assert_eq!(stored.data.email.subject, "s");

        flush(&backend).await;
    }

    #[tokio::test]
    #[ignore = "Requires a Redis server at REDIS_URL"]
    async fn test_delayed_jobs_become_due() {
        let backend = backend().await;
        backend.enqueue(vec![job("1")]).await.unwrap();

        let mut claimed = backend.claim(100).await.unwrap().unwrap();
        claimed.attempts_made = 1;
        backend.schedule_retry(claimed, 500).await.unwrap();

        assert_eq!(backend.claim(499).await.unwrap(), None);
        let counts = backend.counts().await.unwrap();
        assert_eq!((counts.delayed, counts.active), (1, 0));

        let again = backend.claim(500).await.unwrap().unwrap();
        assert_eq!(again.attempts_made, 1);
        assert_eq!(backend.counts().await.unwrap().delayed, 0);

        flush(&backend).await;
    }

    #[tokio::test]
    #[ignore = "Requires a Redis server at REDIS_URL"]
    async fn test_release_and_stalled_recovery() {
        let backend = backend().await;
        backend.enqueue(vec![job("1"), job("2")]).await.unwrap();

        let first = backend.claim(10).await.unwrap().unwrap();
        backend.release(&first.id).await.unwrap();
        // Released jobs go to the front
        assert_eq!(backend.claim(20).await.unwrap().unwrap().id.as_str(), "1");

        let _second = backend.claim(30).await.unwrap().unwrap();
        // The cutoff is exclusive: only the claim at 20 is stalled
        assert_eq!(backend.recover_stalled(20).await.unwrap(), 0);
        assert_eq!(backend.recover_stalled(25).await.unwrap(), 1);
        let counts = backend.counts().await.unwrap();
        assert_eq!((counts.waiting, counts.active), (1, 1));

        flush(&backend).await;
    }

    #[tokio::test]
    #[ignore = "Requires a Redis server at REDIS_URL"]
    async fn test_dead_letter_lifecycle() {
        let backend = backend().await;
        backend.enqueue(vec![job("dl")]).await.unwrap();
        let claimed = backend.claim(0).await.unwrap().unwrap();

        let entry =
            DeadLetterEntry::from_job(claimed, ErrorCategory::Bounce, "no such user", Some(550), 0);
        backend.dead_letter(entry).await.unwrap();

        let counts = backend.counts().await.unwrap();
        assert_eq!((counts.active, counts.failed, counts.dead_letter), (0, 1, 1));

        let entries = backend.list_dead_letters().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].category, ErrorCategory::Bounce);

        // Still deduplicated while dead-lettered
        let handles = backend.enqueue(vec![job("dl")]).await.unwrap();
        assert!(handles[0].deduplicated);

        let handle = backend
            .retry_dead_letter(&JobId::from("dl"))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(handle.id.as_str(), "dl");
        let counts = backend.counts().await.unwrap();
        assert_eq!((counts.waiting, counts.dead_letter), (1, 0));

        let redriven = backend.claim(0).await.unwrap().unwrap();
        assert_eq!(redriven.id, handle.id);
        assert_eq!(redriven.attempts_made, 0);

        assert_eq!(backend.retry_dead_letter(&JobId::from("dl")).await.unwrap(), None);
        assert!(!backend.purge_dead_letter(&JobId::from("dl")).await.unwrap());

        flush(&backend).await;
    }

    #[tokio::test]
    #[ignore = "Requires a Redis server at REDIS_URL"]
    async fn test_purge_dead_letter() {
        let backend = backend().await;
        backend.enqueue(vec![job("gone")]).await.unwrap();
        let claimed = backend.claim(0).await.unwrap().unwrap();
        let entry = DeadLetterEntry::from_job(claimed, ErrorCategory::Spam, "spam", None, 0);
        backend.dead_letter(entry).await.unwrap();

        assert!(backend.purge_dead_letter(&JobId::from("gone")).await.unwrap());
        assert!(backend.list_dead_letters().await.unwrap().is_empty());

        flush(&backend).await;
    }

    #[tokio::test]
    #[ignore = "Requires a Redis server at REDIS_URL"]
    async fn test_closed_backend_rejects_calls() {
        let backend = backend().await;
        backend.ping().await.unwrap();
        backend.close().await.unwrap();

        assert!(matches!(backend.ping().await, Err(BackendError::Closed)));
        assert!(matches!(
            backend.enqueue(vec![job("1")]).await,
            Err(BackendError::Closed)
        ));
    }
}
