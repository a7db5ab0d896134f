//! Storage backends for the email queue
//!
//! - `memory`: in-process storage for development and single-process use
//! - `test`: memory storage with fault injection and wait helpers
//! - `redis`: durable storage shared by several processes
//!
//! Each backend serialises mutations to job records: every trait method is
//! atomic with respect to the others.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use self::memory::MemoryBackend;
#[cfg(feature = "redis")]
pub use self::redis::RedisBackend;
pub use self::test::TestBackend;
use crate::{
    dead_letter::DeadLetterEntry,
    error::BackendError,
    job::{JobHandle, JobId, StoredJob},
};

/// Job counts held by a backend
///
/// `completed` and `failed` are running totals; the rest are current sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: u64,
    pub active: u64,
    pub delayed: u64,
    pub completed: u64,
    pub failed: u64,
    pub dead_letter: u64,
}

#[async_trait]
pub trait QueueBackend: Send + Sync + std::fmt::Debug {
    /// Check the backend is reachable
    async fn ping(&self) -> Result<(), BackendError>;

    /// Persist a batch of jobs as waiting, all or nothing
    ///
    /// A job whose id is already live or dead-lettered is not written again;
    /// its handle comes back with `deduplicated: true`.
    async fn enqueue(&self, jobs: Vec<StoredJob>) -> Result<Vec<JobHandle>, BackendError>;

    /// Take the next runnable job and mark it active
    ///
    /// Delayed jobs due at `now_ms` become runnable first.
    async fn claim(&self, now_ms: u64) -> Result<Option<StoredJob>, BackendError>;

    /// Drop a finished job and count it as completed
    async fn complete(&self, id: &JobId) -> Result<(), BackendError>;

    /// Store the updated job and park it until `ready_at_ms`
    async fn schedule_retry(&self, job: StoredJob, ready_at_ms: u64) -> Result<(), BackendError>;

    /// Move an active job to the dead-letter store and count it as failed
    async fn dead_letter(&self, entry: DeadLetterEntry) -> Result<(), BackendError>;

    /// Return an active job to the front of the waiting list
    async fn release(&self, id: &JobId) -> Result<(), BackendError>;

    /// Return jobs claimed before `claimed_before_ms` to waiting
    ///
    /// Returns how many jobs were recovered.
    async fn recover_stalled(&self, claimed_before_ms: u64) -> Result<usize, BackendError>;

    async fn counts(&self) -> Result<JobCounts, BackendError>;

    /// Replace a dead-letter entry with a fresh waiting job built from its
    /// payload
    ///
    /// Returns `None` (and writes nothing) when no entry exists.
    async fn retry_dead_letter(&self, id: &JobId) -> Result<Option<JobHandle>, BackendError>;

    /// All dead-letter entries, oldest failure first
    async fn list_dead_letters(&self) -> Result<Vec<DeadLetterEntry>, BackendError>;

    /// Delete a dead-letter entry; returns whether one existed
    async fn purge_dead_letter(&self, id: &JobId) -> Result<bool, BackendError>;

    /// Release the backend connection; later calls fail with
    /// [`BackendError::Closed`]
    async fn close(&self) -> Result<(), BackendError>;
}

/// Build the job a dead-letter retry enqueues
pub(crate) fn redrive_job(entry: DeadLetterEntry) -> StoredJob {
    StoredJob::new(entry.into_retry_payload())
}
