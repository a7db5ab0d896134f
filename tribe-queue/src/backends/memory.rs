use std::{
    collections::{BTreeSet, HashMap, HashSet, VecDeque},
    sync::Arc,
};

use async_trait::async_trait;

use super::{JobCounts, QueueBackend, redrive_job};
use crate::{
    dead_letter::DeadLetterEntry,
    error::BackendError,
    job::{JobHandle, JobId, StoredJob},
};

#[derive(Debug, Default)]
pub(crate) struct State {
    /// Every live job (waiting, delayed or active)
    jobs: HashMap<JobId, StoredJob>,
    waiting: VecDeque<JobId>,
    /// `(ready_at_ms, id)`
    delayed: BTreeSet<(u64, JobId)>,
    /// id to claim time in ms
    active: HashMap<JobId, u64>,
    dead: HashMap<JobId, DeadLetterEntry>,
    completed: u64,
    failed: u64,
    closed: bool,
}

impl State {
    const fn check_open(&self) -> Result<(), BackendError> {
        if self.closed {
            Err(BackendError::Closed)
        } else {
            Ok(())
        }
    }

    fn promote_due(&mut self, now_ms: u64) {
        while let Some(first) = self.delayed.first() {
            if first.0 > now_ms {
                break;
            }
            if let Some((_, id)) = self.delayed.pop_first() {
                self.waiting.push_back(id);
            }
        }
    }

    pub(crate) fn counts(&self) -> JobCounts {
        JobCounts {
            waiting: self.waiting.len() as u64,
            active: self.active.len() as u64,
            delayed: self.delayed.len() as u64,
            completed: self.completed,
            failed: self.failed,
            dead_letter: self.dead.len() as u64,
        }
    }
}

/// In-memory queue backend
///
/// All state sits behind one mutex, so every operation is atomic. Nothing
/// survives a restart; use the Redis backend where jobs must be durable.
///
/// An optional capacity bounds the number of live jobs. Enqueues that would
/// exceed it fail as a whole.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    pub(crate) state: Arc<parking_lot::Mutex<State>>,
    capacity: Option<usize>,
}

impl MemoryBackend {
    /// Create an empty backend with unlimited capacity
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty backend holding at most `capacity` live jobs
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::default(),
            capacity: Some(capacity),
        }
    }

    /// Number of live jobs
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a live job
    #[must_use]
    pub fn job(&self, id: &JobId) -> Option<StoredJob> {
        self.state.lock().jobs.get(id).cloned()
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn ping(&self) -> Result<(), BackendError> {
        self.state.lock().check_open()
    }

    async fn enqueue(&self, jobs: Vec<StoredJob>) -> Result<Vec<JobHandle>, BackendError> {
        let mut state = self.state.lock();
        state.check_open()?;

        let mut seen = HashSet::with_capacity(jobs.len());
        let fresh: Vec<bool> = jobs
            .iter()
            .map(|job| {
                !state.jobs.contains_key(&job.id)
                    && !state.dead.contains_key(&job.id)
                    && seen.insert(job.id.clone())
            })
            .collect();

        if let Some(capacity) = self.capacity {
            let current = state.jobs.len();
            let adding = fresh.iter().filter(|fresh| **fresh).count();
            if current + adding > capacity {
                return Err(BackendError::CapacityExceeded { current, capacity });
            }
        }

        let handles = jobs
            .into_iter()
            .zip(fresh)
            .map(|(job, fresh)| {
                let id = job.id.clone();
                if fresh {
                    state.waiting.push_back(id.clone());
                    state.jobs.insert(id.clone(), job);
                }
                JobHandle {
                    id,
                    deduplicated: !fresh,
                }
            })
            .collect();

        Ok(handles)
    }

    async fn claim(&self, now_ms: u64) -> Result<Option<StoredJob>, BackendError> {
        let mut state = self.state.lock();
        state.check_open()?;
        state.promote_due(now_ms);

        while let Some(id) = state.waiting.pop_front() {
            if let Some(job) = state.jobs.get(&id).cloned() {
                state.active.insert(id, now_ms);
                return Ok(Some(job));
            }
        }

        Ok(None)
    }

    async fn complete(&self, id: &JobId) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.check_open()?;
        state.active.remove(id);
        if state.jobs.remove(id).is_some() {
            state.completed += 1;
        }
        Ok(())
    }

    async fn schedule_retry(&self, job: StoredJob, ready_at_ms: u64) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.check_open()?;
        state.active.remove(&job.id);
        state.delayed.insert((ready_at_ms, job.id.clone()));
        state.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn dead_letter(&self, entry: DeadLetterEntry) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.check_open()?;
        state.active.remove(&entry.job_id);
        state.jobs.remove(&entry.job_id);
        state.failed += 1;
        state.dead.insert(entry.job_id.clone(), entry);
        Ok(())
    }

    async fn release(&self, id: &JobId) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.check_open()?;
        if state.active.remove(id).is_some() {
            state.waiting.push_front(id.clone());
        }
        Ok(())
    }

    async fn recover_stalled(&self, claimed_before_ms: u64) -> Result<usize, BackendError> {
        let mut state = self.state.lock();
        state.check_open()?;

        let mut stalled: Vec<(u64, JobId)> = state
            .active
            .iter()
            .filter(|(_, claimed_at)| **claimed_at < claimed_before_ms)
            .map(|(id, claimed_at)| (*claimed_at, id.clone()))
            .collect();
        stalled.sort();

        for (_, id) in &stalled {
            state.active.remove(id);
            state.waiting.push_back(id.clone());
        }

        Ok(stalled.len())
    }

    async fn counts(&self) -> Result<JobCounts, BackendError> {
        let state = self.state.lock();
        state.check_open()?;
        Ok(state.counts())
    }

    async fn retry_dead_letter(&self, id: &JobId) -> Result<Option<JobHandle>, BackendError> {
        let mut state = self.state.lock();
        state.check_open()?;

        if !state.dead.contains_key(id) {
            return Ok(None);
        }

        if let Some(capacity) = self.capacity
            && state.jobs.len() >= capacity
        {
            return Err(BackendError::CapacityExceeded {
                current: state.jobs.len(),
                capacity,
            });
        }

        let Some(entry) = state.dead.remove(id) else {
            return Ok(None);
        };

        let job = redrive_job(entry);
        let handle = JobHandle {
            id: job.id.clone(),
            deduplicated: false,
        };
        state.waiting.push_back(job.id.clone());
        state.jobs.insert(job.id.clone(), job);

        Ok(Some(handle))
    }

    async fn list_dead_letters(&self) -> Result<Vec<DeadLetterEntry>, BackendError> {
        let state = self.state.lock();
        state.check_open()?;

        let mut entries: Vec<_> = state.dead.values().cloned().collect();
        entries.sort_by(|a, b| {
            a.failed_at
                .cmp(&b.failed_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        Ok(entries)
    }

    async fn purge_dead_letter(&self, id: &JobId) -> Result<bool, BackendError> {
        let mut state = self.state.lock();
        state.check_open()?;
        Ok(state.dead.remove(id).is_some())
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.state.lock().closed = true;
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

    #[tokio::test]
    async fn test_enqueue_claim_complete() {
        let backend = MemoryBackend::new();

        let handles = backend.enqueue(vec![job("1"), job("2")]).await.unwrap();
        assert_eq!(handles.len(), 2);
        assert!(handles.iter().all(|h| !h.deduplicated));
        assert_eq!(backend.counts().await.unwrap().waiting, 2);

        let first = backend.claim(0).await.unwrap().unwrap();
        assert_eq!(first.id.as_str(), "1");
        let counts = backend.counts().await.unwrap();
        assert_eq!((counts.waiting, counts.active), (1, 1));

        backend.complete(&first.id).await.unwrap();
        let counts = backend.counts().await.unwrap();
        assert_eq!((counts.active, counts.completed), (0, 1));
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_not_rewritten() {
        let backend = MemoryBackend::new();

        backend.enqueue(vec![job("same")]).await.unwrap();
        let handles = backend.enqueue(vec![job("same"), job("other"), job("other")]).await.unwrap();

        assert_eq!(
            handles.iter().map(|h| h.deduplicated).collect::<Vec<_>>(),
            vec![true, false, true]
        );
        assert_eq!(backend.counts().await.unwrap().waiting, 2);
    }

    #[tokio::test]
    async fn test_capacity_is_all_or_nothing() {
        let backend = MemoryBackend::with_capacity(2);
        backend.enqueue(vec![job("1")]).await.unwrap();

        let result = backend.enqueue(vec![job("2"), job("3")]).await;
        assert!(matches!(
            result,
            Err(BackendError::CapacityExceeded { current: 1, capacity: 2 })
        ));
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_delayed_jobs_become_due() {
        let backend = MemoryBackend::new();
        backend.enqueue(vec![job("1")]).await.unwrap();

        let mut claimed = backend.claim(100).await.unwrap().unwrap();
        claimed.attempts_made = 1;
        backend.schedule_retry(claimed, 500).await.unwrap();

        assert_eq!(backend.claim(499).await.unwrap(), None);
        assert_eq!(backend.counts().await.unwrap().delayed, 1);

        let again = backend.claim(500).await.unwrap().unwrap();
        assert_eq!(again.attempts_made, 1);
        assert_eq!(backend.counts().await.unwrap().delayed, 0);
    }

    #[tokio::test]
    async fn test_release_and_stalled_recovery() {
        let backend = MemoryBackend::new();
        backend.enqueue(vec![job("1"), job("2")]).await.unwrap();

        let first = backend.claim(10).await.unwrap().unwrap();
        backend.release(&first.id).await.unwrap();
        // Released jobs go to the front
        assert_eq!(backend.claim(20).await.unwrap().unwrap().id.as_str(), "1");

        let _second = backend.claim(30).await.unwrap().unwrap();
        assert_eq!(backend.recover_stalled(25).await.unwrap(), 1);
        let counts = backend.counts().await.unwrap();
        assert_eq!((counts.waiting, counts.active), (1, 1));
    }

    #[tokio::test]
    async fn test_dead_letter_lifecycle() {
        let backend = MemoryBackend::new();
        backend.enqueue(vec![job("dl")]).await.unwrap();
        let claimed = backend.claim(0).await.unwrap().unwrap();

        let entry =
            DeadLetterEntry::from_job(claimed, ErrorCategory::Bounce, "no such user", Some(550), 0);
        backend.dead_letter(entry).await.unwrap();

        let counts = backend.counts().await.unwrap();
        assert_eq!((counts.active, counts.failed, counts.dead_letter), (0, 1, 1));

        // Still deduplicated while dead-lettered
        let handles = backend.enqueue(vec![job("dl")]).await.unwrap();
        assert!(handles[0].deduplicated);

        let handle = backend.retry_dead_letter(&JobId::from("dl")).await.unwrap().unwrap();
        assert_ne!(handle.id.as_str(), "dl");
        assert_eq!(backend.job(&handle.id).unwrap().attempts_made, 0);
        assert_eq!(backend.counts().await.unwrap().dead_letter, 0);

        assert_eq!(backend.retry_dead_letter(&JobId::from("dl")).await.unwrap(), None);
        assert!(!backend.purge_dead_letter(&JobId::from("dl")).await.unwrap());
    }

    #[tokio::test]
    async fn test_closed_backend_rejects_calls() {
        let backend = MemoryBackend::new();
        backend.close().await.unwrap();

        assert!(matches!(backend.ping().await, Err(BackendError::Closed)));
        assert!(matches!(backend.enqueue(vec![job("1")]).await, Err(BackendError::Closed)));
    }
}
