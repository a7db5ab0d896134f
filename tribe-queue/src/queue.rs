//! The email delivery queue

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use serde::{Deserialize, Serialize};
use tokio::{
    sync::{Notify, broadcast},
    task::JoinHandle,
};
use tribe_common::{EmailSender, Signal, internal, tracing::warn};

use crate::{
    backends::{JobCounts, MemoryBackend, QueueBackend},
    circuit_breaker::{CircuitBreaker, CircuitBreakerStats, CircuitState},
    classify::{Classifier, classify},
    config::QueueConfig,
    dead_letter::DeadLetterEntry,
    error::{QueueError, Result, ValidationError},
    job::{EmailJobData, JobHandle, JobId, StoredJob},
    rate_limiter::RateLimiter,
    worker,
};

/// Point-in-time view of the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetricsSnapshot {
    pub waiting: u64,
    pub active: u64,
    /// Running total
    pub completed: u64,
    /// Running total of jobs moved to the dead-letter store
    pub failed: u64,
    pub delayed: u64,
    pub dead_letter: u64,
    pub circuit_breaker: CircuitState,
}

impl QueueMetricsSnapshot {
    const fn new(counts: JobCounts, circuit_breaker: CircuitState) -> Self {
        Self {
            waiting: counts.waiting,
            active: counts.active,
            completed: counts.completed,
            failed: counts.failed,
            delayed: counts.delayed,
            dead_letter: counts.dead_letter,
            circuit_breaker,
        }
    }
}

#[derive(Debug)]
struct WorkerHandle {
    shutdown: broadcast::Sender<Signal>,
    task: JoinHandle<()>,
}

/// State shared between the queue handle and its worker
pub(crate) struct Inner {
    pub(crate) backend: Arc<dyn QueueBackend>,
    pub(crate) config: QueueConfig,
    pub(crate) classifier: Classifier,
    pub(crate) breaker: Arc<CircuitBreaker>,
    pub(crate) limiter: RateLimiter,
    /// Wakes an idle worker when work arrives
    pub(crate) work_available: Notify,
    closed: AtomicBool,
    worker: parking_lot::Mutex<Option<WorkerHandle>>,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailQueue")
            .field("backend", &self.backend)
            .field("config", &self.config)
            .field("breaker", &self.breaker.state())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Builder for [`EmailQueue`]
#[derive(Debug)]
pub struct EmailQueueBuilder {
    config: QueueConfig,
    backend: Option<Arc<dyn QueueBackend>>,
    classifier: Classifier,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl EmailQueueBuilder {
    /// Use this backend instead of connecting to `config.url`
    #[must_use]
    pub fn backend(mut self, backend: impl QueueBackend + 'static) -> Self {
        self.backend = Some(Arc::new(backend));
        self
    }

    /// Replace the default provider error classifier
    #[must_use]
    pub fn classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Share a circuit breaker with other callers of the same provider
    #[must_use]
    pub fn circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Create the queue, connecting to the configured backend if none was
    /// supplied
    pub async fn build(self) -> Result<EmailQueue> {
        let backend = match self.backend {
            Some(backend) => backend,
            None => connect_backend(&self.config).await?,
        };

        let breaker = self.breaker.unwrap_or_else(|| {
            Arc::new(CircuitBreaker::new(self.config.circuit_breaker.clone()))
        });

        internal!(
            level = INFO,
            backend = ?backend,
            concurrency = self.config.concurrency,
            rate_limit = self.config.rate_limit,
            max_attempts = self.config.retry.max_attempts,
            "Email queue initialised"
        );

        Ok(EmailQueue {
            inner: Arc::new(Inner {
                limiter: RateLimiter::new(self.config.rate_limit, self.config.burst()),
                backend,
                config: self.config,
                classifier: self.classifier,
                breaker,
                work_available: Notify::new(),
                closed: AtomicBool::new(false),
                worker: parking_lot::Mutex::new(None),
            }),
        })
    }
}

/// Pick a backend from the configured URL
async fn connect_backend(config: &QueueConfig) -> Result<Arc<dyn QueueBackend>> {
    match config.url.as_deref() {
        None | Some("") => Ok(Arc::new(MemoryBackend::new())),
        Some(url) if url.starts_with("memory://") => Ok(Arc::new(MemoryBackend::new())),
        #[cfg(feature = "redis")]
        Some(url) if url.starts_with("redis://") || url.starts_with("rediss://") => {
            let backend = crate::backends::RedisBackend::connect(
                url,
                config.key_prefix.clone(),
                config.command_timeout(),
            )
            .await?;
            Ok(Arc::new(backend))
        }
        Some(url) => Err(QueueError::Configuration(format!(
            "Unsupported queue backend URL scheme: {}",
            url.split("://").next().unwrap_or(url)
        ))),
    }
}

/// Handle to an email delivery queue
///
/// Cheap to clone; all clones share the same backend, breaker and worker.
#[derive(Debug, Clone)]
pub struct EmailQueue {
    inner: Arc<Inner>,
}

impl EmailQueue {
    #[must_use]
    pub fn builder(config: QueueConfig) -> EmailQueueBuilder {
        EmailQueueBuilder {
            config,
            backend: None,
            classifier: classify,
            breaker: None,
        }
    }

    /// Queue on an explicit backend with the default classifier
    pub async fn with_backend(
        config: QueueConfig,
        backend: impl QueueBackend + 'static,
    ) -> Result<Self> {
        Self::builder(config).backend(backend).build().await
    }

    #[must_use]
    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.inner.breaker
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            Err(QueueError::Closed)
        } else {
            Ok(())
        }
    }

    /// Validate and persist one job
    ///
    /// Returns once the backend has acknowledged the write. Fails with a
    /// backend error (see [`QueueError::is_unavailable`]) rather than
    /// dropping the job when the backend cannot be reached.
    pub async fn add_email(&self, mut data: EmailJobData) -> Result<JobHandle> {
        self.ensure_open()?;
        data.normalize();
        data.validate()?;

        let job = StoredJob::new(data);
        let handle = self
            .persist(vec![job])
            .await?
            .pop()
            .ok_or_else(|| QueueError::Configuration("Backend returned no handle".to_string()))?;

        internal!(
            level = DEBUG,
            job_id = %handle.id,
            deduplicated = handle.deduplicated,
            "Email job accepted"
        );

        Ok(handle)
    }

    /// Validate and persist a batch of jobs in one atomic write
    ///
    /// Nothing is written if any job fails validation.
    pub async fn add_bulk_emails(&self, mut jobs: Vec<EmailJobData>) -> Result<Vec<JobHandle>> {
        self.ensure_open()?;

        for (index, data) in jobs.iter_mut().enumerate() {
            data.normalize();
            data.validate().map_err(|source| ValidationError::InBatch {
                index,
                source: Box::new(source),
            })?;
        }

        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        let handles = self
            .persist(jobs.into_iter().map(StoredJob::new).collect())
            .await?;

        internal!(level = DEBUG, count = handles.len(), "Email batch accepted");

        Ok(handles)
    }

    async fn persist(&self, jobs: Vec<StoredJob>) -> Result<Vec<JobHandle>> {
        let handles = self.inner.backend.enqueue(jobs).await.inspect_err(|e| {
            warn!(error = %e, "Failed to enqueue email job");
        })?;

        let fresh = handles.iter().filter(|h| !h.deduplicated).count();
        if fresh > 0 {
            self.inner.work_available.notify_one();
            if let Some(metrics) = tribe_metrics::metrics() {
                metrics.queue.record_enqueued(fresh as u64);
            }
        }

        Ok(handles)
    }

    /// Start processing jobs with `sender`
    ///
    /// Must be called from within a Tokio runtime. Returns `false` (after
    /// logging a warning) if a worker is already running or the queue is
    /// closed.
    pub fn start_worker(&self, sender: Arc<dyn EmailSender>) -> bool {
        let mut worker = self.inner.worker.lock();

        if self.inner.closed.load(Ordering::SeqCst) {
            warn!("Cannot start email worker: queue is closed");
            return false;
        }

        if worker.is_some() {
            warn!("Email worker already running, ignoring start request");
            return false;
        }

        let (shutdown, receiver) = broadcast::channel(1);
        let task = tokio::spawn(worker::run(self.inner.clone(), sender, receiver));
        *worker = Some(WorkerHandle { shutdown, task });

        true
    }

    #[must_use]
    pub fn is_worker_running(&self) -> bool {
        self.inner
            .worker
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.task.is_finished())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Check the backend answers
    pub async fn ping(&self) -> Result<()> {
        Ok(self.inner.backend.ping().await?)
    }

    pub async fn queue_metrics(&self) -> Result<QueueMetricsSnapshot> {
        let counts = self.inner.backend.counts().await?;
        let snapshot = QueueMetricsSnapshot::new(counts, self.inner.breaker.state());

        if let Some(metrics) = tribe_metrics::metrics() {
            metrics.queue.set_queue_sizes(
                snapshot.waiting,
                snapshot.active,
                snapshot.delayed,
                snapshot.dead_letter,
            );
        }

        Ok(snapshot)
    }

    /// Re-enqueue a dead-lettered job under a fresh id
    ///
    /// Returns `None` if no entry exists for `job_id`.
    pub async fn retry_dead_letter_job(&self, job_id: &JobId) -> Result<Option<JobHandle>> {
        self.ensure_open()?;

        let handle = self.inner.backend.retry_dead_letter(job_id).await?;
        match &handle {
            Some(handle) => {
                self.inner.work_available.notify_one();
                internal!(
                    level = INFO,
                    job_id = %job_id,
                    new_job_id = %handle.id,
                    "Dead-letter job re-enqueued"
                );
            }
            None => {
                internal!(level = DEBUG, job_id = %job_id, "No dead-letter entry to retry");
            }
        }

        Ok(handle)
    }

    pub async fn dead_letters(&self) -> Result<Vec<DeadLetterEntry>> {
        Ok(self.inner.backend.list_dead_letters().await?)
    }

    /// Delete a dead-letter entry; returns whether one existed
    pub async fn purge_dead_letter(&self, job_id: &JobId) -> Result<bool> {
        let purged = self.inner.backend.purge_dead_letter(job_id).await?;
        if purged {
            internal!(level = INFO, job_id = %job_id, "Dead-letter entry purged");
        }
        Ok(purged)
    }

    #[must_use]
    pub fn get_circuit_breaker_state(&self) -> CircuitState {
        self.inner.breaker.state()
    }

    #[must_use]
    pub fn circuit_breaker_stats(&self) -> CircuitBreakerStats {
        self.inner.breaker.stats()
    }

    pub fn reset_circuit_breaker(&self) {
        self.inner.breaker.reset();
        worker::publish_circuit_state(&self.inner.breaker);
    }

    /// Stop accepting work, stop the worker and close the backend
    ///
    /// In-flight jobs get `shutdown_timeout` to finish; the rest are
    /// released back to waiting. Calling `close` again is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        internal!(level = INFO, "Closing email queue");

        let worker = self.inner.worker.lock().take();
        if let Some(WorkerHandle { shutdown, task }) = worker {
            let _ = shutdown.send(Signal::Shutdown);
            if let Err(e) = task.await {
                warn!(error = %e, "Email worker task ended abnormally");
            }
        }

        self.inner.backend.close().await?;
        internal!(level = INFO, "Email queue closed");

        Ok(())
    }
}
