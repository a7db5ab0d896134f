//! Worker loop
//!
//! One task per queue claims jobs and hands each to its own task on a
//! [`JoinSet`]. A semaphore bounds the jobs in flight and the rate limiter
//! bounds how fast new ones start.
//!
//! ## Graceful Shutdown
//!
//! On [`Signal::Shutdown`]:
//! 1. Stop claiming
//! 2. Wait for in-flight jobs (bounded by `shutdown_timeout`)
//! 3. Abort the stragglers and release their jobs back to waiting

mod process;

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashSet;
use tokio::{
    sync::{Semaphore, broadcast},
    task::JoinSet,
};
use tribe_common::{
    EmailSender, Signal, internal,
    tracing::{debug, error, warn},
};

use crate::{
    circuit_breaker::{CircuitBreaker, CircuitState},
    job::{JobId, now_ms},
    queue::Inner,
};

type InFlight = Arc<DashSet<JobId>>;

pub(crate) async fn run(
    queue: Arc<Inner>,
    sender: Arc<dyn EmailSender>,
    mut shutdown: broadcast::Receiver<Signal>,
) {
    let concurrency = queue.config.concurrency.max(1);
    internal!(level = INFO, concurrency, "Email worker starting");

    let permits = Arc::new(Semaphore::new(concurrency));
    let in_flight: InFlight = Arc::default();
    let mut tasks = JoinSet::new();

    let stall_check_every = queue.config.stalled_after().max(Duration::from_secs(1));
    let mut last_stall_check: Option<Instant> = None;

    loop {
        reap(&mut tasks);

        if last_stall_check.is_none_or(|at| at.elapsed() >= stall_check_every) {
            recover_stalled(&queue).await;
            last_stall_check = Some(Instant::now());
        }

        let permit = tokio::select! {
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = shutdown.recv() => break,
        };

        let job = match queue.backend.claim(now_ms()).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                drop(permit);
                tokio::select! {
                    () = queue.work_available.notified() => {}
                    () = tokio::time::sleep(queue.config.poll_interval()) => {}
                    _ = shutdown.recv() => break,
                }
                continue;
            }
            Err(e) => {
                drop(permit);
                error!(error = %e, "Failed to claim email job");
                tokio::select! {
                    () = tokio::time::sleep(queue.config.poll_interval()) => {}
                    _ = shutdown.recv() => break,
                }
                continue;
            }
        };

        let rate_limited = tokio::select! {
            () = queue.limiter.acquire() => false,
            _ = shutdown.recv() => true,
        };
        if rate_limited {
            if let Err(e) = queue.backend.release(&job.id).await {
                warn!(job_id = %job.id, error = %e, "Failed to release job during shutdown");
            }
            break;
        }

        let id = job.id.clone();
        in_flight.insert(id.clone());

        let task_queue = queue.clone();
        let task_sender = sender.clone();
        let task_in_flight = in_flight.clone();
        tasks.spawn(async move {
            let _permit = permit;
            process::process_job(&task_queue, task_sender.as_ref(), job).await;
            // Aborted tasks keep their id so shutdown can release the job
            task_in_flight.remove(&id);
        });
    }

    internal!(level = INFO, "Email worker received shutdown signal");
    drain(&queue, &mut tasks, &in_flight).await;
    internal!(level = INFO, "Email worker shutdown complete");
}

fn reap(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.try_join_next() {
        if let Err(e) = result {
            error!(error = %e, "Email job task failed");
        }
    }
}

async fn recover_stalled(queue: &Inner) {
    let stalled_after = u64::try_from(queue.config.stalled_after().as_millis()).unwrap_or(u64::MAX);
    let cutoff = now_ms().saturating_sub(stalled_after);

    match queue.backend.recover_stalled(cutoff).await {
        Ok(0) => {}
        Ok(recovered) => {
            warn!(recovered, "Returned stalled email jobs to waiting");
            queue.work_available.notify_one();
        }
        Err(e) => error!(error = %e, "Failed to recover stalled email jobs"),
    }
}

async fn drain(queue: &Inner, tasks: &mut JoinSet<()>, in_flight: &InFlight) {
    let timeout = queue.config.shutdown_timeout();
    let start = Instant::now();

    let drained = tokio::time::timeout(timeout, async {
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Email job task failed");
            }
            debug!(
                remaining = tasks.len(),
                "Waiting for in-flight email jobs ({:.1}s elapsed)...",
                start.elapsed().as_secs_f64()
            );
        }
    })
    .await;

    if drained.is_ok() {
        internal!(level = INFO, "All in-flight email jobs completed");
        return;
    }

    tasks.abort_all();
    while tasks.join_next().await.is_some() {}

    let stragglers: Vec<JobId> = in_flight.iter().map(|id| id.key().clone()).collect();
    warn!(
        remaining = stragglers.len(),
        "Shutdown timeout exceeded, releasing unfinished email jobs back to waiting"
    );

    for id in stragglers {
        if let Err(e) = queue.backend.release(&id).await {
            error!(job_id = %id, error = %e, "Failed to release email job");
        }
        in_flight.remove(&id);
    }
}

/// Mirror the breaker state into the metrics gauge
pub(crate) fn publish_circuit_state(breaker: &CircuitBreaker) {
    if let Some(metrics) = tribe_metrics::metrics() {
        let gauge = match breaker.state() {
            CircuitState::Closed => tribe_metrics::CircuitGauge::Closed,
            CircuitState::HalfOpen => tribe_metrics::CircuitGauge::HalfOpen,
            CircuitState::Open => tribe_metrics::CircuitGauge::Open,
        };
        metrics.queue.set_circuit_state(gauge);
    }
}
