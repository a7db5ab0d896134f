//! Per-job processing: one provider attempt and its bookkeeping

use std::{any::Any, panic::AssertUnwindSafe, time::Instant};

use futures_util::FutureExt;
use tribe_common::{
    EmailDeliveryResult, EmailOptions, EmailSender, internal, outgoing,
    tracing::{error, info, warn},
};

use super::publish_circuit_state;
use crate::{
    circuit_breaker::CircuitError,
    classify::{ErrorCategory, ProviderFailure},
    dead_letter::DeadLetterEntry,
    job::{StoredJob, now_ms},
    queue::Inner,
};

/// Message recorded when the breaker refuses a call
const CIRCUIT_OPEN: &str = "circuit breaker is open";

/// Call the sender, turning every kind of failure into a [`ProviderFailure`]
async fn deliver(
    sender: &dyn EmailSender,
    options: &EmailOptions,
) -> Result<EmailDeliveryResult, ProviderFailure> {
    match AssertUnwindSafe(sender.send(options)).catch_unwind().await {
        Ok(Ok(result)) if result.success => Ok(result),
        Ok(Ok(result)) => Err(ProviderFailure::new(
            result.status_code,
            result
                .error
                .unwrap_or_else(|| "provider rejected the message".to_string()),
        )
        .with_field(result.error_field)),
        Ok(Err(e)) => Err(ProviderFailure::new(None, e.to_string())),
        Err(panic) => Err(ProviderFailure::new(
            None,
            format!("email sender panicked: {}", panic_message(panic.as_ref())),
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

pub(super) async fn process_job(queue: &Inner, sender: &dyn EmailSender, mut job: StoredJob) {
    let attempt = job.attempts_made + 1;
    job.data.attempt_number = Some(attempt);

    outgoing!(
        level = DEBUG,
        job_id = %job.id,
        attempt,
        "Sending email"
    );

    let started = Instant::now();
    let outcome = queue
        .breaker
        .call(|| deliver(sender, &job.data.email))
        .await;
    let elapsed = started.elapsed().as_secs_f64();

    publish_circuit_state(&queue.breaker);

    match outcome {
        Ok(result) => {
            if let Err(e) = queue.backend.complete(&job.id).await {
                error!(job_id = %job.id, error = %e, "Failed to mark email job completed");
                return;
            }

            if let Some(metrics) = tribe_metrics::metrics() {
                metrics.queue.record_completed(elapsed, job.attempts_made);
            }

            info!(
                job_id = %job.id,
                attempt,
                message_id = result.message_id.as_deref().unwrap_or_default(),
                "Email delivered"
            );
        }
        Err(CircuitError::Open) => {
            if let Some(metrics) = tribe_metrics::metrics() {
                metrics.queue.record_circuit_rejection();
            }
            handle_failure(queue, job, ProviderFailure::new(None, CIRCUIT_OPEN), elapsed).await;
        }
        Err(CircuitError::Inner(failure)) => {
            handle_failure(queue, job, failure, elapsed).await;
        }
    }
}

async fn handle_failure(queue: &Inner, mut job: StoredJob, failure: ProviderFailure, elapsed: f64) {
    let category = (queue.classifier)(&failure);
    let policy = &queue.config.retry;

    if !category.is_retryable() {
        // Permanent failures do not consume an attempt
        let attempts_made = job.attempts_made;
        move_to_dead_letter(queue, job, category, failure, attempts_made).await;
        return;
    }

    let made = job.attempts_made + 1;
    if !policy.should_retry(made) {
        move_to_dead_letter(queue, job, category, failure, made).await;
        return;
    }

    let delay = policy.backoff(job.attempts_made);
    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);

    job.attempts_made = made;
    job.last_error = Some(failure.message.clone());

    warn!(
        job_id = %job.id,
        attempt = made,
        category = %category,
        status_code = failure.status_code,
        delay_ms,
        error = %failure.message,
        "Email delivery failed, retry scheduled"
    );

    let job_id = job.id.clone();
    if let Err(e) = queue
        .backend
        .schedule_retry(job, now_ms().saturating_add(delay_ms))
        .await
    {
        error!(job_id = %job_id, error = %e, "Failed to schedule email retry");
        return;
    }

    if let Some(metrics) = tribe_metrics::metrics() {
        metrics.queue.record_retry(category.as_str(), elapsed);
    }
}

async fn move_to_dead_letter(
    queue: &Inner,
    job: StoredJob,
    category: ErrorCategory,
    failure: ProviderFailure,
    attempts_made: u32,
) {
    let job_id = job.id.clone();

    warn!(
        job_id = %job_id,
        attempts_made,
        category = %category,
        status_code = failure.status_code,
        error = %failure.message,
        "Email job moved to dead-letter store"
    );

    let entry = DeadLetterEntry::from_job(
        job,
        category,
        failure.message,
        failure.status_code,
        attempts_made,
    );

    if let Err(e) = queue.backend.dead_letter(entry).await {
        error!(job_id = %job_id, error = %e, "Failed to dead-letter email job");
        return;
    }

    internal!(level = DEBUG, job_id = %job_id, "Dead-letter entry stored");

    if let Some(metrics) = tribe_metrics::metrics() {
        metrics.queue.record_dead_letter(category.as_str());
    }
}
