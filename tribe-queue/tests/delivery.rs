mod common;

use common::{Reply, ScriptedSender, WAIT, config};
use pretty_assertions::assert_eq;
use tribe_common::SendError;
use tribe_queue::{CircuitState, EmailJobData, EmailQueue, ErrorCategory, TestBackend};

async fn queue_with(config: tribe_queue::QueueConfig) -> (EmailQueue, TestBackend) {
    let backend = TestBackend::new();
    let queue = EmailQueue::with_backend(config, backend.clone())
        .await
        .unwrap();
    (queue, backend)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalid_recipient_is_dead_lettered_without_retry() {
    let (queue, backend) = queue_with(config()).await;
    let sender = ScriptedSender::new(vec![Reply::Reject(400, "invalid email")]);

    let handle = queue
        .add_email(EmailJobData::new("bad@@invalid", "Welcome", "<p>hi</p>"))
        .await
        .unwrap();
    assert!(queue.start_worker(sender.clone()));

    backend.wait_for_dead_letters(1, WAIT).await.unwrap();

    let entries = queue.dead_letters().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].job_id, handle.id);
    assert_eq!(entries[0].category, ErrorCategory::InvalidEmail);
    assert_eq!(entries[0].attempts_made, 0);
    assert_eq!(entries[0].status_code, Some(400));
    assert_eq!(sender.calls(), 1);

    let metrics = queue.queue_metrics().await.unwrap();
    assert_eq!(metrics.failed, 1);
    assert_eq!(metrics.dead_letter, 1);
    assert_eq!(metrics.completed, 0);

    queue.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_transient_failures_retry_until_success() {
    let (queue, backend) = queue_with(config()).await;
    let sender = ScriptedSender::new(vec![
        Reply::Reject(503, "Service Unavailable"),
        Reply::Reject(503, "Service Unavailable"),
        Reply::Reject(503, "Service Unavailable"),
        Reply::Reject(503, "Service Unavailable"),
        Reply::Deliver("m1"),
    ]);

    let before = queue.queue_metrics().await.unwrap().completed;
    queue
        .add_email(EmailJobData::new("sam@example.com", "Digest", "<p>news</p>"))
        .await
        .unwrap();
    queue.start_worker(sender.clone());

    backend.wait_for_completed(before + 1, WAIT).await.unwrap();

    let metrics = queue.queue_metrics().await.unwrap();
    assert_eq!(metrics.completed, before + 1);
    assert_eq!(metrics.dead_letter, 0);
    assert_eq!(sender.calls(), 5);
    assert_eq!(queue.get_circuit_breaker_state(), CircuitState::Closed);

    queue.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_each_retry_carries_the_next_attempt_number() {
    let (queue, backend) = queue_with(config()).await;
    let sender = ScriptedSender::new(vec![
        Reply::Reject(503, "Service Unavailable"),
        Reply::Fail(SendError::Timeout("30s elapsed".to_string())),
        Reply::Reject(429, "Too Many Requests"),
        Reply::Deliver("m2"),
    ]);

    let handle = queue
        .add_email(EmailJobData::new("lee@example.com", "Digest", "<p>news</p>"))
        .await
        .unwrap();
    queue.start_worker(sender.clone());

    backend.wait_for_completed(1, WAIT).await.unwrap();

    let retries = backend.scheduled_retries();
    assert!(retries.iter().all(|job| job.id == handle.id));
    assert_eq!(
        retries
            .iter()
            .map(|job| (job.data.attempt_number, job.attempts_made))
            .collect::<Vec<_>>(),
        vec![(Some(1), 1), (Some(2), 2), (Some(3), 3)]
    );
    assert_eq!(sender.calls(), 4);

    queue.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_open_circuit_stops_calling_provider() {
    let mut config = config();
    config.retry.max_attempts = 10;
    let (queue, backend) = queue_with(config).await;
    let sender = ScriptedSender::with_fallback(Vec::new(), || {
        Reply::Reject(503, "Service Unavailable")
    });

    queue
        .add_email(EmailJobData::new("pat@example.com", "Hello", "<p>x</p>"))
        .await
        .unwrap();
    queue.start_worker(sender.clone());

    backend.wait_for_dead_letters(1, WAIT).await.unwrap();

    // Five real failures open the circuit; the remaining attempts are
    // rejected by the breaker without reaching the provider
    assert_eq!(sender.calls(), 5);
    assert_eq!(queue.get_circuit_breaker_state(), CircuitState::Open);

    let entries = queue.dead_letters().await.unwrap();
    assert_eq!(entries[0].attempts_made, 10);
    assert_eq!(entries[0].category, ErrorCategory::Unknown);
    assert_eq!(entries[0].error_message, "circuit breaker is open");

    queue.reset_circuit_breaker();
    assert_eq!(queue.get_circuit_breaker_state(), CircuitState::Closed);

    queue.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_exhausted_retries_dead_letter_with_category() {
    let mut config = config();
    config.retry.max_attempts = 3;
    let (queue, backend) = queue_with(config).await;
    let sender = ScriptedSender::with_fallback(Vec::new(), || {
        Reply::Fail(SendError::Timeout("30s elapsed".to_string()))
    });

    queue
        .add_email(EmailJobData::new("kim@example.com", "Hello", "<p>x</p>"))
        .await
        .unwrap();
    queue.start_worker(sender.clone());

    backend.wait_for_dead_letters(1, WAIT).await.unwrap();

    let entries = queue.dead_letters().await.unwrap();
    assert_eq!(entries[0].attempts_made, 3);
    assert_eq!(entries[0].category, ErrorCategory::Timeout);
    assert_eq!(sender.calls(), 3);

    queue.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_retry_dead_letter_job() {
    let (queue, backend) = queue_with(config()).await;
    let sender = ScriptedSender::new(vec![Reply::Reject(403, "Sender blocked")]);

    let original = queue
        .add_email(EmailJobData::new("lee@example.com", "Receipt", "<p>paid</p>"))
        .await
        .unwrap();
    queue.start_worker(sender.clone());
    backend.wait_for_dead_letters(1, WAIT).await.unwrap();

    assert_eq!(
        queue
            .retry_dead_letter_job(&"no-such-job".into())
            .await
            .unwrap(),
        None
    );

    let retried = queue
        .retry_dead_letter_job(&original.id)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(retried.id, original.id);

    backend.wait_for_completed(1, WAIT).await.unwrap();
    assert!(queue.dead_letters().await.unwrap().is_empty());

    let seen = sender.seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], seen[1]);
    assert_eq!(seen[1].to, "lee@example.com");

    queue.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sender_panic_is_retried() {
    let (queue, backend) = queue_with(config()).await;
    let sender = ScriptedSender::new(vec![Reply::Panic, Reply::Deliver("m2")]);

    queue
        .add_email(EmailJobData::new("ash@example.com", "Hi", "<p>x</p>"))
        .await
        .unwrap();
    queue.start_worker(sender.clone());

    backend.wait_for_completed(1, WAIT).await.unwrap();
    assert_eq!(sender.calls(), 2);
    assert!(queue.is_worker_running());

    queue.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_releases_in_flight_jobs() {
    let mut config = config();
    config.shutdown_timeout_secs = 0;
    let (queue, backend) = queue_with(config).await;
    let sender = ScriptedSender::with_fallback(Vec::new(), || Reply::Hang);

    queue
        .add_email(EmailJobData::new("jo@example.com", "Hi", "<p>x</p>"))
        .await
        .unwrap();
    queue.start_worker(sender.clone());

    backend
        .wait_until(WAIT, |counts| counts.active == 1)
        .await
        .unwrap();

    queue.close().await.unwrap();
    assert!(!queue.is_worker_running());

    let counts = backend.snapshot();
    assert_eq!(counts.active, 0);
    assert_eq!(counts.waiting, 1);
}

#[tokio::test]
async fn test_second_start_worker_is_ignored() {
    let (queue, _backend) = queue_with(config()).await;
    let sender = ScriptedSender::new(Vec::new());

    assert!(queue.start_worker(sender.clone()));
    assert!(!queue.start_worker(sender.clone()));
    assert!(queue.is_worker_running());

    queue.close().await.unwrap();
}
