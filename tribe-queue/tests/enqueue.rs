mod common;

use common::config;
use pretty_assertions::assert_eq;
use tribe_queue::{
    EmailJobData, EmailQueue, MemoryBackend, QueueError, TestBackend, ValidationError,
};

#[tokio::test]
async fn test_add_email_persists_waiting_job() {
    let backend = TestBackend::new();
    let queue = EmailQueue::with_backend(config(), backend.clone())
        .await
        .unwrap();

    let handle = queue
        .add_email(EmailJobData::new("max@example.com", "Hello", "<p>x</p>"))
        .await
        .unwrap();
    assert!(!handle.deduplicated);

    let job = backend.job(&handle.id).unwrap();
    assert_eq!(job.attempts_made, 0);
    assert_eq!(job.data.email.subject, "Hello");

    let metrics = queue.queue_metrics().await.unwrap();
    assert_eq!(metrics.waiting, 1);
    assert_eq!(metrics.circuit_breaker.as_str(), "closed");
}

#[tokio::test]
async fn test_recipient_is_stored_trimmed() {
    let backend = TestBackend::new();
    let queue = EmailQueue::with_backend(config(), backend.clone())
        .await
        .unwrap();

    let handle = queue
        .add_email(EmailJobData::new(" max@example.com ", "Hello", "<p>x</p>"))
        .await
        .unwrap();

    let job = backend.job(&handle.id).unwrap();
    assert_eq!(job.data.email.to, "max@example.com");
}

#[tokio::test]
async fn test_unreachable_backend_is_surfaced() {
    let backend = TestBackend::new();
    let queue = EmailQueue::with_backend(config(), backend.clone())
        .await
        .unwrap();

    backend.set_offline(true);
    let err = queue
        .add_email(EmailJobData::new("max@example.com", "Hello", "<p>x</p>"))
        .await
        .unwrap_err();
    assert!(err.is_unavailable());

    backend.set_offline(false);
    assert_eq!(backend.snapshot().waiting, 0);
}

#[tokio::test]
async fn test_validation_rejects_before_write() {
    let backend = TestBackend::new();
    let queue = EmailQueue::with_backend(config(), backend.clone())
        .await
        .unwrap();

    let err = queue
        .add_email(EmailJobData::new("max@example.com", "   ", "<p>x</p>"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        QueueError::Validation(ValidationError::MissingSubject)
    ));

    let err = queue
        .add_email(EmailJobData::new("no-at-sign", "Hello", "<p>x</p>"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        QueueError::Validation(ValidationError::Recipient(_))
    ));

    assert_eq!(backend.snapshot().waiting, 0);
}

#[tokio::test]
async fn test_bulk_enqueue_is_all_or_nothing() {
    let backend = TestBackend::new();
    let queue = EmailQueue::with_backend(config(), backend.clone())
        .await
        .unwrap();

    let err = queue
        .add_bulk_emails(vec![
            EmailJobData::new("a@example.com", "One", "<p>1</p>"),
            EmailJobData::new("", "Two", "<p>2</p>"),
        ])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        QueueError::Validation(ValidationError::InBatch { index: 1, .. })
    ));
    assert_eq!(backend.snapshot().waiting, 0);

    let handles = queue
        .add_bulk_emails(vec![
            EmailJobData::new("a@example.com", "One", "<p>1</p>"),
            EmailJobData::new("b@example.com", "Two", "<p>2</p>"),
        ])
        .await
        .unwrap();
    assert_eq!(handles.len(), 2);
    assert_eq!(backend.snapshot().waiting, 2);
}

#[tokio::test]
async fn test_bulk_enqueue_respects_capacity() {
    let queue = EmailQueue::with_backend(config(), MemoryBackend::with_capacity(1))
        .await
        .unwrap();

    let err = queue
        .add_bulk_emails(vec![
            EmailJobData::new("a@example.com", "One", "<p>1</p>"),
            EmailJobData::new("b@example.com", "Two", "<p>2</p>"),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::Backend(_)));
    assert_eq!(queue.queue_metrics().await.unwrap().waiting, 0);
}

#[tokio::test]
async fn test_caller_job_id_deduplicates() {
    let backend = TestBackend::new();
    let queue = EmailQueue::with_backend(config(), backend.clone())
        .await
        .unwrap();

    let data = EmailJobData::new("a@example.com", "Invoice", "<p>1</p>").with_job_id("invoice-42");
    let first = queue.add_email(data.clone()).await.unwrap();
    let second = queue.add_email(data).await.unwrap();

    assert_eq!(first.id.as_str(), "invoice-42");
    assert_eq!(second.id, first.id);
    assert!(second.deduplicated);
    assert_eq!(backend.snapshot().waiting, 1);
}

#[tokio::test]
async fn test_closed_queue_rejects_work() {
    let queue = EmailQueue::with_backend(config(), TestBackend::new())
        .await
        .unwrap();

    queue.close().await.unwrap();
    queue.close().await.unwrap();
    assert!(queue.is_closed());

    let err = queue
        .add_email(EmailJobData::new("a@example.com", "Hi", "<p>x</p>"))
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::Closed));
    assert!(err.is_unavailable());
}
