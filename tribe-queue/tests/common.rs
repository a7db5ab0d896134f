#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tribe_common::{EmailDeliveryResult, EmailOptions, EmailSender, SendError};
use tribe_queue::{CircuitBreakerConfig, QueueConfig, RetryPolicy};

pub const WAIT: Duration = Duration::from_secs(5);

/// One scripted provider response
pub enum Reply {
    Deliver(&'static str),
    Reject(u16, &'static str),
    Fail(SendError),
    Panic,
    Hang,
}

/// Sender that plays back a script, then repeats the fallback
pub struct ScriptedSender {
    script: Mutex<VecDeque<Reply>>,
    fallback: fn() -> Reply,
    calls: AtomicUsize,
    seen: Mutex<Vec<EmailOptions>>,
}

impl ScriptedSender {
    pub fn new(script: Vec<Reply>) -> Arc<Self> {
        Self::with_fallback(script, || Reply::Deliver("fallback"))
    }

    pub fn with_fallback(script: Vec<Reply>, fallback: fn() -> Reply) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<EmailOptions> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl EmailSender for ScriptedSender {
    async fn send(&self, options: &EmailOptions) -> Result<EmailDeliveryResult, SendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(options.clone());

        let reply = self.script.lock().pop_front().unwrap_or_else(self.fallback);
        match reply {
            Reply::Deliver(id) => Ok(EmailDeliveryResult::delivered(Some(id.to_string()))),
            Reply::Reject(status, message) => {
                Ok(EmailDeliveryResult::rejected(Some(status), message))
            }
            Reply::Fail(e) => Err(e),
            Reply::Panic => panic!("scripted sender panic"),
            Reply::Hang => std::future::pending().await,
        }
    }
}

/// Fast retries, no jitter, no rate limit
pub fn config() -> QueueConfig {
    QueueConfig {
        concurrency: 2,
        rate_limit: 0,
        retry: RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 5,
            max_delay_ms: 40,
            max_jitter_ms: 0,
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 60_000,
        },
        poll_interval_ms: 5,
        ..QueueConfig::default()
    }
}
