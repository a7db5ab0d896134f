//! Email queue metrics
//!
//! Tracks jobs through the delivery queue:
//! - Enqueued, completed, retried and dead-lettered job counts
//! - Provider call durations
//! - Circuit breaker rejections and current state
//! - Queue depth by status (fed from periodic snapshots)

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, Meter},
};

/// Numeric encoding of the breaker mode for the state gauge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitGauge {
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

#[derive(Debug)]
pub struct QueueMetrics {
    jobs_enqueued: Counter<u64>,
    jobs_completed: Counter<u64>,
    jobs_retried: Counter<u64>,
    jobs_dead_lettered: Counter<u64>,
    delivery_duration: Histogram<f64>,
    circuit_rejections: Counter<u64>,

    // Shared with the observable gauge callbacks
    circuit_state: Arc<AtomicU64>,
    waiting: Arc<AtomicU64>,
    active: Arc<AtomicU64>,
    delayed: Arc<AtomicU64>,
    dead_letter: Arc<AtomicU64>,
}

impl QueueMetrics {
    #[must_use]
    pub fn new() -> Self {
        let meter = meter();

        let jobs_enqueued = meter
            .u64_counter("tribe.email.jobs.enqueued.total")
            .with_description("Total number of email jobs accepted by the queue")
            .build();

        let jobs_completed = meter
            .u64_counter("tribe.email.jobs.completed.total")
            .with_description("Total number of email jobs delivered successfully")
            .build();

        let jobs_retried = meter
            .u64_counter("tribe.email.jobs.retried.total")
            .with_description("Total number of retries scheduled, by error category")
            .build();

        let jobs_dead_lettered = meter
            .u64_counter("tribe.email.jobs.dead_lettered.total")
            .with_description("Total number of jobs moved to the dead-letter store, by error category")
            .build();

        let delivery_duration = meter
            .f64_histogram("tribe.email.delivery.duration.seconds")
            .with_description("Distribution of provider call durations")
            .build();

        let circuit_rejections = meter
            .u64_counter("tribe.email.circuit.rejections.total")
            .with_description("Total number of calls rejected by an open circuit")
            .build();

        let circuit_state = Arc::new(AtomicU64::new(CircuitGauge::Closed as u64));
        let state = circuit_state.clone();
        meter
            .u64_observable_gauge("tribe.email.circuit.state")
            .with_description("Circuit breaker state (0 closed, 1 half-open, 2 open)")
            .with_callback(move |observer| {
                observer.observe(state.load(Ordering::Relaxed), &[]);
            })
            .build();

        let waiting = Arc::new(AtomicU64::new(0));
        let active = Arc::new(AtomicU64::new(0));
        let delayed = Arc::new(AtomicU64::new(0));
        let dead_letter = Arc::new(AtomicU64::new(0));

        let (w, a, d, dl) = (waiting.clone(), active.clone(), delayed.clone(), dead_letter.clone());
        meter
            .u64_observable_gauge("tribe.email.queue.size")
            .with_description("Current queue size by status")
            .with_callback(move |observer| {
                observer.observe(w.load(Ordering::Relaxed), &[KeyValue::new("status", "waiting")]);
                observer.observe(a.load(Ordering::Relaxed), &[KeyValue::new("status", "active")]);
                observer.observe(d.load(Ordering::Relaxed), &[KeyValue::new("status", "delayed")]);
                observer.observe(
                    dl.load(Ordering::Relaxed),
                    &[KeyValue::new("status", "dead_letter")],
                );
            })
            .build();

        Self {
            jobs_enqueued,
            jobs_completed,
            jobs_retried,
            jobs_dead_lettered,
            delivery_duration,
            circuit_rejections,
            circuit_state,
            waiting,
            active,
            delayed,
            dead_letter,
        }
    }

    pub fn record_enqueued(&self, count: u64) {
        self.jobs_enqueued.add(count, &[]);
    }

    /// Record a successful delivery and how long the provider took
    pub fn record_completed(&self, duration_secs: f64, attempts_made: u32) {
        self.delivery_duration
            .record(duration_secs, &[KeyValue::new("outcome", "success")]);
        self.jobs_completed
            .add(1, &[KeyValue::new("attempts", i64::from(attempts_made))]);
    }

    /// Record a failed provider call that will be retried
    pub fn record_retry(&self, category: &'static str, duration_secs: f64) {
        self.delivery_duration
            .record(duration_secs, &[KeyValue::new("outcome", "failure")]);
        self.jobs_retried
            .add(1, &[KeyValue::new("category", category)]);
    }

    pub fn record_dead_letter(&self, category: &'static str) {
        self.jobs_dead_lettered
            .add(1, &[KeyValue::new("category", category)]);
    }

    pub fn record_circuit_rejection(&self) {
        self.circuit_rejections.add(1, &[]);
    }

    pub fn set_circuit_state(&self, state: CircuitGauge) {
        self.circuit_state.store(state as u64, Ordering::Relaxed);
    }

    /// Update the depth gauges from a queue snapshot
    pub fn set_queue_sizes(&self, waiting: u64, active: u64, delayed: u64, dead_letter: u64) {
        self.waiting.store(waiting, Ordering::Relaxed);
        self.active.store(active, Ordering::Relaxed);
        self.delayed.store(delayed, Ordering::Relaxed);
        self.dead_letter.store(dead_letter, Ordering::Relaxed);
    }

    #[must_use]
    pub fn circuit_state(&self) -> u64 {
        self.circuit_state.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn waiting(&self) -> u64 {
        self.waiting.load(Ordering::Relaxed)
    }
}

impl Default for QueueMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn meter() -> Meter {
    opentelemetry::global::meter("tribe.email")
}
