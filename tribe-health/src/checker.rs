//! Readiness state shared between the daemon and the health server

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;

/// Component flags polled by the readiness probe
///
/// Flags start pessimistic (not ready); the daemon flips them as the
/// backend connects and the worker starts.
#[derive(Debug)]
pub struct HealthChecker {
    worker_running: AtomicBool,
    backend_ready: AtomicBool,
    circuit_open: AtomicBool,
    waiting: AtomicU64,
    max_queue_size: u64,
}

impl HealthChecker {
    #[must_use]
    pub const fn new(max_queue_size: u64) -> Self {
        Self {
            worker_running: AtomicBool::new(false),
            backend_ready: AtomicBool::new(false),
            circuit_open: AtomicBool::new(false),
            waiting: AtomicU64::new(0),
            max_queue_size,
        }
    }

    pub fn set_worker_running(&self, running: bool) {
        self.worker_running.store(running, Ordering::Relaxed);
        tracing::debug!(running, "Worker readiness updated");
    }

    pub fn set_backend_ready(&self, ready: bool) {
        let previous = self.backend_ready.swap(ready, Ordering::Relaxed);
        if previous != ready {
            tracing::debug!(ready, "Backend readiness updated");
        }
    }

    pub fn set_circuit_open(&self, open: bool) {
        self.circuit_open.store(open, Ordering::Relaxed);
    }

    pub fn set_waiting(&self, waiting: u64) {
        self.waiting.store(waiting, Ordering::Relaxed);
    }

    #[must_use]
    pub const fn is_alive(&self) -> bool {
        true
    }

    /// Worker running, backend reachable, circuit not open and the
    /// backlog below `max_queue_size`
    #[must_use]
    pub fn is_ready(&self) -> bool {
        let status = self.status();
        if !status.ready {
            tracing::debug!(
                worker_running = status.worker_running,
                backend_ready = status.backend_ready,
                circuit_open = status.circuit_open,
                waiting = status.waiting,
                max_queue_size = status.max_queue_size,
                "Readiness check failed"
            );
        }
        status.ready
    }

    #[must_use]
    pub fn status(&self) -> HealthStatus {
        let worker_running = self.worker_running.load(Ordering::Relaxed);
        let backend_ready = self.backend_ready.load(Ordering::Relaxed);
        let circuit_open = self.circuit_open.load(Ordering::Relaxed);
        let waiting = self.waiting.load(Ordering::Relaxed);

        HealthStatus {
            alive: self.is_alive(),
            ready: worker_running
                && backend_ready
                && !circuit_open
                && waiting < self.max_queue_size,
            worker_running,
            backend_ready,
            circuit_open,
            waiting,
            max_queue_size: self.max_queue_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[allow(
    clippy::struct_excessive_bools,
    reason = "One flag per probed component"
)]
pub struct HealthStatus {
    pub alive: bool,
    pub ready: bool,
    pub worker_running: bool,
    pub backend_ready: bool,
    pub circuit_open: bool,
    pub waiting: u64,
    pub max_queue_size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_checker(max: u64) -> HealthChecker {
        let checker = HealthChecker::new(max);
        checker.set_worker_running(true);
        checker.set_backend_ready(true);
        checker
    }

    #[test]
    fn test_starts_not_ready() {
        let checker = HealthChecker::new(10);
        assert!(checker.is_alive());
        assert!(!checker.is_ready());
    }

    #[test]
    fn test_ready_when_all_components_up() {
        assert!(ready_checker(10).is_ready());
    }

    #[test]
    fn test_open_circuit_fails_readiness() {
        let checker = ready_checker(10);
        checker.set_circuit_open(true);
        assert!(!checker.is_ready());
        checker.set_circuit_open(false);
        assert!(checker.is_ready());
    }

    #[test]
    fn test_backlog_threshold() {
        let checker = ready_checker(10);
        checker.set_waiting(9);
        assert!(checker.is_ready());
        checker.set_waiting(10);
        assert!(!checker.is_ready());
        assert_eq!(checker.status().waiting, 10);
    }
}
