//! Job start rate limiting using the token bucket algorithm
//!
//! - Tokens are added at a constant rate (`jobs_per_second`)
//! - Each job start consumes one token
//! - The bucket holds at most `burst` tokens and starts full
//!
//! ```text
//! Rate limit: 100 jobs/sec, burst: 100
//! - 100 jobs may start immediately
//! - then at most 100 per second sustained
//! ```

use std::time::{Duration, Instant};

use tracing::debug;

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(jobs_per_second: f64, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            tokens: capacity,
            capacity,
            refill_rate: jobs_per_second,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();

        self.tokens = elapsed.mul_add(self.refill_rate, self.tokens).min(self.capacity);
        self.last_refill = now;
    }

    fn try_consume(&mut self) -> bool {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn time_until_available(&mut self) -> Duration {
        self.refill();

        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }

        let tokens_needed = 1.0 - self.tokens;
        Duration::from_secs_f64(tokens_needed / self.refill_rate)
    }
}

/// Global limiter shared by every worker task of one queue
///
/// A rate of zero disables limiting.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Option<parking_lot::Mutex<TokenBucket>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(jobs_per_second: u32, burst: u32) -> Self {
        let bucket = (jobs_per_second > 0).then(|| {
            parking_lot::Mutex::new(TokenBucket::new(f64::from(jobs_per_second), burst))
        });

        Self { bucket }
    }

    /// Take a token, or report how long until one is available
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let Some(bucket) = &self.bucket else {
            return Ok(());
        };

        let mut bucket = bucket.lock();
        if bucket.try_consume() {
            Ok(())
        } else {
            let wait_time = bucket.time_until_available();
            drop(bucket);
            debug!(
                wait_ms = wait_time.as_millis(),
                "Rate limit reached, delaying next job start"
            );
            Err(wait_time)
        }
    }

    /// Wait until a token is available and take it
    pub async fn acquire(&self) {
        while let Err(wait) = self.try_acquire() {
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    /// Tokens currently in the bucket, if limiting is enabled
    pub fn available(&self) -> Option<f64> {
        self.bucket.as_ref().map(|bucket| {
            let mut bucket = bucket.lock();
            bucket.refill();
            bucket.tokens
        })
    }
}
