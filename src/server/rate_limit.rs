//! Smoothing of new discovery session attempts.
//!
//! A single token bucket shared by every listener. Callers wait for their
//! token instead of being rejected, so a burst of simultaneous connection
//! attempts is spread over time before it reaches the admission limit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use crate::config::AdmissionConfig;

#[derive(Debug)]
struct TokenBucket {
    /// Available tokens; negative while callers hold reservations
    tokens: f64,
    max_tokens: f64,
    last_refill: Instant,
    refill_rate_per_sec: f64,
}

impl TokenBucket {
    fn new(rate_per_sec: u32, burst: u32) -> Self {
        let max_tokens = burst.max(1) as f64;
        Self {
            tokens: max_tokens,
            max_tokens,
            last_refill: Instant::now(),
            refill_rate_per_sec: rate_per_sec as f64,
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate_per_sec).min(self.max_tokens);
        self.last_refill = now;
    }

    /// Take one token, possibly borrowing against future refills.
    ///
    /// Returns how long the caller must wait before its token exists.
    fn reserve(&mut self) -> Duration {
        self.refill();
        self.tokens -= 1.0;
        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / self.refill_rate_per_sec)
        }
    }
}

/// Rate limiter for session attempts. A rate of 0 disables it.
#[derive(Debug, Clone)]
pub struct ConnectionRateLimiter {
    bucket: Option<Arc<Mutex<TokenBucket>>>,
}

impl ConnectionRateLimiter {
    pub fn new(rate_per_sec: u32, burst: u32) -> Self {
        let bucket = (rate_per_sec > 0)
            .then(|| Arc::new(Mutex::new(TokenBucket::new(rate_per_sec, burst))));
        Self { bucket }
    }

    pub fn from_config(config: &AdmissionConfig) -> Self {
        Self::new(config.max_requests_per_second, config.burst)
    }

    pub fn unlimited() -> Self {
        Self { bucket: None }
    }

    pub fn is_unlimited(&self) -> bool {
        self.bucket.is_none()
    }

    /// Wait until this attempt may proceed.
    pub async fn acquire(&self) {
        let Some(bucket) = &self.bucket else {
            return;
        };

        let wait = bucket.lock().await.reserve();
        if !wait.is_zero() {
            debug!(wait_ms = wait.as_millis() as u64, "Delaying session attempt");
            tokio::time::sleep(wait).await;
        }
    }
}
