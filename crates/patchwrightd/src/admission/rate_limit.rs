//! Token buckets keyed by principal and tool.

use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use super::AdmissionError;

const RATE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::rate_limit");

#[derive(Debug)]
struct RateBucket {
    tokens: u32,
    last_refill: Instant,
}

/// Per-(principal, tool) token buckets with integer refill.
///
/// Every bucket starts full. `refill` tokens are restored each `interval`;
/// partial intervals carry over so no time is lost between acquisitions.
/// Buckets are independent: each sits behind its own lock.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<(String, String), Mutex<RateBucket>>,
    capacity: u32,
    refill: u32,
    interval: Duration,
}

impl RateLimiter {
    /// Creates a limiter with `capacity` tokens per bucket and `refill`
    /// tokens restored every `interval`.
    #[must_use]
    pub fn new(capacity: u32, refill: u32, interval: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity,
            refill,
            interval,
        }
    }

    /// Creates a limiter restoring `refill_per_second` tokens each second.
    #[must_use]
    pub fn per_second(capacity: u32, refill_per_second: u32) -> Self {
        Self::new(capacity, refill_per_second, Duration::from_secs(1))
    }

    /// Takes one token from the bucket for `principal` and `tool`.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::RateLimited`] when the bucket is empty.
    pub fn acquire(&self, principal: &str, tool: &str) -> Result<(), AdmissionError> {
        self.acquire_at(principal, tool, Instant::now())
    }

    /// Takes one token, waiting up to `max_wait` for one to become available.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::RateLimited`] when no token arrives in time.
    pub fn acquire_within(
        &self,
        principal: &str,
        tool: &str,
        max_wait: Duration,
    ) -> Result<(), AdmissionError> {
        let started = Instant::now();
        loop {
            match self.acquire(principal, tool) {
                Err(AdmissionError::RateLimited { retry_after, .. })
                    if started.elapsed().saturating_add(retry_after) <= max_wait =>
                {
                    debug!(
                        target: RATE_TARGET,
                        principal,
                        tool,
                        wait_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                        "waiting for rate token"
                    );
                    thread::sleep(retry_after);
                }
                other => return other,
            }
        }
    }

    pub(crate) fn acquire_at(
        &self,
        principal: &str,
        tool: &str,
        now: Instant,
    ) -> Result<(), AdmissionError> {
        let key = (principal.to_owned(), tool.to_owned());
        if let Some(entry) = self.buckets.get(&key) {
            return self.take(&entry, principal, tool, now);
        }
        let entry = self
            .buckets
            .entry(key)
            .or_insert_with(|| {
                Mutex::new(RateBucket {
                    tokens: self.capacity,
                    last_refill: now,
                })
            })
            .downgrade();
        self.take(&entry, principal, tool, now)
    }

    fn take(
        &self,
        bucket: &Mutex<RateBucket>,
        principal: &str,
        tool: &str,
        now: Instant,
    ) -> Result<(), AdmissionError> {
        let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut bucket, now);

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            return Ok(());
        }
        let retry_after = self.retry_after(&bucket, now);
        debug!(target: RATE_TARGET, principal, tool, "rate limit exceeded");
        Err(AdmissionError::RateLimited {
            principal: principal.to_owned(),
            tool: tool.to_owned(),
            retry_after,
        })
    }

    fn refill(&self, bucket: &mut RateBucket, now: Instant) {
        if self.interval.is_zero() {
            if self.refill > 0 {
                bucket.tokens = self.capacity;
            }
            return;
        }
        if self.refill == 0 {
            return;
        }
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let intervals = elapsed.as_nanos() / self.interval.as_nanos();
        if intervals == 0 {
            return;
        }
        let restored = intervals.saturating_mul(u128::from(self.refill));
        let tokens = u128::from(bucket.tokens).saturating_add(restored);
        bucket.tokens = u32::try_from(tokens.min(u128::from(self.capacity))).unwrap_or(self.capacity);
        let whole = u32::try_from(intervals).map_or(elapsed, |count| self.interval.saturating_mul(count));
        bucket.last_refill += whole;
    }

    fn retry_after(&self, bucket: &RateBucket, now: Instant) -> Duration {
        if self.refill == 0 {
            return Duration::MAX;
        }
        let since = now.saturating_duration_since(bucket.last_refill);
        self.interval.saturating_sub(since)
    }

    /// Tokens currently available to `principal` for `tool`.
    #[must_use]
    pub fn available(&self, principal: &str, tool: &str) -> u32 {
        let now = Instant::now();
        self.buckets
            .get(&(principal.to_owned(), tool.to_owned()))
            .map_or(self.capacity, |entry| {
                let mut bucket = entry.lock().unwrap_or_else(PoisonError::into_inner);
                self.refill(&mut bucket, now);
                bucket.tokens
            })
    }

    /// Drops every bucket, returning all callers to full capacity.
    pub fn reset(&self) {
        self.buckets.clear();
    }
}
