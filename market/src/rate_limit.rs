//! Token-bucket request budget.
//!
//! Callers reserve a token up front. When the bucket is empty the reservation
//! goes negative and the caller sleeps until its slot refills, so waiters are
//! served in arrival order. A reservation that would have to wait longer than
//! `max_wait` is refused and the token is handed back. A caller dropped while
//! it waits, or a slot released before use, returns its token as well.

use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Bucket size (burst).
    pub capacity: u32,
    /// Tokens added per second.
    pub refill_per_sec: f64,
    /// Longest a caller may be suspended waiting for a slot.
    pub max_wait: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            refill_per_sec: 5.0,
            max_wait: Duration::from_secs(10),
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("rate limit slot not available within {would_wait:?}")]
pub struct RateLimitExceeded {
    pub would_wait: Duration,
}

/// A granted slot. Returned to the bucket on drop unless committed.
#[must_use = "an uncommitted slot is refunded when dropped"]
#[derive(Debug)]
pub struct Slot<'a> {
    limiter: &'a RateLimiter,
    waited: Duration,
    committed: bool,
}

impl Slot<'_> {
    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// Spends the token.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.limiter.refund();
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    cfg: RateLimitConfig,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, cfg: RateLimitConfig) -> Self {
        let capacity = cfg.capacity.max(1);
        let cfg = RateLimitConfig {
            capacity,
            refill_per_sec: if cfg.refill_per_sec > 0.0 {
                cfg.refill_per_sec
            } else {
                1.0
            },
            ..cfg
        };

        Self {
            name: name.into(),
            bucket: Mutex::new(Bucket {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
            cfg,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits for a slot. Returns how long the caller was suspended.
    pub async fn acquire(&self) -> Result<Duration, RateLimitExceeded> {
        let slot = self.acquire_slot().await?;
        let waited = slot.waited();
        slot.commit();
        Ok(waited)
    }

    /// Waits for a slot and hands it back uncommitted; dropping the returned
    /// [`Slot`] (or this future, mid-wait) refunds the token.
    pub async fn acquire_slot(&self) -> Result<Slot<'_>, RateLimitExceeded> {
        let wait = self.reserve()?;
        let slot = Slot {
            limiter: self,
            waited: wait,
            committed: false,
        };

        if !wait.is_zero() {
            debug!(
                limiter = %self.name,
                wait_ms = wait.as_millis() as u64,
                "rate limit reached; waiting for slot"
            );
            tokio::time::sleep(wait).await;
        }

        Ok(slot)
    }

    /// Tokens currently available (may be negative while callers are queued).
    pub fn available(&self) -> f64 {
        let mut b = self.bucket.lock();
        self.refill(&mut b, Instant::now());
        b.tokens
    }

    fn reserve(&self) -> Result<Duration, RateLimitExceeded> {
        let mut b = self.bucket.lock();
        self.refill(&mut b, Instant::now());

        b.tokens -= 1.0;
        if b.tokens >= 0.0 {
            return Ok(Duration::ZERO);
        }

        let wait = Duration::try_from_secs_f64(-b.tokens / self.cfg.refill_per_sec)
            .unwrap_or(Duration::MAX);
        if wait > self.cfg.max_wait {
            b.tokens += 1.0;
            return Err(RateLimitExceeded { would_wait: wait });
        }

        Ok(wait)
    }

    fn refund(&self) {
        let mut b = self.bucket.lock();
        self.refill(&mut b, Instant::now());
        b.tokens = (b.tokens + 1.0).min(self.cfg.capacity as f64);
        debug!(limiter = %self.name, tokens = b.tokens, "unused slot returned");
    }

    fn refill(&self, b: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(b.last_refill).as_secs_f64();
        b.tokens = (b.tokens + elapsed * self.cfg.refill_per_sec).min(self.cfg.capacity as f64);
        b.last_refill = now;
    }
}
