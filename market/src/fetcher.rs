//! Upstream quote retrieval with request budgeting and retry/backoff.
//!
//! Every upstream call (including each retry) spends one token from the
//! provider's bucket and, if attached, from the shared global bucket.
//! Transient failures are retried with exponential backoff plus jitter;
//! permanent failures return immediately.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rand::Rng;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use common::logger::warn_if_slow;

use crate::error::{FetchError, ProviderError};
use crate::provider::QuoteProvider;
use crate::rate_limit::{RateLimitConfig, RateLimitExceeded, RateLimiter};
use crate::types::Quote;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total upstream attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Cap applied to the exponential part of the delay.
    pub max_delay: Duration,
    /// Upper bound of the uniform random delay added on top.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            jitter: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Deterministic part of the delay after failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_ms)
        };
        self.backoff(attempt) + Duration::from_millis(extra)
    }
}

pub struct RateLimitedFetcher {
    provider: Arc<dyn QuoteProvider>,
    limiter: RateLimiter,
    global: Option<Arc<RateLimiter>>,
    retry: RetryPolicy,
    /// Bounds concurrent upstream calls issued by `fetch_batch`.
    batch_permits: Arc<Semaphore>,
}

impl RateLimitedFetcher {
    pub fn new(
        provider: Arc<dyn QuoteProvider>,
        rate: RateLimitConfig,
        retry: RetryPolicy,
    ) -> Self {
        let limiter = RateLimiter::new(provider.name().to_string(), rate);
        Self {
            provider,
            limiter,
            global: None,
            retry,
            batch_permits: Arc::new(Semaphore::new(8)),
        }
    }

    /// Additionally charge every request against a limiter shared across providers.
    pub fn with_global_limiter(mut self, global: Arc<RateLimiter>) -> Self {
        self.global = Some(global);
        self
    }

    pub fn with_batch_concurrency(mut self, n: usize) -> Self {
        self.batch_permits = Arc::new(Semaphore::new(n.max(1)));
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    #[instrument(skip(self), fields(provider = %self.provider.name()), level = "debug")]
    pub async fn fetch(&self, symbol: &str) -> Result<Quote, FetchError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_cause = String::new();

        for attempt in 1..=max_attempts {
            self.acquire_slot(symbol).await?;

            let outcome = warn_if_slow("provider_raw_fetch", Duration::from_secs(2), async {
                self.provider.raw_fetch(symbol).await
            })
            .await
            .and_then(|payload| self.provider.normalize(symbol, payload));

            match outcome {
                Ok(quote) => {
                    debug!(attempt, price = quote.price, "quote fetched");
                    return Ok(quote);
                }
                Err(ProviderError::Permanent(cause)) => {
                    warn!(attempt, %cause, "permanent provider failure; not retrying");
                    return Err(FetchError::Permanent {
                        symbol: symbol.to_string(),
                        cause,
                    });
                }
                Err(ProviderError::Transient(cause)) => {
                    last_cause = cause;
                    if attempt < max_attempts {
                        let delay = self.retry.delay_with_jitter(attempt);
                        warn!(
                            attempt,
                            max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            cause = %last_cause,
                            "transient provider failure; backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        warn!(attempts = max_attempts, cause = %last_cause, "retries exhausted");
        Err(FetchError::Transient {
            symbol: symbol.to_string(),
            attempts: max_attempts,
            cause: last_cause,
        })
    }

    /// Fetches every symbol concurrently. One symbol failing never affects
    /// another; duplicates in `symbols` are fetched once.
    #[instrument(skip(self, symbols), fields(count = symbols.len()), level = "debug")]
    pub async fn fetch_batch(
        &self,
        symbols: &[String],
    ) -> HashMap<String, Result<Quote, FetchError>> {
        let mut unique: Vec<&String> = Vec::with_capacity(symbols.len());
        for s in symbols {
            if !unique.contains(&s) {
                unique.push(s);
            }
        }

        let futs = unique.into_iter().map(|symbol| async move {
            let result = match Arc::clone(&self.batch_permits).acquire_owned().await {
                Ok(_permit) => self.fetch(symbol).await,
                Err(_) => Err(FetchError::Transient {
                    symbol: symbol.clone(),
                    attempts: 0,
                    cause: "batch semaphore closed".into(),
                }),
            };
            (symbol.clone(), result)
        });

        join_all(futs).await.into_iter().collect()
    }

    /// Takes the shared slot first, then the provider slot. The shared slot
    /// goes back to its bucket if the provider slot is refused or this future
    /// is dropped while waiting.
    async fn acquire_slot(&self, symbol: &str) -> Result<(), FetchError> {
        let refused = |e: RateLimitExceeded| FetchError::RateLimited {
            symbol: symbol.to_string(),
            waited_ms: e.would_wait.as_millis() as u64,
        };

        let global = match &self.global {
            Some(global) => Some(global.acquire_slot().await.map_err(refused)?),
            None => None,
        };
        let local = self.limiter.acquire_slot().await.map_err(refused)?;

        local.commit();
        if let Some(global) = global {
            global.commit();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            jitter: Duration::ZERO,
        };

        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(400));
        assert_eq!(p.backoff(4), Duration::from_millis(800));
        assert_eq!(p.backoff(5), Duration::from_millis(1_000));
        assert_eq!(p.backoff(40), Duration::from_millis(1_000));
    }

    #[test]
    fn jitter_only_adds_delay() {
        let p = RetryPolicy {
            jitter: Duration::from_millis(50),
            ..RetryPolicy::default()
        };

        for _ in 0..100 {
            let d = p.delay_with_jitter(2);
            assert!(d >= p.backoff(2));
            assert!(d <= p.backoff(2) + Duration::from_millis(50));
        }
    }
}
