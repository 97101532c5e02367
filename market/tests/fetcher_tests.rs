
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use market::{
    FetchError, ProviderError, RateLimitConfig, RateLimitedFetcher, RateLimiter, RetryPolicy,
};
use mock_provider::MockProvider;

fn no_jitter_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(2),
        jitter: Duration::ZERO,
    }
}

fn generous_rate() -> RateLimitConfig {
    RateLimitConfig {
        capacity: 100,
        refill_per_sec: 100.0,
        max_wait: Duration::from_secs(30),
    }
}

fn transient(msg: &str) -> Result<f64, ProviderError> {
    Err(ProviderError::Transient(msg.into()))
}

#[tokio::test(start_paused = true)]
async fn recovers_after_transient_failures_within_attempt_cap() {
    let provider = Arc::new(
        MockProvider::with_price(42.0)
            .then(transient("timeout"))
            .then(transient("503"))
            .then(transient("429")),
    );
    let retry = RetryPolicy {
        jitter: Duration::from_millis(25),
        ..no_jitter_retry(4)
    };
    let fetcher = RateLimitedFetcher::new(provider.clone(), generous_rate(), retry.clone());

    let start = Instant::now();
    let quote = fetcher.fetch("X").await.unwrap();

    assert_eq!(quote.price, 42.0);
    assert_eq!(provider.calls_for("X"), 4);

    let backoff_sum = retry.backoff(1) + retry.backoff(2) + retry.backoff(3);
    assert_eq!(backoff_sum, Duration::from_millis(700));
    assert!(start.elapsed() >= backoff_sum);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_carry_last_cause() {
    let provider = Arc::new(
        MockProvider::with_price(1.0)
            .then(transient("first"))
            .then(transient("second"))
            .then(transient("last")),
    );
    let fetcher = RateLimitedFetcher::new(provider.clone(), generous_rate(), no_jitter_retry(3));

    let err = fetcher.fetch("X").await.unwrap_err();

    assert_eq!(
        err,
        FetchError::Transient {
            symbol: "X".into(),
            attempts: 3,
            cause: "last".into(),
        }
    );
    assert_eq!(provider.calls_for("X"), 3);
}

#[tokio::test(start_paused = true)]
async fn permanent_failure_is_not_retried() {
    let provider = Arc::new(MockProvider::with_price(1.0).failing_for("BAD"));
    let fetcher = RateLimitedFetcher::new(provider.clone(), generous_rate(), no_jitter_retry(5));

    let start = Instant::now();
    let err = fetcher.fetch("BAD").await.unwrap_err();

    assert!(matches!(err, FetchError::Permanent { ref symbol, .. } if symbol == "BAD"));
    assert_eq!(provider.calls_for("BAD"), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn batch_returns_per_symbol_outcomes() {
    let provider = Arc::new(MockProvider::with_price(10.0).failing_for("BAD"));
    let fetcher = RateLimitedFetcher::new(provider.clone(), generous_rate(), no_jitter_retry(2))
        .with_batch_concurrency(2);

    let symbols: Vec<String> = ["A", "BAD", "B", "A"].iter().map(|s| s.to_string()).collect();
    let out = fetcher.fetch_batch(&symbols).await;

    assert_eq!(out.len(), 3);
    assert_eq!(out["A"].as_ref().unwrap().price, 10.0);
    assert_eq!(out["B"].as_ref().unwrap().price, 10.0);
    assert!(matches!(out["BAD"], Err(FetchError::Permanent { .. })));
    assert_eq!(provider.calls_for("A"), 1);
}

#[tokio::test(start_paused = true)]
async fn callers_over_budget_are_suspended_not_failed() {
    let provider = Arc::new(MockProvider::with_price(5.0));
    let rate = RateLimitConfig {
        capacity: 1,
        refill_per_sec: 1.0,
        max_wait: Duration::from_secs(10),
    };
    let fetcher = RateLimitedFetcher::new(provider.clone(), rate, no_jitter_retry(1));

    let start = Instant::now();
    for _ in 0..3 {
        fetcher.fetch("X").await.unwrap();
    }

    assert_eq!(provider.calls_for("X"), 3);
    assert!(start.elapsed() >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn wait_beyond_max_fails_with_rate_limited() {
    let provider = Arc::new(MockProvider::with_price(5.0));
    let rate = RateLimitConfig {
        capacity: 1,
        refill_per_sec: 0.1,
        max_wait: Duration::from_secs(1),
    };
    let fetcher = RateLimitedFetcher::new(provider.clone(), rate, no_jitter_retry(1));

    fetcher.fetch("X").await.unwrap();
    let err = fetcher.fetch("X").await.unwrap_err();

    assert!(matches!(err, FetchError::RateLimited { .. }));
    assert_eq!(provider.calls_for("X"), 1);
}

#[tokio::test(start_paused = true)]
async fn global_limiter_is_shared_across_fetchers() {
    let global = Arc::new(RateLimiter::new(
        "global",
        RateLimitConfig {
            capacity: 1,
            refill_per_sec: 1.0,
            max_wait: Duration::from_secs(10),
        },
    ));

    let a = RateLimitedFetcher::new(
        Arc::new(MockProvider::with_price(1.0)),
        generous_rate(),
        no_jitter_retry(1),
    )
    .with_global_limiter(global.clone());
    let b = RateLimitedFetcher::new(
        Arc::new(MockProvider::with_price(2.0)),
        generous_rate(),
        no_jitter_retry(1),
    )
    .with_global_limiter(global);

    let start = Instant::now();
    a.fetch("X").await.unwrap();
    b.fetch("Y").await.unwrap();

    assert!(start.elapsed() >= Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn global_slot_is_returned_when_provider_budget_refuses() {
    let global = Arc::new(RateLimiter::new(
        "global",
        RateLimitConfig {
            capacity: 2,
            refill_per_sec: 0.01,
            max_wait: Duration::from_secs(1),
        },
    ));
    let provider = Arc::new(MockProvider::with_price(3.0));
    let tight = RateLimitConfig {
        capacity: 1,
        refill_per_sec: 0.01,
        max_wait: Duration::from_secs(1),
    };
    let fetcher = RateLimitedFetcher::new(provider.clone(), tight, no_jitter_retry(1))
        .with_global_limiter(global.clone());

    fetcher.fetch("X").await.unwrap();
    let err = fetcher.fetch("Y").await.unwrap_err();

    assert!(matches!(err, FetchError::RateLimited { .. }));
    assert_eq!(provider.total_calls(), 1);
    assert!((global.available() - 1.0).abs() < 1e-3);
}

#[tokio::test(start_paused = true)]
async fn aborted_fetches_give_back_queued_slots() {
    let global = Arc::new(RateLimiter::new(
        "global",
        RateLimitConfig {
            capacity: 1,
            refill_per_sec: 1.0,
            max_wait: Duration::from_secs(30),
        },
    ));
    let provider = Arc::new(MockProvider::with_price(4.0));
    let fetcher = Arc::new(
        RateLimitedFetcher::new(provider.clone(), generous_rate(), no_jitter_retry(1))
            .with_global_limiter(global.clone()),
    );

    fetcher.fetch("X").await.unwrap();

    let queued: Vec<_> = (0..3)
        .map(|_| {
            let fetcher = fetcher.clone();
            tokio::spawn(async move { fetcher.fetch("X").await })
        })
        .collect();
    tokio::task::yield_now().await;
    for task in &queued {
        task.abort();
    }
    for task in queued {
        assert!(task.await.unwrap_err().is_cancelled());
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    let start = Instant::now();
    fetcher.fetch("X").await.unwrap();

    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(provider.total_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn batch_concurrency_bounds_upstream_calls() {
    let provider = Arc::new(MockProvider::with_price(7.0).delayed(Duration::from_millis(100)));
    let fetcher = RateLimitedFetcher::new(provider.clone(), generous_rate(), no_jitter_retry(1))
        .with_batch_concurrency(2);

    let symbols: Vec<String> = ["A", "B", "C", "D"].iter().map(|s| s.to_string()).collect();
    let start = Instant::now();
    let out = fetcher.fetch_batch(&symbols).await;

    assert!(out.values().all(|r| r.is_ok()));
    assert_eq!(provider.total_calls(), 4);
    assert!(start.elapsed() >= Duration::from_millis(200));
}
