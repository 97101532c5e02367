//! Cache-aside quote reads with single-flight fetch deduplication.
//!
//! Read path: store hit (not expired) → return. Otherwise the first caller for
//! a symbol becomes the *leader* of an in-flight group and performs the fetch;
//! everyone else arriving for the same symbol subscribes to the group and gets
//! the leader's outcome. Failures are handed to all waiters and never cached.
//!
//! If a leader is dropped mid-fetch (task cancelled) its guard tears the group
//! down and waiters observe [`CacheError::FlightAbandoned`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, instrument, warn};

use common::logger::warn_if_slow;
use common::time::now_ms;

use crate::error::{CacheError, FetchError};
use crate::fetcher::RateLimitedFetcher;
use crate::store::KeyValueStore;
use crate::types::Quote;

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

type FlightResult = Result<Quote, CacheError>;
type InFlight = Arc<Mutex<HashMap<String, broadcast::Sender<FlightResult>>>>;

/// What the store holds for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub quote: Quote,
    pub cached_at_ms: u64,
    pub expires_at_ms: u64,
}

impl CacheEntry {
    pub fn new(quote: Quote, ttl: Duration) -> Self {
        let cached_at_ms = now_ms();
        Self {
            quote,
            cached_at_ms,
            expires_at_ms: cached_at_ms
                .saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)),
        }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

pub fn cache_key(symbol: &str) -> String {
    format!("quote:{symbol}")
}

enum Role {
    Leader(FlightGuard),
    Follower(broadcast::Receiver<FlightResult>),
}

/// Owned by the leader of an in-flight group.
struct FlightGuard {
    inflight: InFlight,
    symbol: String,
    completed: bool,
}

impl FlightGuard {
    /// Closes the group and hands `result` to every follower.
    fn complete(mut self, result: &FlightResult) {
        self.completed = true;
        let tx = self.inflight.lock().remove(&self.symbol);
        if let Some(tx) = tx {
            // No receivers is fine: nobody else asked.
            let _ = tx.send(result.clone());
        }
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if !self.completed {
            self.inflight.lock().remove(&self.symbol);
            debug!(symbol = %self.symbol, "in-flight fetch abandoned");
        }
    }
}

pub struct QuoteCache {
    fetcher: Arc<RateLimitedFetcher>,
    store: Arc<dyn KeyValueStore>,
    default_ttl: Duration,
    inflight: InFlight,
}

impl QuoteCache {
    pub fn new(fetcher: Arc<RateLimitedFetcher>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            fetcher,
            store,
            default_ttl: DEFAULT_TTL,
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Number of symbols with a fetch currently in progress.
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }

    pub async fn get(&self, symbol: &str) -> Result<Quote, CacheError> {
        self.get_or_fetch(symbol, self.default_ttl).await
    }

    #[instrument(skip(self), fields(ttl_ms = ttl.as_millis() as u64), level = "debug")]
    pub async fn get_or_fetch(&self, symbol: &str, ttl: Duration) -> Result<Quote, CacheError> {
        if let Some(q) = self.lookup(symbol).await {
            debug!("cache hit");
            return Ok(q);
        }

        match self.join_flight(symbol) {
            Role::Follower(rx) => await_leader(symbol, rx).await,
            Role::Leader(guard) => {
                // A previous leader may have populated the store between our
                // lookup and joining.
                if let Some(q) = self.lookup(symbol).await {
                    let result = Ok(q);
                    guard.complete(&result);
                    return result;
                }

                debug!("cache miss; fetching upstream");
                let result = self.fetcher.fetch(symbol).await.map_err(CacheError::from);
                if let Ok(q) = &result {
                    self.write_back(q, ttl).await;
                }
                guard.complete(&result);
                result
            }
        }
    }

    /// Batch read. Misses that this call leads are fetched with a single
    /// `fetch_batch`; misses already in flight elsewhere are awaited.
    #[instrument(skip(self, symbols), fields(count = symbols.len()), level = "debug")]
    pub async fn get_or_fetch_batch(
        &self,
        symbols: &[String],
        ttl: Duration,
    ) -> HashMap<String, Result<Quote, CacheError>> {
        let mut out = HashMap::with_capacity(symbols.len());
        let mut leaders: Vec<(String, FlightGuard)> = Vec::new();
        let mut followers: Vec<(String, broadcast::Receiver<FlightResult>)> = Vec::new();

        for symbol in symbols {
            if out.contains_key(symbol)
                || leaders.iter().any(|(s, _)| s == symbol)
                || followers.iter().any(|(s, _)| s == symbol)
            {
                continue;
            }

            if let Some(q) = self.lookup(symbol).await {
                out.insert(symbol.clone(), Ok(q));
                continue;
            }

            match self.join_flight(symbol) {
                Role::Leader(guard) => leaders.push((symbol.clone(), guard)),
                Role::Follower(rx) => followers.push((symbol.clone(), rx)),
            }
        }

        if !leaders.is_empty() {
            let to_fetch: Vec<String> = leaders.iter().map(|(s, _)| s.clone()).collect();
            let mut fetched = self.fetcher.fetch_batch(&to_fetch).await;

            for (symbol, guard) in leaders {
                let result = fetched
                    .remove(&symbol)
                    .unwrap_or_else(|| {
                        Err(FetchError::Permanent {
                            symbol: symbol.clone(),
                            cause: "missing from batch result".into(),
                        })
                    })
                    .map_err(CacheError::from);

                if let Ok(q) = &result {
                    self.write_back(q, ttl).await;
                }
                guard.complete(&result);
                out.insert(symbol, result);
            }
        }

        let waited = join_all(followers.into_iter().map(|(symbol, rx)| async move {
            let r = await_leader(&symbol, rx).await;
            (symbol, r)
        }))
        .await;
        out.extend(waited);

        out
    }

    fn join_flight(&self, symbol: &str) -> Role {
        let mut inflight = self.inflight.lock();
        if let Some(tx) = inflight.get(symbol) {
            return Role::Follower(tx.subscribe());
        }

        let (tx, _) = broadcast::channel(1);
        inflight.insert(symbol.to_string(), tx);

        Role::Leader(FlightGuard {
            inflight: Arc::clone(&self.inflight),
            symbol: symbol.to_string(),
            completed: false,
        })
    }

    /// Store read. An unreachable store or an undecodable entry is a miss.
    async fn lookup(&self, symbol: &str) -> Option<Quote> {
        let raw = warn_if_slow("cache_store_get", Duration::from_millis(100), async {
            self.store.get(&cache_key(symbol)).await
        })
        .await;

        let raw = match raw {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(%symbol, error = %e, "cache store read failed; treating as miss");
                return None;
            }
        };

        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) if !entry.is_expired(now_ms()) => Some(entry.quote),
            Ok(_) => None,
            Err(e) => {
                warn!(%symbol, error = %e, "undecodable cache entry; treating as miss");
                None
            }
        }
    }

    async fn write_back(&self, quote: &Quote, ttl: Duration) {
        let entry = CacheEntry::new(quote.clone(), ttl);
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(symbol = %quote.symbol, error = %e, "failed to encode cache entry");
                return;
            }
        };

        if let Err(e) = self.store.put(&cache_key(&quote.symbol), raw, ttl).await {
            warn!(symbol = %quote.symbol, error = %e, "cache write-back failed");
        }
    }
}

async fn await_leader(symbol: &str, mut rx: broadcast::Receiver<FlightResult>) -> FlightResult {
    debug!(%symbol, "joining in-flight fetch");
    match rx.recv().await {
        Ok(result) => result,
        Err(_) => Err(CacheError::FlightAbandoned {
            symbol: symbol.to_string(),
        }),
    }
}
