use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::StoreError;

/// Durability layer shared by the quote cache and the alert-history log.
///
/// Implementations must honour `ttl` on `put` (an expired key reads as absent)
/// and give at-least-once semantics for `append`.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn append(&self, history_key: &str, record: String) -> Result<(), StoreError>;
}

/// Process-local store. Expiry runs on tokio's clock; a TTL past the end of
/// the clock's range never expires.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, (String, Option<Instant>)>>,
    history: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records appended under `history_key`, oldest first.
    pub fn history(&self, history_key: &str) -> Vec<String> {
        self.history
            .lock()
            .get(history_key)
            .cloned()
            .unwrap_or_default()
    }

    /// Drops entries whose expiry has passed. Reads already ignore them.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut values = self.values.lock();
        let before = values.len();
        values.retain(|_, (_, expires_at)| live_at(*expires_at, now));
        before - values.len()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        self.values
            .lock()
            .insert(key.to_string(), (value, Instant::now().checked_add(ttl)));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let values = self.values.lock();
        Ok(values
            .get(key)
            .filter(|(_, expires_at)| live_at(*expires_at, now))
            .map(|(v, _)| v.clone()))
    }

    async fn append(&self, history_key: &str, record: String) -> Result<(), StoreError> {
        self.history
            .lock()
            .entry(history_key.to_string())
            .or_default()
            .push(record);
        Ok(())
    }
}

fn live_at(expires_at: Option<Instant>, now: Instant) -> bool {
    expires_at.map_or(true, |t| t > now)
}
