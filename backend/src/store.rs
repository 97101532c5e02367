//! SQL-backed [`KeyValueStore`] for the quote cache and alert history.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{AnyPool, Row};
use tracing::{debug, instrument};

use common::time::now_ms;
use market::{KeyValueStore, StoreError};

#[derive(Clone)]
pub struct SqlxQuoteStore {
    pool: Arc<AnyPool>,
}

impl SqlxQuoteStore {
    pub fn new(pool: Arc<AnyPool>) -> Self {
        Self { pool }
    }

    /// Records appended under `history_key`, oldest first.
    pub async fn history(&self, history_key: &str) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            r#"
SELECT record
FROM history_entries
WHERE history_key = ?
ORDER BY id ASC;
"#,
        )
        .bind(history_key)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(unavailable)?;

        rows.iter()
            .map(|r| r.try_get::<String, _>("record").map_err(codec))
            .collect()
    }

    /// Deletes cache rows whose expiry has passed. Reads already skip them.
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let res = sqlx::query("DELETE FROM kv_entries WHERE expires_at_ms <= ?;")
            .bind(now_i64()?)
            .execute(self.pool.as_ref())
            .await
            .map_err(unavailable)?;

        Ok(res.rows_affected())
    }
}

#[async_trait]
impl KeyValueStore for SqlxQuoteStore {
    #[instrument(skip(self, value), level = "debug")]
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let ttl_ms = i64::try_from(ttl.as_millis())
            .map_err(|_| StoreError::Codec(format!("ttl out of range: {ttl:?}")))?;
        let expires_at_ms = now_i64()?.saturating_add(ttl_ms);

        sqlx::query(
            r#"
INSERT INTO kv_entries (entry_key, value, expires_at_ms)
VALUES (?, ?, ?)
ON CONFLICT(entry_key) DO UPDATE SET
  value = excluded.value,
  expires_at_ms = excluded.expires_at_ms;
"#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at_ms)
        .execute(self.pool.as_ref())
        .await
        .map_err(unavailable)?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query(
            r#"
SELECT value
FROM kv_entries
WHERE entry_key = ? AND expires_at_ms > ?;
"#,
        )
        .bind(key)
        .bind(now_i64()?)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(unavailable)?;

        match row {
            Some(r) => Ok(Some(r.try_get::<String, _>("value").map_err(codec)?)),
            None => Ok(None),
        }
    }

    async fn append(&self, history_key: &str, record: String) -> Result<(), StoreError> {
        sqlx::query(
            r#"
INSERT INTO history_entries (history_key, record, created_ms)
VALUES (?, ?, ?);
"#,
        )
        .bind(history_key)
        .bind(record)
        .bind(now_i64()?)
        .execute(self.pool.as_ref())
        .await
        .map_err(unavailable)?;

        debug!(history_key, "history appended");
        Ok(())
    }
}

fn now_i64() -> Result<i64, StoreError> {
    i64::try_from(now_ms()).map_err(|_| StoreError::Codec("clock out of range".into()))
}

fn unavailable(e: sqlx::Error) -> StoreError {
    StoreError::CacheUnavailable(e.to_string())
}

fn codec(e: sqlx::Error) -> StoreError {
    StoreError::Codec(e.to_string())
}
