use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Cache entries; expiry is wall-clock milliseconds
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS kv_entries (
  entry_key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  expires_at_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Append-only audit log
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS history_entries (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  history_key TEXT NOT NULL,
  record TEXT NOT NULL,
  created_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_history_entries_key ON history_entries(history_key);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_kv_entries_expiry ON kv_entries(expires_at_ms);"#)
        .execute(pool)
        .await?;

    Ok(())
}
