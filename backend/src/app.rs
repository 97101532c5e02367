//! Process wiring: store → fetcher → cache → alert engine → scheduler.

use std::sync::Arc;

use anyhow::Context;
use tracing::{Instrument, info, warn};

use alert::{AlertEngine, LogSink, MultiSink, NotificationSink, StoreAlertHistory};
use market::{QuoteCache, QuoteProvider, RateLimitedFetcher};
use scheduler::{StopReport, SymbolScheduler};

use common::logger::child_span;

use crate::config::AppConfig;
use crate::db::Db;
use crate::sink::WebhookSink;
use crate::store::SqlxQuoteStore;

pub struct Monitor {
    pub cache: Arc<QuoteCache>,
    pub alerts: Arc<AlertEngine>,
    pub scheduler: SymbolScheduler,
}

/// Connects to the database and creates the tables.
pub async fn init_store(cfg: &AppConfig) -> anyhow::Result<Arc<SqlxQuoteStore>> {
    let db = Db::connect(&cfg.database_url)
        .await
        .with_context(|| format!("connecting to {}", cfg.database_url))?;
    db.migrate().await.context("running migrations")?;

    Ok(Arc::new(SqlxQuoteStore::new(db.pool.clone())))
}

/// Log sink always; webhook too when `WEBHOOK_URL` is set.
pub fn build_sink(cfg: &AppConfig) -> anyhow::Result<Arc<dyn NotificationSink>> {
    let mut sink = MultiSink::default();
    sink.push(Arc::new(LogSink));

    if let Some(url) = &cfg.webhook_url {
        let webhook = WebhookSink::new(url.clone()).context("building webhook client")?;
        sink.push(Arc::new(webhook));
    }

    Ok(Arc::new(sink))
}

pub fn build_monitor(
    cfg: &AppConfig,
    store: Arc<SqlxQuoteStore>,
    provider: Arc<dyn QuoteProvider>,
    sink: Arc<dyn NotificationSink>,
) -> anyhow::Result<Monitor> {
    let fetcher = Arc::new(
        RateLimitedFetcher::new(provider, cfg.rate_limit.clone(), cfg.retry.clone())
            .with_batch_concurrency(cfg.fetch_concurrency),
    );

    let cache = Arc::new(
        QuoteCache::new(fetcher, store.clone()).with_default_ttl(cfg.scheduler.ttl),
    );

    let alerts = Arc::new(AlertEngine::new(Arc::new(StoreAlertHistory::new(store))));
    for cond in &cfg.alert_conditions {
        alerts
            .add_condition(cond.clone())
            .with_context(|| format!("registering alert {}", cond.key()))?;
    }

    let scheduler = SymbolScheduler::new(
        cache.clone(),
        alerts.clone(),
        sink,
        cfg.scheduler.clone(),
    );

    Ok(Monitor {
        cache,
        alerts,
        scheduler,
    })
}

impl Monitor {
    /// Fills the cache for `symbols` in one batch so the first ticks hit.
    pub async fn warm_up(&self, symbols: &[String]) {
        let results = self
            .cache
            .get_or_fetch_batch(symbols, self.cache.default_ttl())
            .instrument(child_span("warm_up"))
            .await;

        let failed = results.values().filter(|r| r.is_err()).count();
        for (symbol, res) in &results {
            if let Err(e) = res {
                warn!(%symbol, error = %e, "warm-up fetch failed");
            }
        }
        info!(total = results.len(), failed, "cache warm-up finished");
    }

    pub fn start(&self, cfg: &AppConfig) -> anyhow::Result<()> {
        self.scheduler
            .start_monitoring(&cfg.watch_symbols, cfg.scheduler.poll_interval)
            .context("starting monitors")?;
        Ok(())
    }

    pub async fn shutdown(&self) -> StopReport {
        self.scheduler.stop_monitoring().await
    }
}
