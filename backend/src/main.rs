use std::sync::Arc;

use anyhow::Context;
use tracing::Instrument;

use backend::{
    app::{build_monitor, build_sink, init_store},
    config::AppConfig,
    provider::HttpQuoteProvider,
};
use common::logger::{TraceId, init_tracing, root_span};

async fn run(cfg: AppConfig) -> anyhow::Result<()> {
    let store = init_store(&cfg).await?;

    let provider = Arc::new(
        HttpQuoteProvider::new(cfg.provider_url.clone()).context("building provider client")?,
    );
    let sink = build_sink(&cfg)?;

    let monitor = build_monitor(&cfg, store, provider, sink)?;

    monitor.warm_up(&cfg.watch_symbols).await;
    monitor.start(&cfg)?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    let report = monitor.shutdown().await;
    if report.forced > 0 {
        tracing::warn!(forced = report.forced, "some monitors had to be aborted");
    }
    if report.panicked > 0 {
        tracing::error!(panicked = report.panicked, "some monitors had panicked");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = AppConfig::from_env().context("loading configuration")?;

    init_tracing("quote-monitor", cfg.is_production());

    tracing::info!(
        symbols = cfg.watch_symbols.len(),
        alerts = cfg.alert_conditions.len(),
        "Starting quote monitor..."
    );

    let trace_id = TraceId::default();
    run(cfg).instrument(root_span("quote-monitor", &trace_id)).await
}
