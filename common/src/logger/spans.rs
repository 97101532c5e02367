use std::future::Future;
use std::time::Duration;

use tracing::{Span, field};

use super::TraceId;

/// Root span for a monitoring run.
pub fn root_span(name: &'static str, trace_id: &TraceId) -> Span {
    tracing::info_span!(
        "root",
        name = %name,
        trace_id = %trace_id.as_str(),
        symbol = field::Empty
    )
}

pub fn child_span(name: &'static str) -> Span {
    tracing::info_span!("child", name = %name, symbol = field::Empty)
}

/// Span wrapping the whole lifetime of one symbol's poll loop.
pub fn monitor_span(symbol: &str) -> Span {
    tracing::info_span!("monitor_task", symbol = %symbol, tick = field::Empty)
}

/// Awaits `fut` and warns on the `performance` target if it took longer than `max`.
pub async fn warn_if_slow<F, T>(label: &'static str, max: Duration, fut: F) -> T
where
    F: Future<Output = T>,
{
    let start = std::time::Instant::now();
    let out = fut.await;
    let elapsed = start.elapsed();
    if elapsed > max {
        tracing::warn!(
            target: "performance",
            label = label,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow operation detected"
        );
    }
    out
}
