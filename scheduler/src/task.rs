//! One polling loop per symbol.
//!
//! Each tick: sleep (interval + jitter) → cached quote → alert check →
//! deliver notifications. Cancellation is observed while sleeping and while
//! waiting on the cache; alert evaluation and delivery run to completion
//! unless the task is aborted after the grace timeout.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, warn};

use alert::{AlertEngine, NotificationSink};
use common::logger::{monitor_span, warn_if_slow};
use market::QuoteCache;

use crate::error::SchedulerError;
use crate::state::TaskState;

/// Collaborators every monitor task drives.
pub(crate) struct Pipeline {
    pub cache: Arc<QuoteCache>,
    pub alerts: Arc<AlertEngine>,
    pub sink: Arc<dyn NotificationSink>,
    pub ttl: Duration,
    pub jitter: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopOutcome {
    Graceful,
    Forced,
    Panicked,
}

/// Runtime handle for one monitored symbol.
pub struct MonitorTask {
    symbol: String,
    token: CancellationToken,
    poll_interval: Duration,
    state: Arc<Mutex<TaskState>>,
    handle: JoinHandle<()>,
}

impl MonitorTask {
    pub(crate) fn spawn(
        symbol: String,
        poll_interval: Duration,
        token: CancellationToken,
        pipeline: Arc<Pipeline>,
    ) -> Result<Self, SchedulerError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|e| SchedulerError::SpawnFailed {
                symbol: symbol.clone(),
                cause: e.to_string(),
            })?;

        let state = Arc::new(Mutex::new(TaskState::Created));
        let span = monitor_span(&symbol);
        let handle = runtime.spawn(
            poll_loop(
                symbol.clone(),
                poll_interval,
                token.clone(),
                state.clone(),
                pipeline,
            )
            .instrument(span),
        );

        Ok(Self {
            symbol,
            token,
            poll_interval,
            state,
            handle,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// A loop that exited without recording it (it panicked) reads as STOPPED.
    pub fn state(&self) -> TaskState {
        let state = *self.state.lock();
        if state.is_live() && self.handle.is_finished() {
            return TaskState::Stopped;
        }
        state
    }

    pub fn is_running(&self) -> bool {
        self.state().is_live()
    }

    /// Cancels and aborts without waiting.
    pub(crate) fn abort(self) {
        self.token.cancel();
        self.handle.abort();
        self.state.lock().advance(TaskState::Stopped);
    }

    /// Cancels the loop and waits up to `grace` for it to exit, aborting it
    /// otherwise. The task is STOPPED when this returns.
    pub(crate) async fn stop(self, grace: Duration) -> StopOutcome {
        self.state.lock().advance(TaskState::Cancelling);
        self.token.cancel();

        let mut handle = self.handle;
        let outcome = match timeout(grace, &mut handle).await {
            Ok(Ok(())) => StopOutcome::Graceful,
            Ok(Err(e)) if e.is_panic() => {
                error!(symbol = %self.symbol, error = %e, "monitor task panicked");
                StopOutcome::Panicked
            }
            Ok(Err(e)) => {
                warn!(symbol = %self.symbol, error = %e, "monitor task was already aborted");
                StopOutcome::Forced
            }
            Err(_) => {
                handle.abort();
                // Wait for the abort to land so nothing stays scheduled.
                let _ = handle.await;
                warn!(
                    symbol = %self.symbol,
                    grace_ms = grace.as_millis() as u64,
                    "monitor task forced-stop after grace timeout"
                );
                StopOutcome::Forced
            }
        };

        self.state.lock().advance(TaskState::Stopped);
        outcome
    }
}

fn jittered(interval: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return interval;
    }
    let extra = rand::rng().random_range(0..=jitter.as_millis() as u64);
    interval + Duration::from_millis(extra)
}

async fn poll_loop(
    symbol: String,
    poll_interval: Duration,
    token: CancellationToken,
    state: Arc<Mutex<TaskState>>,
    pipeline: Arc<Pipeline>,
) {
    state.lock().advance(TaskState::Running);
    info!(interval_ms = poll_interval.as_millis() as u64, "monitor task started");

    let mut tick: u64 = 0;
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = sleep(jittered(poll_interval, pipeline.jitter)) => {}
        }

        tick += 1;
        Span::current().record("tick", tick);

        let fetched = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            res = warn_if_slow(
                "quote_fetch",
                poll_interval,
                pipeline.cache.get_or_fetch(&symbol, pipeline.ttl),
            ) => res,
        };

        let quote = match fetched {
            Ok(q) => q,
            Err(e) => {
                warn!(error = %e, "poll failed, retrying next tick");
                continue;
            }
        };

        let events = pipeline.alerts.check(&quote).await;
        for event in &events {
            if let Err(e) = pipeline.sink.deliver(event).await {
                warn!(error = %e, kind = %event.alert_kind, "notification delivery failed");
            }
        }
        debug!(price = quote.price, notified = events.len(), "tick complete");
    }

    state.lock().advance(TaskState::Stopped);
    info!(ticks = tick, "monitor task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_is_additive_and_bounded() {
        let base = Duration::from_millis(1_000);
        let jitter = Duration::from_millis(200);
        for _ in 0..200 {
            let d = jittered(base, jitter);
            assert!(d >= base && d <= base + jitter);
        }
        assert_eq!(jittered(base, Duration::ZERO), base);
    }
}
