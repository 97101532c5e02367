//! SymbolScheduler
//!
//! Owns the dynamic set of monitored symbols and one [`MonitorTask`] per
//! symbol. Every task token is a child of the scheduler's root token, so
//! dropping the scheduler cancels whatever is still running.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use alert::{AlertEngine, NotificationSink};
use market::QuoteCache;

use crate::error::SchedulerError;
use crate::state::TaskState;
use crate::task::{MonitorTask, Pipeline, StopOutcome};
use crate::types::{SchedulerConfig, StopReport};

pub struct SymbolScheduler {
    cfg: SchedulerConfig,
    pipeline: Arc<Pipeline>,
    poll_interval: RwLock<Duration>,
    root: CancellationToken,
    tasks: Mutex<HashMap<String, MonitorTask>>,
}

impl SymbolScheduler {
    pub fn new(
        cache: Arc<QuoteCache>,
        alerts: Arc<AlertEngine>,
        sink: Arc<dyn NotificationSink>,
        cfg: SchedulerConfig,
    ) -> Self {
        let pipeline = Arc::new(Pipeline {
            cache,
            alerts,
            sink,
            ttl: cfg.ttl,
            jitter: cfg.jitter,
        });

        Self {
            poll_interval: RwLock::new(cfg.poll_interval),
            cfg,
            pipeline,
            root: CancellationToken::new(),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.cfg
    }

    /// Sets the poll interval for tasks spawned from now on and starts a
    /// task for every symbol not already running.
    #[instrument(skip(self, symbols), fields(count = symbols.len()))]
    pub fn start_monitoring(
        &self,
        symbols: &[String],
        poll_interval: Duration,
    ) -> Result<(), SchedulerError> {
        if poll_interval.is_zero() {
            return Err(SchedulerError::InvalidPollInterval);
        }
        for symbol in symbols {
            validate_symbol(symbol)?;
        }

        *self.poll_interval.write() = poll_interval;

        for symbol in symbols {
            self.add_symbol(symbol)?;
        }

        info!(
            interval_ms = poll_interval.as_millis() as u64,
            "monitoring started"
        );
        Ok(())
    }

    /// Starts monitoring `symbol`. Returns `false` if it is already running.
    pub fn add_symbol(&self, symbol: &str) -> Result<bool, SchedulerError> {
        validate_symbol(symbol)?;
        let symbol = symbol.trim();

        let mut tasks = self.tasks.lock();
        if let Some(existing) = tasks.get(symbol) {
            if existing.is_running() {
                debug!(symbol, "already monitored");
                return Ok(false);
            }
        }

        let task = MonitorTask::spawn(
            symbol.to_string(),
            *self.poll_interval.read(),
            self.root.child_token(),
            self.pipeline.clone(),
        )?;

        // A finished task left here (it panicked) has nothing left to stop.
        if let Some(stale) = tasks.insert(symbol.to_string(), task) {
            stale.abort();
        }

        info!(symbol, "symbol added");
        Ok(true)
    }

    /// Stops monitoring `symbol` and waits for its task to reach STOPPED.
    /// Absent symbols are ignored.
    #[instrument(skip(self))]
    pub async fn remove_symbol(&self, symbol: &str) {
        let Some(task) = self.tasks.lock().remove(symbol.trim()) else {
            debug!("not monitored");
            return;
        };

        let outcome = task.stop(self.cfg.grace_timeout).await;
        info!(?outcome, "symbol removed");
    }

    /// Cancels every task and waits, in parallel, up to the grace timeout
    /// for each to stop; stragglers are aborted.
    #[instrument(skip(self))]
    pub async fn stop_monitoring(&self) -> StopReport {
        let tasks: Vec<MonitorTask> = self.tasks.lock().drain().map(|(_, t)| t).collect();
        let grace = self.cfg.grace_timeout;

        let outcomes = join_all(tasks.into_iter().map(|t| t.stop(grace))).await;

        let mut report = StopReport::default();
        for outcome in outcomes {
            match outcome {
                StopOutcome::Graceful => report.graceful += 1,
                StopOutcome::Forced => report.forced += 1,
                StopOutcome::Panicked => report.panicked += 1,
            }
        }

        info!(
            graceful = report.graceful,
            forced = report.forced,
            panicked = report.panicked,
            "monitoring stopped"
        );
        report
    }

    pub fn task_state(&self, symbol: &str) -> Option<TaskState> {
        self.tasks.lock().get(symbol).map(MonitorTask::state)
    }

    /// Monitored symbols, sorted.
    pub fn symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = self.tasks.lock().keys().cloned().collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

impl Drop for SymbolScheduler {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

fn validate_symbol(symbol: &str) -> Result<(), SchedulerError> {
    let s = symbol.trim();
    if s.is_empty() || s.chars().any(char::is_whitespace) {
        return Err(SchedulerError::InvalidSymbol(symbol.to_string()));
    }
    Ok(())
}
