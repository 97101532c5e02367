//! Shared types used by the scheduler subsystem.

use std::time::Duration;

use market::DEFAULT_TTL;

/// Timing knobs for the per-symbol poll loops.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Default interval between polls of one symbol.
    pub poll_interval: Duration,

    /// Upper bound of the random delay added to each tick, so symbols sharing
    /// a fetcher do not poll in lockstep.
    pub jitter: Duration,

    /// TTL passed to the quote cache on every poll.
    pub ttl: Duration,

    /// How long `remove_symbol` / `stop_monitoring` wait for a task to exit
    /// on its own before aborting it.
    pub grace_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            jitter: Duration::from_millis(500),
            ttl: DEFAULT_TTL,
            grace_timeout: Duration::from_secs(5),
        }
    }
}

/// How the tasks ended during `stop_monitoring`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Exited cooperatively within the grace timeout.
    pub graceful: usize,
    /// Aborted after the grace timeout elapsed.
    pub forced: usize,
    /// Had already died from a panic.
    pub panicked: usize,
}

impl StopReport {
    pub fn total(&self) -> usize {
        self.graceful + self.forced + self.panicked
    }
}
