use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("poll interval must be greater than zero")]
    InvalidPollInterval,

    #[error("invalid symbol '{0}'")]
    InvalidSymbol(String),

    /// No runtime to spawn the monitor task on. Fatal for the caller.
    #[error("could not spawn monitor task for {symbol}: {cause}")]
    SpawnFailed { symbol: String, cause: String },
}
