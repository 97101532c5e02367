use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlertError {
    /// Rejected at registration; never enters the engine.
    #[error("invalid alert condition: {0}")]
    InvalidCondition(String),
}

/// A sink could not deliver a notification. Logged by the caller; the
/// alert-state transition that produced the event stands.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("delivery via {sink} failed: {cause}")]
pub struct DeliveryError {
    pub sink: String,
    pub cause: String,
}

impl DeliveryError {
    pub fn new(sink: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            sink: sink.into(),
            cause: cause.into(),
        }
    }
}
