use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use market::Quote;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerState {
    #[default]
    Armed,
    Triggered,
}

impl fmt::Display for TriggerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerState::Armed => f.write_str("ARMED"),
            TriggerState::Triggered => f.write_str("TRIGGERED"),
        }
    }
}

/// Per-condition evaluation state. Only [`crate::AlertEngine::check`] mutates it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertState {
    pub trigger: TriggerState,
    pub last_quote: Option<Quote>,
    pub last_transition: Option<DateTime<Utc>>,
    /// Percentage-change reference; set from the first observed price.
    pub reference_price: Option<f64>,
}

impl AlertState {
    pub fn is_triggered(&self) -> bool {
        self.trigger == TriggerState::Triggered
    }
}
