use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use market::Quote;

use crate::condition::{AlertKind, Comparison};

/// Emitted once per ARMED → TRIGGERED transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub symbol: String,
    pub alert_kind: AlertKind,
    pub threshold: f64,
    pub comparison: Comparison,
    pub triggering_quote: Quote,
    pub transition_timestamp: DateTime<Utc>,
}

impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} alert: {} {} (price={}, volume={}) at {}",
            self.symbol,
            self.alert_kind,
            self.comparison,
            self.threshold,
            self.triggering_quote.price,
            self.triggering_quote.volume,
            self.transition_timestamp.to_rfc3339()
        )
    }
}
