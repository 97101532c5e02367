use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use market::{KeyValueStore, StoreError};

use crate::condition::{AlertKind, Comparison};
use crate::state::TriggerState;

/// One audit line per condition evaluation, whatever the outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub symbol: String,
    pub kind: AlertKind,
    pub threshold: f64,
    pub comparison: Comparison,
    pub price: f64,
    pub volume: f64,
    /// Value compared against the threshold; `None` while a baseline warms up.
    pub observed: Option<f64>,
    pub predicate_held: bool,
    pub state_before: TriggerState,
    pub state_after: TriggerState,
    pub notified: bool,
    pub evaluated_at: DateTime<Utc>,
}

#[async_trait]
pub trait AlertHistory: Send + Sync + 'static {
    async fn record(&self, record: &EvaluationRecord) -> Result<(), StoreError>;
}

pub fn history_key(symbol: &str) -> String {
    format!("alert_history:{symbol}")
}

/// Appends JSON records to the shared store, one history key per symbol.
pub struct StoreAlertHistory {
    store: Arc<dyn KeyValueStore>,
}

impl StoreAlertHistory {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AlertHistory for StoreAlertHistory {
    async fn record(&self, record: &EvaluationRecord) -> Result<(), StoreError> {
        let line = serde_json::to_string(record).map_err(|e| StoreError::Codec(e.to_string()))?;
        self.store.append(&history_key(&record.symbol), line).await
    }
}
