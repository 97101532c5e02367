//! AlertEngine
//!
//! Holds the registered alert conditions and their ARMED/TRIGGERED state.
//! `check` is the only path that mutates state; a notification is produced
//! solely on an ARMED → TRIGGERED transition, so a condition that keeps
//! holding across polls fires once until it resets.
//!
//! Locking: the symbol index sits behind an `RwLock`, each condition behind
//! its own `Mutex`. Neither is held across an await; history writes happen
//! after every slot lock has been released.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use market::Quote;

use crate::condition::{AlertCondition, AlertKey, AlertKind, VolumeBaseline};
use crate::error::AlertError;
use crate::history::{AlertHistory, EvaluationRecord};
use crate::notification::NotificationEvent;
use crate::rolling_window::{DEFAULT_CAPACITY, RollingWindow};
use crate::state::{AlertState, TriggerState};

/// What happens to a percentage-change reference price when the condition
/// resets from TRIGGERED back to ARMED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferencePolicy {
    /// Move the reference to the price observed at the reset.
    #[default]
    RebaseOnReset,
    /// Keep measuring from the first observed price.
    KeepOriginal,
}

struct Slot {
    condition: AlertCondition,
    state: AlertState,
    volumes: RollingWindow,
    /// Set when the slot is removed or replaced while a `check` holds a handle.
    removed: bool,
}

impl Slot {
    fn new(condition: AlertCondition) -> Self {
        let capacity = match condition.volume_baseline {
            VolumeBaseline::Rolling { window } => window,
            VolumeBaseline::Absolute => DEFAULT_CAPACITY,
        };
        Self {
            condition,
            state: AlertState::default(),
            volumes: RollingWindow::new(capacity),
            removed: false,
        }
    }

    /// Value compared against the threshold, or `None` while no baseline exists.
    fn observe(&mut self, quote: &Quote) -> Option<f64> {
        match self.condition.kind {
            AlertKind::PriceThreshold => Some(quote.price),
            AlertKind::PercentageChange => {
                let reference = *self.state.reference_price.get_or_insert(quote.price);
                Some((quote.price - reference) / reference * 100.0)
            }
            AlertKind::VolumeSpike => match self.condition.volume_baseline {
                VolumeBaseline::Absolute => Some(quote.volume),
                VolumeBaseline::Rolling { .. } => {
                    let ratio = self
                        .volumes
                        .mean()
                        .filter(|mean| *mean > 0.0)
                        .map(|mean| quote.volume / mean);
                    self.volumes.push(quote.volume);
                    ratio
                }
            },
        }
    }

    fn evaluate(
        &mut self,
        quote: &Quote,
        policy: ReferencePolicy,
    ) -> (EvaluationRecord, Option<NotificationEvent>) {
        let observed = self.observe(quote);
        let held = observed.is_some_and(|v| {
            self.condition
                .comparison
                .holds(v, self.condition.threshold)
        });

        let before = self.state.trigger;
        let now = Utc::now();
        let mut event = None;

        match (before, held) {
            (TriggerState::Armed, true) => {
                self.state.trigger = TriggerState::Triggered;
                self.state.last_transition = Some(now);
                event = Some(NotificationEvent {
                    symbol: self.condition.symbol.clone(),
                    alert_kind: self.condition.kind,
                    threshold: self.condition.threshold,
                    comparison: self.condition.comparison,
                    triggering_quote: quote.clone(),
                    transition_timestamp: now,
                });
            }
            (TriggerState::Triggered, false) => {
                self.state.trigger = TriggerState::Armed;
                self.state.last_transition = Some(now);
                if self.condition.kind == AlertKind::PercentageChange
                    && policy == ReferencePolicy::RebaseOnReset
                {
                    self.state.reference_price = Some(quote.price);
                }
            }
            _ => {}
        }

        self.state.last_quote = Some(quote.clone());

        let record = EvaluationRecord {
            symbol: self.condition.symbol.clone(),
            kind: self.condition.kind,
            threshold: self.condition.threshold,
            comparison: self.condition.comparison,
            price: quote.price,
            volume: quote.volume,
            observed,
            predicate_held: held,
            state_before: before,
            state_after: self.state.trigger,
            notified: event.is_some(),
            evaluated_at: now,
        };

        (record, event)
    }
}

type SymbolSlots = HashMap<AlertKey, Arc<Mutex<Slot>>>;

pub struct AlertEngine {
    index: RwLock<HashMap<String, SymbolSlots>>,
    history: Arc<dyn AlertHistory>,
    policy: ReferencePolicy,
}

impl AlertEngine {
    pub fn new(history: Arc<dyn AlertHistory>) -> Self {
        Self {
            index: RwLock::new(HashMap::new()),
            history,
            policy: ReferencePolicy::default(),
        }
    }

    pub fn with_reference_policy(mut self, policy: ReferencePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn reference_policy(&self) -> ReferencePolicy {
        self.policy
    }

    /// Registers `cond`, or resets it to ARMED if the same identity is
    /// already registered.
    pub fn add_condition(&self, cond: AlertCondition) -> Result<AlertKey, AlertError> {
        cond.validate()?;
        let key = cond.key();

        let mut index = self.index.write();
        let slots = index.entry(cond.symbol.clone()).or_default();
        if let Some(old) = slots.insert(key.clone(), Arc::new(Mutex::new(Slot::new(cond)))) {
            old.lock().removed = true;
            debug!(alert = %key, "alert condition re-armed");
        } else {
            info!(alert = %key, "alert condition registered");
        }

        Ok(key)
    }

    /// Drops the condition and its state. Returns whether it was registered.
    pub fn remove_condition(&self, key: &AlertKey) -> bool {
        let mut index = self.index.write();
        let Some(slots) = index.get_mut(&key.symbol) else {
            return false;
        };

        let removed = slots.remove(key);
        if slots.is_empty() {
            index.remove(&key.symbol);
        }

        match removed {
            Some(slot) => {
                slot.lock().removed = true;
                info!(alert = %key, "alert condition removed");
                true
            }
            None => false,
        }
    }

    /// Evaluates every condition registered for `quote.symbol`.
    #[instrument(skip(self, quote), fields(symbol = %quote.symbol, price = quote.price))]
    pub async fn check(&self, quote: &Quote) -> Vec<NotificationEvent> {
        let slots: Vec<Arc<Mutex<Slot>>> = match self.index.read().get(&quote.symbol) {
            Some(slots) => slots.values().cloned().collect(),
            None => return Vec::new(),
        };

        let mut records = Vec::with_capacity(slots.len());
        let mut events = Vec::new();

        for slot in slots {
            let mut slot = slot.lock();
            if slot.removed {
                continue;
            }
            let (record, event) = slot.evaluate(quote, self.policy);
            records.push(record);
            events.extend(event);
        }

        for record in &records {
            if let Err(e) = self.history.record(record).await {
                warn!(error = %e, symbol = %record.symbol, "failed to append alert history");
            }
        }

        if !events.is_empty() {
            info!(count = events.len(), "alerts triggered");
        }

        events
    }

    /// Snapshot of the state for `key`, if registered.
    pub fn state(&self, key: &AlertKey) -> Option<AlertState> {
        let index = self.index.read();
        let slot = index.get(&key.symbol)?.get(key)?;
        let state = slot.lock().state.clone();
        Some(state)
    }

    pub fn conditions_for(&self, symbol: &str) -> Vec<AlertCondition> {
        self.index
            .read()
            .get(symbol)
            .map(|slots| {
                slots
                    .values()
                    .map(|slot| slot.lock().condition.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of registered conditions across all symbols.
    pub fn len(&self) -> usize {
        self.index.read().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
