use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use crate::error::DeliveryError;
use crate::notification::NotificationEvent;

/// Where triggered alerts go (console, webhook, email, ...).
#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn deliver(&self, event: &NotificationEvent) -> Result<(), DeliveryError>;
}

/// Writes notifications to the tracing output.
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, event: &NotificationEvent) -> Result<(), DeliveryError> {
        info!(
            target: "alerts",
            symbol = %event.symbol,
            kind = %event.alert_kind,
            threshold = event.threshold,
            comparison = %event.comparison,
            price = event.triggering_quote.price,
            volume = event.triggering_quote.volume,
            at = %event.transition_timestamp,
            "alert triggered"
        );
        Ok(())
    }
}

/// Forwards notifications into a tokio channel for an embedding application.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<NotificationEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<NotificationEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    fn name(&self) -> &str {
        "channel"
    }

    async fn deliver(&self, event: &NotificationEvent) -> Result<(), DeliveryError> {
        self.tx
            .send(event.clone())
            .await
            .map_err(|_| DeliveryError::new("channel", "receiver dropped"))
    }
}

/// Delivers to every inner sink; one failing sink does not stop the others.
#[derive(Clone, Default)]
pub struct MultiSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl MultiSink {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl NotificationSink for MultiSink {
    fn name(&self) -> &str {
        "multi"
    }

    async fn deliver(&self, event: &NotificationEvent) -> Result<(), DeliveryError> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.deliver(event).await {
                failures.push(e.to_string());
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DeliveryError::new("multi", failures.join("; ")))
        }
    }
}
