use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};

use alert::{DeliveryError, NotificationEvent, NotificationSink};

/// POSTs each notification as JSON to a fixed URL.
#[derive(Clone)]
pub struct WebhookSink {
    http: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(Duration::from_secs(5)).build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    #[instrument(skip(self, event), fields(symbol = %event.symbol), level = "debug")]
    async fn deliver(&self, event: &NotificationEvent) -> Result<(), DeliveryError> {
        self.http
            .post(&self.url)
            .json(event)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DeliveryError::new("webhook", e.to_string()))?;

        debug!("webhook delivered");
        Ok(())
    }
}
