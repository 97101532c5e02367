use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};

use market::{ProviderError, QuoteProvider, RawPayload};

/// Quote source speaking plain JSON over HTTP: `GET {base_url}/quotes/{symbol}`
/// answering `{"price": .., "volume": .., "open": .., ...}`.
#[derive(Clone)]
pub struct HttpQuoteProvider {
    http: Client,
    base_url: String,
}

impl HttpQuoteProvider {
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(Duration::from_secs(5))
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn quote_url(&self, symbol: &str) -> String {
        format!("{}/quotes/{}", self.base_url, symbol)
    }
}

/// Throttling and server-side failures are worth retrying; any other
/// non-success status means the request itself is wrong.
pub fn classify_status(status: StatusCode) -> Option<ProviderError> {
    if status.is_success() {
        None
    } else if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        Some(ProviderError::Transient(format!("upstream returned {status}")))
    } else {
        Some(ProviderError::Permanent(format!("upstream returned {status}")))
    }
}

#[async_trait]
impl QuoteProvider for HttpQuoteProvider {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self), level = "debug")]
    async fn raw_fetch(&self, symbol: &str) -> Result<RawPayload, ProviderError> {
        let resp = self
            .http
            .get(self.quote_url(symbol))
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("request failed: {e}")))?;

        if let Some(err) = classify_status(resp.status()) {
            return Err(err);
        }

        let payload: RawPayload = resp
            .json()
            .await
            .map_err(|e| ProviderError::Permanent(format!("undecodable body: {e}")))?;

        debug!("quote payload received");
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttling_and_server_errors_are_transient() {
        for status in [
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
        ] {
            assert!(classify_status(status).unwrap().is_transient(), "{status}");
        }
    }

    #[test]
    fn client_errors_are_permanent() {
        for status in [StatusCode::NOT_FOUND, StatusCode::BAD_REQUEST, StatusCode::UNAUTHORIZED] {
            assert!(!classify_status(status).unwrap().is_transient(), "{status}");
        }
        assert!(classify_status(StatusCode::OK).is_none());
    }

    #[test]
    fn builds_quote_urls() {
        let p = HttpQuoteProvider::new("http://localhost:9000/").unwrap();
        assert_eq!(p.quote_url("AAPL"), "http://localhost:9000/quotes/AAPL");
    }
}
