use async_trait::async_trait;

use crate::error::ProviderError;
use crate::types::{Quote, RawPayload};

/// Upstream market-data source.
///
/// Implementations only talk to the wire; retries, rate limiting and
/// caching are layered on top by [`crate::RateLimitedFetcher`] and
/// [`crate::QuoteCache`].
#[async_trait]
pub trait QuoteProvider: Send + Sync + 'static {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    async fn raw_fetch(&self, symbol: &str) -> Result<RawPayload, ProviderError>;

    /// Maps the provider payload into a [`Quote`].
    fn normalize(&self, symbol: &str, payload: RawPayload) -> Result<Quote, ProviderError> {
        Quote::from_payload(symbol, payload)
    }
}
