use thiserror::Error;

/// What an upstream provider reports for a single raw fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Network failure or throttling; worth retrying.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Unknown symbol, rejected request, undecodable payload.
    #[error("permanent provider error: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// Outcome of a rate-limited, retried fetch that did not produce a quote.
///
/// `Clone` so a single upstream failure can be handed to every caller
/// waiting on the same in-flight fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("fetch for {symbol} failed after {attempts} attempt(s): {cause}")]
    Transient {
        symbol: String,
        attempts: u32,
        cause: String,
    },

    #[error("fetch for {symbol} rejected: {cause}")]
    Permanent { symbol: String, cause: String },

    #[error("rate limit for {symbol} would exceed max wait ({waited_ms} ms)")]
    RateLimited { symbol: String, waited_ms: u64 },
}

impl FetchError {
    pub fn symbol(&self) -> &str {
        match self {
            FetchError::Transient { symbol, .. }
            | FetchError::Permanent { symbol, .. }
            | FetchError::RateLimited { symbol, .. } => symbol,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backing store unreachable. Readers treat this as a cache miss.
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("stored value could not be decoded: {0}")]
    Codec(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The caller driving the in-flight fetch went away before finishing.
    #[error("in-flight fetch for {symbol} was abandoned")]
    FlightAbandoned { symbol: String },
}
