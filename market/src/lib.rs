pub mod cache;
pub mod error;
pub mod fetcher;
pub mod provider;
pub mod rate_limit;
pub mod store;
pub mod types;

pub use cache::{CacheEntry, DEFAULT_TTL, QuoteCache};
pub use error::{CacheError, FetchError, ProviderError, StoreError};
pub use fetcher::{RateLimitedFetcher, RetryPolicy};
pub use provider::QuoteProvider;
pub use rate_limit::{RateLimitConfig, RateLimitExceeded, RateLimiter, Slot};
pub use store::{KeyValueStore, MemoryStore};
pub use types::{Quote, RawPayload};
