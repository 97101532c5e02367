use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Opaque provider payload. Each provider decides its own shape and
/// normalizes it into a [`Quote`].
pub type RawPayload = serde_json::Value;

/// Latest observed market state for one instrument. One instance per fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub volume: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub observed_at: DateTime<Utc>,
}

impl Quote {
    /// Quote with OHLC all pinned to `price`.
    pub fn new(symbol: impl Into<String>, price: f64, volume: f64) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            volume,
            open: price,
            high: price,
            low: price,
            close: price,
            observed_at: Utc::now(),
        }
    }

    pub fn with_ohlc(mut self, open: f64, high: f64, low: f64, close: f64) -> Self {
        self.open = open;
        self.high = high;
        self.low = low;
        self.close = close;
        self
    }

    /// Normalizes the default payload shape:
    /// `{"price": f64, "volume": f64?, "open"/"high"/"low"/"close": f64?, "timestamp": ms?}`.
    ///
    /// Anything that cannot describe a usable quote is a permanent error;
    /// retrying would just return the same payload.
    pub fn from_payload(symbol: &str, payload: RawPayload) -> Result<Self, ProviderError> {
        let shape: PayloadShape = serde_json::from_value(payload)
            .map_err(|e| ProviderError::Permanent(format!("malformed payload: {e}")))?;

        if !shape.price.is_finite() || shape.price <= 0.0 {
            return Err(ProviderError::Permanent(format!(
                "invalid price {} for {symbol}",
                shape.price
            )));
        }

        let volume = shape.volume.unwrap_or(0.0);
        if !volume.is_finite() || volume < 0.0 {
            return Err(ProviderError::Permanent(format!(
                "invalid volume {volume} for {symbol}"
            )));
        }

        let observed_at = match shape.timestamp {
            Some(ms) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| ProviderError::Permanent(format!("invalid timestamp {ms}")))?,
            None => Utc::now(),
        };

        Ok(Self {
            symbol: symbol.to_string(),
            price: shape.price,
            volume,
            open: shape.open.unwrap_or(shape.price),
            high: shape.high.unwrap_or(shape.price),
            low: shape.low.unwrap_or(shape.price),
            close: shape.close.unwrap_or(shape.price),
            observed_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PayloadShape {
    price: f64,
    volume: Option<f64>,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    timestamp: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_with_all_fields_is_normalized() {
        let q = Quote::from_payload(
            "AAPL",
            json!({
                "price": 101.5,
                "volume": 12000.0,
                "open": 100.0,
                "high": 102.0,
                "low": 99.5,
                "close": 101.0,
                "timestamp": 1_700_000_000_000i64
            }),
        )
        .unwrap();

        assert_eq!(q.symbol, "AAPL");
        assert_eq!(q.price, 101.5);
        assert_eq!(q.volume, 12000.0);
        assert_eq!(q.high, 102.0);
        assert_eq!(q.observed_at.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn missing_ohlc_falls_back_to_price() {
        let q = Quote::from_payload("X", json!({ "price": 10.0 })).unwrap();
        assert_eq!(q.open, 10.0);
        assert_eq!(q.close, 10.0);
        assert_eq!(q.volume, 0.0);
    }

    #[test]
    fn malformed_payload_is_permanent() {
        let err = Quote::from_payload("X", json!({ "last": 10.0 })).unwrap_err();
        assert!(matches!(err, ProviderError::Permanent(_)));

        let err = Quote::from_payload("X", json!({ "price": -1.0 })).unwrap_err();
        assert!(matches!(err, ProviderError::Permanent(_)));
    }
}
