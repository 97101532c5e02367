use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AlertError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    PriceThreshold,
    PercentageChange,
    VolumeSpike,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertKind::PriceThreshold => "price",
            AlertKind::PercentageChange => "pct",
            AlertKind::VolumeSpike => "volume",
        };
        f.write_str(s)
    }
}

impl FromStr for AlertKind {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "price" | "price_threshold" => Ok(AlertKind::PriceThreshold),
            "pct" | "percent" | "percentage_change" => Ok(AlertKind::PercentageChange),
            "volume" | "volume_spike" => Ok(AlertKind::VolumeSpike),
            other => Err(AlertError::InvalidCondition(format!(
                "unknown alert kind '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Above,
    Below,
}

impl Comparison {
    /// Strict comparison of `value` against `threshold`.
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Above => value > threshold,
            Comparison::Below => value < threshold,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Comparison::Above => f.write_str("above"),
            Comparison::Below => f.write_str("below"),
        }
    }
}

impl FromStr for Comparison {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "above" | ">" => Ok(Comparison::Above),
            "below" | "<" => Ok(Comparison::Below),
            other => Err(AlertError::InvalidCondition(format!(
                "unknown comparison '{other}'"
            ))),
        }
    }
}

/// How a volume-spike condition reads its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeBaseline {
    /// Threshold is an absolute volume.
    #[default]
    Absolute,
    /// Threshold is a multiple of the mean of the previous `window` volumes.
    Rolling { window: usize },
}

/// Identity of a registered condition: (symbol, kind, threshold, comparison).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertKey {
    pub symbol: String,
    pub kind: AlertKind,
    pub threshold: f64,
    pub comparison: Comparison,
}

impl PartialEq for AlertKey {
    fn eq(&self, other: &Self) -> bool {
        self.symbol == other.symbol
            && self.kind == other.kind
            && self.threshold.to_bits() == other.threshold.to_bits()
            && self.comparison == other.comparison
    }
}

impl Eq for AlertKey {}

impl Hash for AlertKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.symbol.hash(state);
        self.kind.hash(state);
        self.threshold.to_bits().hash(state);
        self.comparison.hash(state);
    }
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.symbol, self.kind, self.threshold, self.comparison
        )
    }
}

/// A user-registered alert. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCondition {
    pub symbol: String,
    pub kind: AlertKind,
    pub threshold: f64,
    pub comparison: Comparison,
    /// Only read for [`AlertKind::VolumeSpike`].
    #[serde(default)]
    pub volume_baseline: VolumeBaseline,
}

impl AlertCondition {
    pub fn new(
        symbol: impl Into<String>,
        kind: AlertKind,
        threshold: f64,
        comparison: Comparison,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            kind,
            threshold,
            comparison,
            volume_baseline: VolumeBaseline::Absolute,
        }
    }

    pub fn price(symbol: impl Into<String>, threshold: f64, comparison: Comparison) -> Self {
        Self::new(symbol, AlertKind::PriceThreshold, threshold, comparison)
    }

    pub fn percentage_change(
        symbol: impl Into<String>,
        threshold: f64,
        comparison: Comparison,
    ) -> Self {
        Self::new(symbol, AlertKind::PercentageChange, threshold, comparison)
    }

    pub fn volume_spike(symbol: impl Into<String>, threshold: f64) -> Self {
        Self::new(symbol, AlertKind::VolumeSpike, threshold, Comparison::Above)
    }

    pub fn with_volume_baseline(mut self, baseline: VolumeBaseline) -> Self {
        self.volume_baseline = baseline;
        self
    }

    pub fn key(&self) -> AlertKey {
        AlertKey {
            symbol: self.symbol.clone(),
            kind: self.kind,
            threshold: self.threshold,
            comparison: self.comparison,
        }
    }

    pub fn validate(&self) -> Result<(), AlertError> {
        if self.symbol.trim().is_empty() {
            return Err(AlertError::InvalidCondition("empty symbol".into()));
        }

        if !self.threshold.is_finite() {
            return Err(AlertError::InvalidCondition(format!(
                "non-finite threshold {} for {}",
                self.threshold, self.symbol
            )));
        }

        match self.kind {
            AlertKind::PriceThreshold if self.threshold <= 0.0 => {
                Err(AlertError::InvalidCondition(format!(
                    "price threshold must be positive, got {}",
                    self.threshold
                )))
            }
            AlertKind::VolumeSpike if self.threshold < 0.0 => {
                Err(AlertError::InvalidCondition(format!(
                    "volume threshold must not be negative, got {}",
                    self.threshold
                )))
            }
            AlertKind::VolumeSpike
                if matches!(self.volume_baseline, VolumeBaseline::Rolling { window: 0 }) =>
            {
                Err(AlertError::InvalidCondition(
                    "rolling volume baseline needs a window of at least 1".into(),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// Parses `SYMBOL:kind:threshold:comparison[:window]`, e.g. `AAPL:price:150:above`
/// or `TSLA:volume:3:above:20` (3x the mean of the last 20 volumes).
impl FromStr for AlertCondition {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if !(4..=5).contains(&parts.len()) {
            return Err(AlertError::InvalidCondition(format!(
                "expected SYMBOL:kind:threshold:comparison[:window], got '{s}'"
            )));
        }

        let kind: AlertKind = parts[1].parse()?;
        let threshold: f64 = parts[2].trim().parse().map_err(|_| {
            AlertError::InvalidCondition(format!("invalid threshold '{}'", parts[2]))
        })?;
        let comparison: Comparison = parts[3].parse()?;

        let mut cond = AlertCondition::new(parts[0].trim(), kind, threshold, comparison);

        if let Some(window) = parts.get(4) {
            if kind != AlertKind::VolumeSpike {
                return Err(AlertError::InvalidCondition(
                    "window is only valid for volume alerts".into(),
                ));
            }
            let window: usize = window.trim().parse().map_err(|_| {
                AlertError::InvalidCondition(format!("invalid window '{window}'"))
            })?;
            cond.volume_baseline = VolumeBaseline::Rolling { window };
        }

        cond.validate()?;
        Ok(cond)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn key_identity_ignores_volume_baseline() {
        let a = AlertCondition::volume_spike("X", 2.0);
        let b = a
            .clone()
            .with_volume_baseline(VolumeBaseline::Rolling { window: 5 });

        let mut set = HashSet::new();
        set.insert(a.key());
        assert!(set.contains(&b.key()));
    }

    #[test]
    fn keys_differ_by_threshold_and_comparison() {
        let a = AlertCondition::price("X", 150.0, Comparison::Above).key();
        let b = AlertCondition::price("X", 150.5, Comparison::Above).key();
        let c = AlertCondition::price("X", 150.0, Comparison::Below).key();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn parses_condition_strings() {
        let c: AlertCondition = "AAPL:price:150:above".parse().unwrap();
        assert_eq!(c, AlertCondition::price("AAPL", 150.0, Comparison::Above));

        let c: AlertCondition = "TSLA:volume:3:above:20".parse().unwrap();
        assert_eq!(c.volume_baseline, VolumeBaseline::Rolling { window: 20 });

        let c: AlertCondition = "BTC:pct:-5:below".parse().unwrap();
        assert_eq!(c.kind, AlertKind::PercentageChange);
        assert_eq!(c.threshold, -5.0);
    }

    #[test]
    fn rejects_malformed_conditions() {
        for bad in [
            "",
            "AAPL:price:150",
            "AAPL:foo:150:above",
            "AAPL:price:abc:above",
            "AAPL:price:150:sideways",
            ":price:150:above",
            "AAPL:price:-1:above",
            "AAPL:price:150:above:5",
            "AAPL:volume:2:above:0",
        ] {
            assert!(
                matches!(
                    bad.parse::<AlertCondition>(),
                    Err(AlertError::InvalidCondition(_))
                ),
                "expected rejection for {bad:?}"
            );
        }
    }

    #[test]
    fn non_finite_threshold_is_invalid() {
        let c = AlertCondition::price("X", f64::NAN, Comparison::Above);
        assert!(c.validate().is_err());
        let c = AlertCondition::percentage_change("X", f64::INFINITY, Comparison::Above);
        assert!(c.validate().is_err());
    }

    #[test]
    fn comparisons_are_strict() {
        assert!(Comparison::Above.holds(151.0, 150.0));
        assert!(!Comparison::Above.holds(150.0, 150.0));
        assert!(Comparison::Below.holds(149.0, 150.0));
        assert!(!Comparison::Below.holds(150.0, 150.0));
    }
}
