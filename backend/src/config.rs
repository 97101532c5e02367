use std::str::FromStr;
use std::time::Duration;

use alert::AlertCondition;
use market::{RateLimitConfig, RetryPolicy};
use scheduler::SchedulerConfig;

use crate::error::ConfigError;

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Database connection string.
    pub database_url: String,

    /// Base URL of the HTTP quote provider.
    pub provider_url: String,

    /// `production` switches logs to JSON.
    pub app_env: String,

    // =========================
    // Monitoring
    // =========================
    /// Symbols monitored from startup.
    pub watch_symbols: Vec<String>,

    /// Conditions registered at startup.
    pub alert_conditions: Vec<AlertCondition>,

    /// Where triggered alerts are POSTed, in addition to the log.
    pub webhook_url: Option<String>,

    /// Poll cadence, jitter, cache TTL and shutdown grace.
    pub scheduler: SchedulerConfig,

    // =========================
    // Upstream budget
    // =========================
    /// Token bucket shared by every upstream call.
    pub rate_limit: RateLimitConfig,

    /// Retry/backoff for transient provider failures.
    pub retry: RetryPolicy,

    /// Maximum concurrent upstream calls in a batch fetch.
    pub fetch_concurrency: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let provider_url =
            var("QUOTE_PROVIDER_URL").ok_or(ConfigError::Missing("QUOTE_PROVIDER_URL"))?;

        let watch_symbols = var("WATCH_SYMBOLS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let alert_conditions = match var("ALERT_CONDITIONS") {
            Some(raw) => parse_conditions(&raw)?,
            None => Vec::new(),
        };

        let scheduler = SchedulerConfig {
            poll_interval: millis(&lookup, "POLL_INTERVAL_MS", 5_000)?,
            jitter: millis(&lookup, "POLL_JITTER_MS", 500)?,
            ttl: Duration::from_secs(number(&lookup, "CACHE_TTL_SECS", 300)?),
            grace_timeout: millis(&lookup, "SHUTDOWN_GRACE_MS", 5_000)?,
        };

        if scheduler.poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                var: "POLL_INTERVAL_MS",
                value: "0".into(),
                reason: "must be greater than zero".into(),
            });
        }

        let rate_limit = RateLimitConfig {
            refill_per_sec: number(&lookup, "RATE_LIMIT_PER_SEC", 5.0)?,
            capacity: number(&lookup, "RATE_LIMIT_BURST", 5)?,
            max_wait: millis(&lookup, "RATE_LIMIT_MAX_WAIT_MS", 10_000)?,
        };

        let retry = RetryPolicy {
            max_attempts: number(&lookup, "FETCH_MAX_ATTEMPTS", 4)?,
            base_delay: millis(&lookup, "FETCH_BASE_DELAY_MS", 200)?,
            max_delay: millis(&lookup, "FETCH_MAX_DELAY_MS", 5_000)?,
            ..RetryPolicy::default()
        };

        if !(rate_limit.refill_per_sec.is_finite() && rate_limit.refill_per_sec > 0.0) {
            return Err(ConfigError::Invalid {
                var: "RATE_LIMIT_PER_SEC",
                value: rate_limit.refill_per_sec.to_string(),
                reason: "must be a positive finite number".into(),
            });
        }

        Ok(Self {
            database_url: var("DATABASE_URL").unwrap_or_else(|| "sqlite::memory:".to_string()),
            provider_url,
            app_env: var("APP_ENV").unwrap_or_else(|| "development".to_string()),
            watch_symbols,
            alert_conditions,
            webhook_url: var("WEBHOOK_URL"),
            scheduler,
            rate_limit,
            retry,
            fetch_concurrency: number(&lookup, "FETCH_CONCURRENCY", 8)?,
        })
    }

    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }
}

/// `;`-separated `SYMBOL:kind:threshold:comparison[:window]` entries.
fn parse_conditions(raw: &str) -> Result<Vec<AlertCondition>, ConfigError> {
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            entry.parse::<AlertCondition>().map_err(|e| ConfigError::Invalid {
                var: "ALERT_CONDITIONS",
                value: entry.to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}

fn number<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var).filter(|v| !v.trim().is_empty()) {
        None => Ok(default),
        Some(value) => {
            let parsed = value.trim().parse::<T>();
            parsed.map_err(|e| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            })
        }
    }
}

fn millis<F>(lookup: &F, var: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    number(lookup, var, default).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alert::{AlertKind, VolumeBaseline};
    use std::collections::HashMap;

    fn from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_apply() {
        let cfg = from(&[("QUOTE_PROVIDER_URL", "http://quotes")]).unwrap();

        assert_eq!(cfg.database_url, "sqlite::memory:");
        assert_eq!(cfg.scheduler.poll_interval, Duration::from_millis(5_000));
        assert_eq!(cfg.scheduler.jitter, Duration::from_millis(500));
        assert_eq!(cfg.scheduler.ttl, Duration::from_secs(300));
        assert_eq!(cfg.scheduler.grace_timeout, Duration::from_secs(5));
        assert_eq!(cfg.rate_limit.capacity, 5);
        assert_eq!(cfg.rate_limit.refill_per_sec, 5.0);
        assert_eq!(cfg.rate_limit.max_wait, Duration::from_secs(10));
        assert_eq!(cfg.retry.max_attempts, 4);
        assert_eq!(cfg.fetch_concurrency, 8);
        assert!(cfg.watch_symbols.is_empty());
        assert!(cfg.alert_conditions.is_empty());
        assert!(cfg.webhook_url.is_none());
        assert!(!cfg.is_production());
    }

    #[test]
    fn provider_url_is_required() {
        assert_eq!(
            from(&[]).unwrap_err(),
            ConfigError::Missing("QUOTE_PROVIDER_URL")
        );
    }

    #[test]
    fn parses_symbols_and_conditions() {
        let cfg = from(&[
            ("QUOTE_PROVIDER_URL", "http://quotes"),
            ("WATCH_SYMBOLS", " AAPL, TSLA ,,BTC "),
            (
                "ALERT_CONDITIONS",
                "AAPL:price:150:above; TSLA:volume:3:above:20 ;",
            ),
            ("POLL_INTERVAL_MS", "1000"),
            ("APP_ENV", "production"),
        ])
        .unwrap();

        assert_eq!(cfg.watch_symbols, vec!["AAPL", "TSLA", "BTC"]);
        assert_eq!(cfg.alert_conditions.len(), 2);
        assert_eq!(cfg.alert_conditions[1].kind, AlertKind::VolumeSpike);
        assert_eq!(
            cfg.alert_conditions[1].volume_baseline,
            VolumeBaseline::Rolling { window: 20 }
        );
        assert_eq!(cfg.scheduler.poll_interval, Duration::from_secs(1));
        assert!(cfg.is_production());
    }

    #[test]
    fn rejects_bad_values() {
        let err = from(&[
            ("QUOTE_PROVIDER_URL", "http://quotes"),
            ("POLL_INTERVAL_MS", "soon"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "POLL_INTERVAL_MS", .. }));

        let err = from(&[
            ("QUOTE_PROVIDER_URL", "http://quotes"),
            ("ALERT_CONDITIONS", "AAPL:price:150:maybe"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "ALERT_CONDITIONS", .. }));

        let err = from(&[
            ("QUOTE_PROVIDER_URL", "http://quotes"),
            ("POLL_INTERVAL_MS", "0"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "POLL_INTERVAL_MS", .. }));

        for rate in ["0", "-2", "NaN", "inf"] {
            let err = from(&[
                ("QUOTE_PROVIDER_URL", "http://quotes"),
                ("RATE_LIMIT_PER_SEC", rate),
            ])
            .unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { var: "RATE_LIMIT_PER_SEC", .. }));
        }
    }

    #[test]
    fn extreme_rate_and_ttl_are_accepted() {
        let cfg = from(&[
            ("QUOTE_PROVIDER_URL", "http://quotes"),
            ("RATE_LIMIT_PER_SEC", "1e-20"),
            ("CACHE_TTL_SECS", "18446744073709551615"),
        ])
        .unwrap();

        assert_eq!(cfg.rate_limit.refill_per_sec, 1e-20);
        assert_eq!(cfg.scheduler.ttl, Duration::from_secs(u64::MAX));
    }
}
