use std::time::Duration;

use chrono::{DateTime, Utc};

use fundsync_adapters::JustGivingConfig;
use fundsync_core::{CharityId, DEFAULT_STALENESS_SECS};
use fundsync_storage::{HttpClientConfig, RateLimit};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("invalid {key}={value:?}: expected {expected}")]
    Invalid {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: String,
    pub justgiving_base_url: String,
    pub justgiving_app_id: Option<String>,
    pub results_batch: usize,
    pub rate_limit: RateLimit,
    pub default_charity_id: Option<CharityId>,
    pub stale_after: Duration,
    pub heartbeat_interval: Duration,
    pub http_timeout: Duration,
    pub user_agent: String,
}

impl SyncConfig {
    /// Defaults for everything but the two mandatory settings.
    pub fn new(database_url: impl Into<String>, results_batch: usize) -> Self {
        Self {
            database_url: database_url.into(),
            justgiving_base_url: JustGivingConfig::default().base_url,
            justgiving_app_id: None,
            results_batch,
            rate_limit: RateLimit::default(),
            default_charity_id: None,
            stale_after: Duration::from_secs(DEFAULT_STALENESS_SECS),
            heartbeat_interval: Duration::from_secs(5 * 60),
            http_timeout: Duration::from_secs(20),
            user_agent: "fundsync/0.1".to_string(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let database_url = value("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let results_batch: usize = parse_required(&value, "FUNDSYNC_RESULTS_BATCH", "integer >= 1")?;
        if results_batch < 1 {
            return Err(invalid("FUNDSYNC_RESULTS_BATCH", results_batch, "integer >= 1"));
        }

        let mut config = Self::new(database_url, results_batch);
        if let Some(base_url) = value("JUSTGIVING_BASE_URL") {
            config.justgiving_base_url = base_url;
        }
        config.justgiving_app_id = value("JUSTGIVING_APP_ID");

        if let Some(per_second) = parse_optional::<f64>(&value, "FUNDSYNC_RATE_PER_SEC", "number > 0")? {
            if !(per_second > 0.0 && per_second.is_finite()) {
                return Err(invalid("FUNDSYNC_RATE_PER_SEC", per_second, "number > 0"));
            }
            config.rate_limit.per_second = per_second;
        }
        if let Some(burst) = parse_optional::<u32>(&value, "FUNDSYNC_RATE_BURST", "integer >= 1")? {
            if burst < 1 {
                return Err(invalid("FUNDSYNC_RATE_BURST", burst, "integer >= 1"));
            }
            config.rate_limit.burst = burst;
        }
        if let Some(charity) =
            parse_optional::<CharityId>(&value, "FUNDSYNC_DEFAULT_CHARITY_ID", "integer > 0")?
        {
            if charity <= 0 {
                return Err(invalid("FUNDSYNC_DEFAULT_CHARITY_ID", charity, "integer > 0"));
            }
            config.default_charity_id = Some(charity);
        }
        if let Some(secs) = parse_optional::<u64>(&value, "FUNDSYNC_STALE_AFTER_SECS", "integer >= 1")? {
            if secs < 1 {
                return Err(invalid("FUNDSYNC_STALE_AFTER_SECS", secs, "integer >= 1"));
            }
            config.stale_after = Duration::from_secs(secs);
            config.stale_before(Utc::now())?;
        }
        if let Some(minutes) =
            parse_optional::<u64>(&value, "FUNDSYNC_HEARTBEAT_MINUTES", "integer >= 1")?
        {
            if minutes < 1 {
                return Err(invalid("FUNDSYNC_HEARTBEAT_MINUTES", minutes, "integer >= 1"));
            }
            let secs = minutes
                .checked_mul(60)
                .ok_or_else(|| invalid("FUNDSYNC_HEARTBEAT_MINUTES", minutes, "integer >= 1"))?;
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_optional::<u64>(&value, "FUNDSYNC_HTTP_TIMEOUT_SECS", "integer")? {
            config.http_timeout = Duration::from_secs(secs);
        }
        if let Some(user_agent) = value("FUNDSYNC_USER_AGENT") {
            config.user_agent = user_agent;
        }

        Ok(config)
    }

    /// Cut-off for stale pages: anything last synced before it is due.
    pub fn stale_before(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, ConfigError> {
        chrono::Duration::from_std(self.stale_after)
            .ok()
            .and_then(|window| now.checked_sub_signed(window))
            .ok_or_else(|| {
                invalid(
                    "FUNDSYNC_STALE_AFTER_SECS",
                    self.stale_after.as_secs(),
                    "window representable as a date",
                )
            })
    }

    /// Settings for the live JustGiving client; fails without an app id.
    pub fn justgiving(&self) -> Result<JustGivingConfig, ConfigError> {
        let app_id = self
            .justgiving_app_id
            .clone()
            .ok_or(ConfigError::Missing("JUSTGIVING_APP_ID"))?;
        Ok(JustGivingConfig {
            base_url: self.justgiving_base_url.clone(),
            app_id,
        })
    }

    pub fn http_client(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: self.http_timeout,
            user_agent: Some(self.user_agent.clone()),
        }
    }
}

fn invalid(key: &'static str, value: impl ToString, expected: &'static str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        expected,
    }
}

fn parse_optional<T: std::str::FromStr>(
    value: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    value(key)
        .map(|raw| raw.parse::<T>().map_err(|_| invalid(key, raw, expected)))
        .transpose()
}

fn parse_required<T: std::str::FromStr>(
    value: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    parse_optional(value, key, expected)?.ok_or(ConfigError::Missing(key))
}
