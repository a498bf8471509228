//! Runtime settings loaded from the environment (and `.env` via dotenvy).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::services::failure_injector::{FailureInjectorConfig, FaultKind};

pub const DEFAULT_COINGECKO_BASE_URL: &str = "https://api.coingecko.com/api/v3";
pub const DEFAULT_NEWS_FEED_URL: &str = "https://rss.app/feeds/v1.1/tRI0JxEaEvcKz0HW.json";
pub const DEFAULT_CSV_PATH: &str = "data/crypto_data.csv";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub coingecko_api_key: String,
    pub coingecko_base_url: String,
    pub coingecko_rate_limit_per_minute: u32,
    pub news_feed_url: String,
    pub news_feed_rate_limit_per_minute: u32,
    pub csv_path: PathBuf,
    pub schedule_interval_minutes: u64,
    pub stale_run_timeout_minutes: i64,
    pub drift_sample_size: usize,
    pub failure_injection: FailureInjectorConfig,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let failure_injection = FailureInjectorConfig {
            enabled: parse_or(&lookup, "ENABLE_FAILURE_INJECTION", false)?,
            probability: parse_or(&lookup, "FAILURE_PROBABILITY", 0.0)?,
            kind: parse_or(&lookup, "FAILURE_KIND", FaultKind::Database)?,
            fail_at_index: parse_optional(&lookup, "FAIL_AT_RECORD")?,
        };

        Ok(Self {
            database_url,
            coingecko_api_key: lookup("COINGECKO_API_KEY").unwrap_or_default(),
            coingecko_base_url: lookup("COINGECKO_BASE_URL")
                .unwrap_or_else(|| DEFAULT_COINGECKO_BASE_URL.to_string()),
            coingecko_rate_limit_per_minute: parse_or(&lookup, "COINGECKO_RATE_LIMIT", 30)?,
            news_feed_url: lookup("NEWS_FEED_URL")
                .unwrap_or_else(|| DEFAULT_NEWS_FEED_URL.to_string()),
            news_feed_rate_limit_per_minute: parse_or(&lookup, "NEWS_FEED_RATE_LIMIT", 20)?,
            csv_path: lookup("CSV_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CSV_PATH)),
            schedule_interval_minutes: parse_or(&lookup, "ETL_SCHEDULE_MINUTES", 60)?,
            stale_run_timeout_minutes: parse_or(&lookup, "STALE_RUN_TIMEOUT_MINUTES", 120)?,
            drift_sample_size: parse_or(&lookup, "DRIFT_SAMPLE_SIZE", 10)?,
            failure_injection,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    Ok(parse_optional(lookup, key)?.unwrap_or(default))
}

fn parse_optional<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .to_lowercase()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}
