// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Engine configuration loaded from environment variables.
//!
//! Every value has a sensible default except the remote service URL. A
//! `.env` file is honored for local development.

use crate::models::{ApiVersion, ProviderType};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Logical sensor types observed when the platform provider is active.
pub const DEFAULT_OBSERVED_TYPES: &[&str] = &["workout"];

/// Observed type whose changes trigger a new-record sync. Background
/// delivery is requested for this type only.
pub const WORKOUT_OBSERVER_TYPE: &str = "workout";

/// Platform background task identifier used for periodic sync.
pub const BACKGROUND_TASK_ID: &str = "activity-sync.refresh";

/// Engine configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Provider used when no preference has been stored yet
    pub default_provider: ProviderType,
    /// Base URL of the remote synchronization service
    pub remote_url: String,
    /// Optional bearer token for the remote service
    pub api_token: Option<String>,
    /// Directory for the file-backed blob store
    pub data_dir: PathBuf,

    // --- Caching ---
    /// TTL for the activity list cache
    pub activity_cache_ttl: Duration,
    /// TTL for the stats aggregate cache
    pub stats_cache_ttl: Duration,
    /// Cooldown applied to user-initiated refreshes
    pub refresh_cooldown: Duration,
    /// Number of activities requested per remote fetch
    pub fetch_limit: usize,
    /// Window of stats requested from the remote service
    pub stats_days: u32,

    // --- Upload pipeline ---
    /// Window fetched from the platform source on a new-record event
    pub recent_window: Duration,
    /// How far back the upload sweep looks for unuploaded records
    pub sweep_lookback: Duration,
    /// Minimum age before an incomplete upload is revisited
    pub retry_min_delay: Duration,
    /// Age after which an incomplete upload is abandoned
    pub retry_deadline: Duration,
    /// API version stamped on uploads
    pub api_version: ApiVersion,

    // --- Background execution ---
    /// Period of the in-process sync loop and platform task resubmission
    pub background_interval: Duration,
    /// Execution budget for the flush on entering background
    pub background_budget: Duration,
    /// Observed sensor types for the platform provider
    pub observed_types: Vec<String>,
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self {
            default_provider: ProviderType::ProviderA,
            remote_url: "http://localhost:8080".to_string(),
            api_token: None,
            data_dir: PathBuf::from("./sync-data"),
            activity_cache_ttl: Duration::from_secs(30 * 60),
            stats_cache_ttl: Duration::from_secs(24 * 60 * 60),
            refresh_cooldown: Duration::from_secs(5),
            fetch_limit: 50,
            stats_days: 30,
            recent_window: Duration::from_secs(2 * 60 * 60),
            sweep_lookback: Duration::from_secs(7 * 24 * 60 * 60),
            retry_min_delay: Duration::from_secs(15 * 60),
            retry_deadline: Duration::from_secs(24 * 60 * 60),
            api_version: ApiVersion::V2,
            background_interval: Duration::from_secs(15 * 60),
            background_budget: Duration::from_secs(25),
            observed_types: DEFAULT_OBSERVED_TYPES
                .iter()
                .map(|t| t.to_string())
                .collect(),
        }
    }
}

impl Config {
    /// Config used by the test suites.
    pub fn test_default() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let defaults = Self::default();

        let default_provider = match env::var("SYNC_PROVIDER") {
            Ok(v) => ProviderType::from_str(v.trim())
                .map_err(|_| ConfigError::Invalid("SYNC_PROVIDER", v))?,
            Err(_) => defaults.default_provider,
        };

        let api_version = match env::var("SYNC_API_VERSION") {
            Ok(v) => ApiVersion::from_str(v.trim())
                .map_err(|_| ConfigError::Invalid("SYNC_API_VERSION", v))?,
            Err(_) => defaults.api_version,
        };

        let observed_types = env::var("SYNC_OBSERVED_TYPES")
            .map(|v| {
                v.split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.observed_types);

        let config = Self {
            default_provider,
            remote_url: env::var("SYNC_REMOTE_URL")
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .map_err(|_| ConfigError::Missing("SYNC_REMOTE_URL"))?,
            api_token: env::var("SYNC_API_TOKEN")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            data_dir: env::var("SYNC_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            activity_cache_ttl: secs_var(
                "SYNC_ACTIVITY_CACHE_TTL_SECS",
                defaults.activity_cache_ttl,
            )?,
            stats_cache_ttl: secs_var("SYNC_STATS_CACHE_TTL_SECS", defaults.stats_cache_ttl)?,
            refresh_cooldown: secs_var("SYNC_REFRESH_COOLDOWN_SECS", defaults.refresh_cooldown)?,
            fetch_limit: parse_var("SYNC_FETCH_LIMIT", defaults.fetch_limit)?,
            stats_days: parse_var("SYNC_STATS_DAYS", defaults.stats_days)?,
            recent_window: secs_var("SYNC_RECENT_WINDOW_SECS", defaults.recent_window)?,
            sweep_lookback: secs_var("SYNC_SWEEP_LOOKBACK_SECS", defaults.sweep_lookback)?,
            retry_min_delay: secs_var("SYNC_RETRY_MIN_DELAY_SECS", defaults.retry_min_delay)?,
            retry_deadline: secs_var("SYNC_RETRY_DEADLINE_SECS", defaults.retry_deadline)?,
            api_version,
            background_interval: secs_var(
                "SYNC_BACKGROUND_INTERVAL_SECS",
                defaults.background_interval,
            )?,
            background_budget: secs_var(
                "SYNC_BACKGROUND_BUDGET_SECS",
                defaults.background_budget,
            )?,
            observed_types,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.activity_cache_ttl.is_zero() || self.stats_cache_ttl.is_zero() {
            return Err(ConfigError::Inconsistent(
                "cache TTLs must be non-zero".to_string(),
            ));
        }
        if self.retry_deadline <= self.retry_min_delay {
            return Err(ConfigError::Inconsistent(format!(
                "retry deadline ({}s) must exceed retry min delay ({}s)",
                self.retry_deadline.as_secs(),
                self.retry_min_delay.as_secs()
            )));
        }
        if self.background_interval.is_zero() {
            return Err(ConfigError::Inconsistent(
                "background interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(name, v)),
        Err(_) => Ok(default),
    }
}

fn secs_var(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    parse_var(name, default.as_secs()).map(Duration::from_secs)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),

    #[error("Inconsistent configuration: {0}")]
    Inconsistent(String),
}
