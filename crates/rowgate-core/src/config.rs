//! Engine, connection and pagination configuration.
//!
//! Every struct has a usable `Default`. [`EngineConfig`] and
//! [`PaginationConfig`] also deserialize from JSON with millisecond fields,
//! and the engine settings can be overlaid from `ROWGATE_*` environment
//! variables.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::http_client::HttpAuth;

pub const DEFAULT_BASE_URL: &str = "https://api.quickbase.com";
pub const DEFAULT_USER_AGENT: &str = concat!("rowgate/", env!("CARGO_PKG_VERSION"));

/// Knobs recognised by the request engine at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub requests_per_window: u32,
    #[serde(rename = "window_length_ms", with = "duration_ms")]
    pub window_length: Duration,
    pub cache_enabled: bool,
    #[serde(rename = "cache_ttl_seconds", with = "duration_secs")]
    pub cache_ttl: Duration,
    pub max_retries: u32,
    #[serde(rename = "base_retry_delay_ms", with = "duration_ms")]
    pub base_retry_delay: Duration,
    #[serde(rename = "max_retry_delay_ms", with = "duration_ms")]
    pub max_retry_delay: Duration,
    pub backoff_factor: f64,
    pub jitter_fraction: f64,
    #[serde(rename = "per_request_timeout_ms", with = "duration_ms")]
    pub per_request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 10,
            window_length: Duration::from_secs(1),
            cache_enabled: true,
            cache_ttl: Duration::from_secs(300),
            max_retries: 3,
            base_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter_fraction: 0.2,
            per_request_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with any `ROWGATE_*` variables set in the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().overlay(|name| std::env::var(name).ok())
    }

    /// Overlay values produced by `lookup`; absent names keep the current value.
    pub fn overlay<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        if let Some(value) = parse_var::<u32, _>(&lookup, "ROWGATE_REQUESTS_PER_WINDOW")? {
            self.requests_per_window = value;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "ROWGATE_WINDOW_MS")? {
            self.window_length = Duration::from_millis(ms);
        }
        if let Some(value) = parse_var::<bool, _>(&lookup, "ROWGATE_CACHE_ENABLED")? {
            self.cache_enabled = value;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "ROWGATE_CACHE_TTL_SECONDS")? {
            self.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(value) = parse_var::<u32, _>(&lookup, "ROWGATE_MAX_RETRIES")? {
            self.max_retries = value;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "ROWGATE_BASE_RETRY_DELAY_MS")? {
            self.base_retry_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "ROWGATE_MAX_RETRY_DELAY_MS")? {
            self.max_retry_delay = Duration::from_millis(ms);
        }
        if let Some(value) = parse_var::<f64, _>(&lookup, "ROWGATE_BACKOFF_FACTOR")? {
            self.backoff_factor = value;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "ROWGATE_REQUEST_TIMEOUT_MS")? {
            self.per_request_timeout = Duration::from_millis(ms);
        }

        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.requests_per_window == 0 {
            return Err(ConfigError::ZeroRequestsPerWindow);
        }
        if self.window_length.is_zero() {
            return Err(ConfigError::ZeroWindow);
        }
        if self.per_request_timeout.is_zero() {
            return Err(ConfigError::ZeroRequestTimeout);
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ConfigError::InvalidBackoffFactor {
                value: self.backoff_factor.to_string(),
            });
        }
        if !(0.0..1.0).contains(&self.jitter_fraction) {
            return Err(ConfigError::InvalidJitter {
                value: self.jitter_fraction.to_string(),
            });
        }
        if self.base_retry_delay > self.max_retry_delay {
            return Err(ConfigError::RetryDelayOrder {
                base_ms: self.base_retry_delay.as_millis(),
                max_ms: self.max_retry_delay.as_millis(),
            });
        }

        Ok(())
    }
}

/// Where requests go and how they authenticate. Passed through opaquely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub base_url: String,
    pub auth: HttpAuth,
    pub default_headers: BTreeMap<String, String>,
    pub user_agent: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            base_url: String::from(DEFAULT_BASE_URL),
            auth: HttpAuth::None,
            default_headers: BTreeMap::new(),
            user_agent: String::from(DEFAULT_USER_AGENT),
        }
    }
}

impl ConnectionConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Reads `ROWGATE_BASE_URL`, `ROWGATE_REALM_HOSTNAME`, `ROWGATE_USER_TOKEN`
    /// and `ROWGATE_USER_AGENT`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut connection = match lookup("ROWGATE_BASE_URL") {
            Some(base_url) => Self::new(base_url),
            None => Self::default(),
        };
        if let Some(realm) = lookup("ROWGATE_REALM_HOSTNAME") {
            connection = connection.with_header("qb-realm-hostname", realm);
        }
        if let Some(token) = lookup("ROWGATE_USER_TOKEN") {
            connection.auth = HttpAuth::UserToken(token);
        }
        if let Some(user_agent) = lookup("ROWGATE_USER_AGENT") {
            connection.user_agent = user_agent;
        }
        connection
    }

    pub fn with_auth(mut self, auth: HttpAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.starts_with("https://") || self.base_url.starts_with("http://") {
            Ok(())
        } else {
            Err(ConfigError::InvalidBaseUrl {
                value: self.base_url.clone(),
            })
        }
    }
}

/// Bounds for one multi-page fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub starting_skip: u64,
    pub per_page_limit: u64,
    pub record_budget: u64,
    pub max_iterations: u32,
    #[serde(rename = "max_duration_ms", with = "duration_ms")]
    pub max_duration: Duration,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            starting_skip: 0,
            per_page_limit: 1_000,
            record_budget: 1_000,
            max_iterations: 100,
            max_duration: Duration::from_secs(300),
        }
    }
}

impl PaginationConfig {
    pub fn with_budget(record_budget: u64) -> Self {
        Self {
            record_budget,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.per_page_limit == 0 {
            return Err(ConfigError::ZeroPageSize);
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::ZeroIterations);
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&'static str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { name, value: raw }),
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
