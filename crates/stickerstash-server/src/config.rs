//! Service Configuration
//!
//! Every setting has a default and an environment variable override. Values
//! are read once at startup; `.env` files are loaded by `main` before this
//! runs.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use stickerstash_core::store::etcd::ConnectBackoff;
use stickerstash_core::{Capacity, IngestLimits};
use strum::{Display, EnumString};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Content store backend selection (env: STORE)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum StoreBackend {
    Etcd,
    Memory,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Backend (env: STORE)
    pub backend: StoreBackend,
    /// Etcd endpoints (env: ETCD_ENDPOINTS, comma-separated)
    pub etcd_endpoints: Vec<String>,
    /// Prefix of every key written (env: STORE_PREFIX)
    pub prefix: String,
    pub connect_backoff: ConnectBackoff,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Etcd,
            etcd_endpoints: vec!["http://127.0.0.1:2379".to_string()],
            prefix: "/stickerstash/".to_string(),
            connect_backoff: ConnectBackoff::default(),
        }
    }
}

/// Configuration of the bot and statistics API
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Bot API token (env: BOT_TOKEN, required)
    pub bot_token: String,
    /// Bot API base URL (env: TELEGRAM_API_URL)
    pub telegram_api_url: String,
    pub store: StoreConfig,
    /// Statistics API listen address (env: BIND_ADDR)
    pub bind_addr: SocketAddr,
    /// Localization catalogue (env: LOCALIZATION_PATH)
    pub localization_path: PathBuf,
    /// Language used until a user picks one (env: DEFAULT_LANGUAGE)
    pub default_language: String,
    /// Enables /chatid, /profile and /stop (env: DEBUG_COMMANDS)
    pub debug_commands: bool,
    /// Volume ceilings (env: ANIMATED_CAPACITY, STATIC_CAPACITY)
    pub capacity: Capacity,
    /// Download and conversion bounds (env: MAX_INPUT_BYTES, MAX_DIMENSION)
    pub limits: IngestLimits,
    /// Long-poll timeout for getUpdates (env: POLL_TIMEOUT_SECS)
    pub poll_timeout: Duration,
    /// Timeout of every other Bot API request
    pub request_timeout: Duration,
    /// Pipeline re-runs after a capacity race (env: CAPACITY_RACE_RETRIES)
    pub capacity_race_retries: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            telegram_api_url: "https://api.telegram.org".to_string(),
            store: StoreConfig::default(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 4000)),
            localization_path: PathBuf::from("./localization.toml"),
            default_language: "en".to_string(),
            debug_commands: false,
            capacity: Capacity::default(),
            limits: IngestLimits::default(),
            poll_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            capacity_race_retries: 1,
        }
    }
}

fn parse<T: FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::Invalid { name, value })
}

fn parse_flag(name: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::Invalid { name, value }),
    }
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(backend) = lookup("STORE") {
            config.backend = parse("STORE", backend)?;
        }

        if let Some(endpoints) = lookup("ETCD_ENDPOINTS") {
            config.etcd_endpoints = endpoints
                .split(',')
                .map(str::trim)
                .filter(|endpoint| !endpoint.is_empty())
                .map(String::from)
                .collect();
            if config.etcd_endpoints.is_empty() {
                return Err(ConfigError::Invalid {
                    name: "ETCD_ENDPOINTS",
                    value: endpoints,
                });
            }
        }

        if let Some(prefix) = lookup("STORE_PREFIX") {
            config.prefix = prefix;
        }

        Ok(config)
    }
}

impl ServiceConfig {
    /// Create configuration from environment variables with defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self {
            store: StoreConfig::from_lookup(&lookup)?,
            ..Self::default()
        };

        config.bot_token = lookup("BOT_TOKEN")
            .filter(|token| !token.trim().is_empty())
            .ok_or(ConfigError::Missing("BOT_TOKEN"))?;

        if let Some(url) = lookup("TELEGRAM_API_URL") {
            config.telegram_api_url = url.trim_end_matches('/').to_string();
        }
        if let Some(addr) = lookup("BIND_ADDR") {
            config.bind_addr = parse("BIND_ADDR", addr)?;
        }
        if let Some(path) = lookup("LOCALIZATION_PATH") {
            config.localization_path = PathBuf::from(path);
        }
        if let Some(language) = lookup("DEFAULT_LANGUAGE") {
            config.default_language = language;
        }
        if let Some(flag) = lookup("DEBUG_COMMANDS") {
            config.debug_commands = parse_flag("DEBUG_COMMANDS", flag)?;
        }
        if let Some(value) = lookup("ANIMATED_CAPACITY") {
            config.capacity.animated = parse("ANIMATED_CAPACITY", value)?;
        }
        if let Some(value) = lookup("STATIC_CAPACITY") {
            config.capacity.static_ = parse("STATIC_CAPACITY", value)?;
        }
        if let Some(value) = lookup("MAX_INPUT_BYTES") {
            config.limits.max_input_bytes = parse("MAX_INPUT_BYTES", value)?;
        }
        if let Some(value) = lookup("MAX_DIMENSION") {
            config.limits.max_dimension = parse("MAX_DIMENSION", value)?;
        }
        if let Some(value) = lookup("POLL_TIMEOUT_SECS") {
            config.poll_timeout = Duration::from_secs(parse("POLL_TIMEOUT_SECS", value)?);
        }
        if let Some(value) = lookup("CAPACITY_RACE_RETRIES") {
            config.capacity_race_retries = parse("CAPACITY_RACE_RETRIES", value)?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::from_lookup(lookup(&[("BOT_TOKEN", "123:abc")])).unwrap();
        assert_eq!(config.bot_token, "123:abc");
        assert_eq!(config.telegram_api_url, "https://api.telegram.org");
        assert_eq!(config.store.backend, StoreBackend::Etcd);
        assert_eq!(config.store.prefix, "/stickerstash/");
        assert_eq!(config.bind_addr.port(), 4000);
        assert_eq!(config.capacity, Capacity::default());
        assert_eq!(config.limits.max_input_bytes, 524_288);
        assert_eq!(config.limits.max_dimension, 512);
        assert_eq!(config.poll_timeout, Duration::from_secs(30));
        assert_eq!(config.capacity_race_retries, 1);
        assert!(!config.debug_commands);
    }

    #[test]
    fn test_token_is_required() {
        assert!(matches!(
            ServiceConfig::from_lookup(lookup(&[])),
            Err(ConfigError::Missing("BOT_TOKEN"))
        ));
    }

    #[test]
    fn test_overrides() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("BOT_TOKEN", "t"),
            ("STORE", "memory"),
            ("ETCD_ENDPOINTS", "http://a:2379, http://b:2379"),
            ("TELEGRAM_API_URL", "http://localhost:8081/"),
            ("DEBUG_COMMANDS", "true"),
            ("STATIC_CAPACITY", "100"),
            ("MAX_INPUT_BYTES", "1024"),
        ]))
        .unwrap();

        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(
            config.store.etcd_endpoints,
            vec!["http://a:2379".to_string(), "http://b:2379".to_string()]
        );
        assert_eq!(config.telegram_api_url, "http://localhost:8081");
        assert!(config.debug_commands);
        assert_eq!(config.capacity.static_, 100);
        assert_eq!(config.capacity.animated, 50);
        assert_eq!(config.limits.max_input_bytes, 1024);
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let err = ServiceConfig::from_lookup(lookup(&[("BOT_TOKEN", "t"), ("BIND_ADDR", "nope")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "BIND_ADDR", .. }));

        let err = StoreConfig::from_lookup(lookup(&[("STORE", "redis")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "STORE", .. }));
    }
}
