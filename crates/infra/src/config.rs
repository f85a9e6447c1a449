//! Configuration loading and representation.
//!
//! Values come from `SHOPPING_*` environment variables; anything unset falls back
//! to the defaults below.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use shopping_auth::{HashingParams, MAX_SALT_LENGTH, MIN_SALT_LENGTH};
use shopping_observability::{LogConfig, LogFormat};

pub const ENV_SALT_LENGTH: &str = "SHOPPING_SALT_LENGTH";
pub const ENV_HASH_MEMORY_KIB: &str = "SHOPPING_HASH_MEMORY_KIB";
pub const ENV_HASH_ITERATIONS: &str = "SHOPPING_HASH_ITERATIONS";
pub const ENV_HASH_PARALLELISM: &str = "SHOPPING_HASH_PARALLELISM";
pub const ENV_LOG_FILTER: &str = "SHOPPING_LOG_FILTER";
pub const ENV_LOG_FORMAT: &str = "SHOPPING_LOG_FORMAT";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Credential sealing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub salt_length: usize,
    pub hashing: HashingParams,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            salt_length: 16,
            hashing: HashingParams::default(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopConfig {
    pub credentials: CredentialConfig,
    pub log: LogConfig,
}

impl ShopConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve variable names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ShopConfig::default();

        if let Some(v) = parse::<usize, _>(&lookup, ENV_SALT_LENGTH)? {
            if !(MIN_SALT_LENGTH..=MAX_SALT_LENGTH).contains(&v) {
                return Err(ConfigError::Invalid {
                    key: ENV_SALT_LENGTH,
                    reason: format!("must be within {MIN_SALT_LENGTH}..={MAX_SALT_LENGTH}"),
                });
            }
            config.credentials.salt_length = v;
        }
        if let Some(v) = parse(&lookup, ENV_HASH_MEMORY_KIB)? {
            config.credentials.hashing.memory_kib = v;
        }
        if let Some(v) = parse(&lookup, ENV_HASH_ITERATIONS)? {
            config.credentials.hashing.iterations = v;
        }
        if let Some(v) = parse(&lookup, ENV_HASH_PARALLELISM)? {
            config.credentials.hashing.parallelism = v;
        }

        if let Some(filter) = lookup(ENV_LOG_FILTER) {
            if filter.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    key: ENV_LOG_FILTER,
                    reason: "cannot be empty".to_string(),
                });
            }
            config.log.filter = filter;
        }
        if let Some(v) = parse::<LogFormat, _>(&lookup, ENV_LOG_FORMAT)? {
            config.log.format = v;
        }

        Ok(config)
    }

    /// Install the process-wide tracing subscriber described by `self.log`.
    pub fn init_logging(&self) {
        shopping_observability::init(&self.log);
    }
}

fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                key,
                reason: e.to_string(),
            })
        })
        .transpose()
}
