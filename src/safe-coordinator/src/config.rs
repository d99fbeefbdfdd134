//! Flat key/value process configuration, loaded once at startup.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::{Address, FixedBytes};
use thiserror::Error;

use crate::collector::PollPolicy;
use crate::permission::PermissionPolicy;

pub const DEFAULT_SERVICE_URL: &str = "https://safe-transaction-sepolia.safe.global";

const REQUIRED_KEYS: [&str; 4] = ["RPC_URL", "SAFE_ADDRESS", "BOT_PRIVATE_KEY", "AUTH_ADDRESS"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("invalid {key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// A string that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    pub rpc_url: String,
    pub safe_address: Address,
    pub bot_private_key: Secret,
    pub auth_address: Address,
    pub service_url: String,
    /// `None` means ask the RPC endpoint.
    pub chain_id: Option<u64>,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    pub max_consecutive_errors: u32,
    pub poll_deadline: Option<Duration>,
    pub rpc_timeout: Duration,
    pub service_timeout: Duration,
    pub receipt_timeout: Duration,
    /// Threshold the collector waits for; execution always re-reads the on-chain value.
    pub threshold_override: Option<u64>,
    pub permission_selector: FixedBytes<4>,
    pub permission_policy: PermissionPolicy,
    pub auto_grant_permission: bool,
    pub execution_retries: u32,
    pub verify_hash_onchain: bool,
    pub config_cache_ttl: Duration,
}

impl CoordinatorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. Missing required keys are reported together.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let missing: Vec<&'static str> = REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|key| get(*key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(vec![key]));

        let config = Self {
            rpc_url: required("RPC_URL")?,
            safe_address: parse_key("SAFE_ADDRESS", &required("SAFE_ADDRESS")?)?,
            bot_private_key: Secret::new(required("BOT_PRIVATE_KEY")?),
            auth_address: parse_key("AUTH_ADDRESS", &required("AUTH_ADDRESS")?)?,
            service_url: get("SERVICE_URL")
                .unwrap_or_else(|| DEFAULT_SERVICE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            chain_id: optional(&get, "CHAIN_ID")?,
            poll_interval: Duration::from_millis(optional(&get, "POLL_INTERVAL_MS")?.unwrap_or(5_000)),
            max_poll_attempts: optional(&get, "MAX_POLL_ATTEMPTS")?.unwrap_or(120),
            max_consecutive_errors: optional(&get, "MAX_CONSECUTIVE_ERRORS")?.unwrap_or(5),
            poll_deadline: optional(&get, "POLL_DEADLINE_SECS")?.map(Duration::from_secs),
            rpc_timeout: Duration::from_millis(optional(&get, "RPC_TIMEOUT_MS")?.unwrap_or(15_000)),
            service_timeout: Duration::from_millis(
                optional(&get, "SERVICE_TIMEOUT_MS")?.unwrap_or(10_000),
            ),
            receipt_timeout: Duration::from_secs(
                optional(&get, "RECEIPT_TIMEOUT_SECS")?.unwrap_or(180),
            ),
            threshold_override: optional(&get, "SAFE_THRESHOLD")?,
            permission_selector: match get("PERMISSION_SELECTOR") {
                Some(raw) => parse_key("PERMISSION_SELECTOR", &raw)?,
                None => FixedBytes::ZERO,
            },
            permission_policy: if parse_flag(&get, "PERMISSION_FAIL_OPEN")? {
                PermissionPolicy::FailOpen
            } else {
                PermissionPolicy::FailClosed
            },
            auto_grant_permission: parse_flag(&get, "AUTO_GRANT_PERMISSION")?,
            execution_retries: optional(&get, "EXECUTION_RETRIES")?.unwrap_or(3),
            verify_hash_onchain: parse_flag(&get, "VERIFY_HASH_ONCHAIN")?,
            config_cache_ttl: Duration::from_secs(
                optional(&get, "CONFIG_CACHE_TTL_SECS")?.unwrap_or(30),
            ),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(invalid("POLL_INTERVAL_MS", "0", "must be positive"));
        }
        if self.max_poll_attempts == 0 {
            return Err(invalid("MAX_POLL_ATTEMPTS", "0", "must be at least 1"));
        }
        if self.max_consecutive_errors == 0 {
            return Err(invalid("MAX_CONSECUTIVE_ERRORS", "0", "must be at least 1"));
        }
        if self.threshold_override == Some(0) {
            return Err(invalid("SAFE_THRESHOLD", "0", "must be at least 1"));
        }
        if let Some(deadline) = self.poll_deadline {
            if deadline <= self.service_timeout {
                return Err(invalid(
                    "POLL_DEADLINE_SECS",
                    &deadline.as_secs().to_string(),
                    "must exceed SERVICE_TIMEOUT_MS",
                ));
            }
        }
        Ok(())
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: self.poll_interval,
            max_attempts: self.max_poll_attempts,
            max_consecutive_errors: self.max_consecutive_errors,
            fetch_timeout: self.service_timeout,
            deadline: self.poll_deadline,
        }
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_key<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| invalid(key, raw, &e.to_string()))
}

fn optional<T, G>(get: &G, key: &'static str) -> Result<Option<T>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    get(key).map(|raw| parse_key(key, &raw)).transpose()
}

fn parse_flag<G>(get: &G, key: &'static str) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(invalid(key, &v, "expected a boolean")),
        },
    }
}
