// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use crate::batcher::BatcherConfig;
use crate::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL, DEFAULT_LIFETIME, DEFAULT_LOG_TYPE,
};
use crate::errors::ConfigError;
use crate::shipper::ShipperConfig;
use crate::signer::validate_shared_key;

/// Settings for one relay process.
#[derive(Clone)]
pub struct RelayConfig {
    /// Log Analytics workspace identifier
    pub workspace_id: String,
    /// Base64 workspace shared key
    pub shared_key: String,
    /// `Log-Type` under which records are ingested
    pub log_type: String,
    /// Records per batch
    pub batch_size: usize,
    /// Interval flush period; zero disables it
    pub flush_interval: Duration,
    /// How long to consume before shutting down; zero runs until interrupted
    pub lifetime: Duration,
    /// Ingestion URL override
    pub endpoint: Option<String>,
    /// Per-request timeout, reqwest default when unset
    pub timeout: Option<Duration>,
    pub https_proxy: Option<String>,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            workspace_id: String::new(),
            shared_key: String::new(),
            log_type: DEFAULT_LOG_TYPE.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            lifetime: DEFAULT_LIFETIME,
            endpoint: None,
            timeout: None,
            https_proxy: None,
            log_level: "info".to_string(),
        }
    }
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("workspace_id", &self.workspace_id)
            .field("log_type", &self.log_type)
            .field("batch_size", &self.batch_size)
            .field("flush_interval", &self.flush_interval)
            .field("lifetime", &self.lifetime)
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .field("https_proxy", &self.https_proxy)
            .field("log_level", &self.log_level)
            .finish_non_exhaustive()
    }
}

impl RelayConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let workspace_id = non_empty("AZURE_LOG_WORKSPACE_ID")
            .ok_or(ConfigError::Missing("AZURE_LOG_WORKSPACE_ID"))?;
        let shared_key = non_empty("AZURE_LOG_SHARED_KEY")
            .ok_or(ConfigError::Missing("AZURE_LOG_SHARED_KEY"))?;
        let log_type = non_empty("AZURE_LOG_TYPE").unwrap_or(defaults.log_type);
        let batch_size = match non_empty("AZURE_LOG_BATCH_SIZE") {
            Some(val) => parse_number("AZURE_LOG_BATCH_SIZE", &val)?,
            None => defaults.batch_size,
        };
        let flush_interval = match non_empty("AZURE_LOG_FLUSH_INTERVAL_SECS") {
            Some(val) => Duration::from_secs(parse_number("AZURE_LOG_FLUSH_INTERVAL_SECS", &val)?),
            None => defaults.flush_interval,
        };
        let lifetime = match non_empty("AZURE_LOG_LIFETIME_SECS") {
            Some(val) => Duration::from_secs(parse_number("AZURE_LOG_LIFETIME_SECS", &val)?),
            None => defaults.lifetime,
        };
        let timeout = match non_empty("AZURE_LOG_TIMEOUT_SECS") {
            Some(val) => Some(Duration::from_secs(parse_number(
                "AZURE_LOG_TIMEOUT_SECS",
                &val,
            )?)),
            None => None,
        };
        let endpoint = non_empty("AZURE_LOG_ENDPOINT");
        let https_proxy = non_empty("AZURE_LOG_HTTPS_PROXY").or_else(|| non_empty("HTTPS_PROXY"));
        let log_level = non_empty("AZURE_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.log_level);

        let config = Self {
            workspace_id,
            shared_key,
            log_type,
            batch_size,
            flush_interval,
            lifetime,
            endpoint,
            timeout,
            https_proxy,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workspace_id.trim().is_empty() {
            return Err(ConfigError::Missing("AZURE_LOG_WORKSPACE_ID"));
        }

        validate_shared_key(&self.shared_key)?;

        if self.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "batch size must be greater than 0".to_string(),
            ));
        }

        if self.log_type.is_empty()
            || !self
                .log_type
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigError::Invalid(format!(
                "log type '{}' must contain only letters, numbers and underscores",
                self.log_type
            )));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    pub fn batcher_config(&self) -> BatcherConfig {
        BatcherConfig {
            batch_size: self.batch_size,
            flush_interval: self.flush_interval,
            log_type: self.log_type.clone(),
        }
    }

    pub fn shipper_config(&self) -> ShipperConfig {
        ShipperConfig {
            workspace_id: self.workspace_id.clone(),
            shared_key: self.shared_key.clone(),
            endpoint: self.endpoint.clone(),
            https_proxy: self.https_proxy.clone(),
            timeout: self.timeout,
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::Invalid(format!("{key} must be a non-negative integer, got '{value}'")))
}
