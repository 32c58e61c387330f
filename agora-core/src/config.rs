//! Configuration for the coordination core

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AgoraError, Result};

/// Main configuration consumed by the coordination core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Maximum token budget for one conversation's history. History is
    /// trimmed to fit after every append when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_history_tokens: Option<usize>,

    /// Default model identifier; selects token-cost estimation behavior
    pub model: String,

    /// Ceiling on the slowest legitimate operation, normally the external
    /// API call timeout
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,

    /// Grace period past the operation timeout before a held lock counts
    /// as abandoned
    #[serde(with = "humantime_serde")]
    pub recovery_buffer: Duration,

    /// How often the watchdog scans for stuck locks
    #[serde(with = "humantime_serde")]
    pub watchdog_interval: Duration,

    /// Conversations idle longer than this are evicted from memory; never
    /// applied while a conversation is processing
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub idle_max_age: Option<Duration>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_history_tokens: None,
            model: "gpt-4o".to_string(),
            operation_timeout: Duration::from_secs(120),
            recovery_buffer: Duration::from_secs(30),
            watchdog_interval: Duration::from_secs(30),
            idle_max_age: Some(Duration::from_secs(6 * 60 * 60)),
        }
    }
}

impl CoreConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. Configuration file (`agora.toml` or path from `AGORA_CONFIG_PATH`)
    /// 3. `AGORA_*` environment variable overrides
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is invalid or a value
    /// fails validation.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file("agora.toml"))
            .merge(Env::prefixed("AGORA_"));

        if let Ok(path) = std::env::var("AGORA_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: Self = figment.extract().map_err(|e| {
            AgoraError::Configuration(format!("failed to load configuration: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, with defaults for any
    /// field the file omits.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| {
                AgoraError::Configuration(format!("failed to load configuration file: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<()> {
        if self.operation_timeout.is_zero() {
            return Err(AgoraError::Configuration(
                "operation_timeout must be nonzero".to_string(),
            ));
        }
        if self.watchdog_interval.is_zero() {
            return Err(AgoraError::Configuration(
                "watchdog_interval must be nonzero".to_string(),
            ));
        }
        if self.max_history_tokens == Some(0) {
            return Err(AgoraError::Configuration(
                "max_history_tokens must be nonzero when set".to_string(),
            ));
        }
        Ok(())
    }

    /// The watchdog-facing slice of this configuration
    pub fn watchdog(&self) -> WatchdogConfig {
        WatchdogConfig {
            scan_interval: self.watchdog_interval,
            operation_timeout: self.operation_timeout,
            recovery_buffer: self.recovery_buffer,
            idle_max_age: self.idle_max_age,
        }
    }
}

/// Configuration slice consumed by the watchdog loop
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// How often the loop scans for stuck locks
    pub scan_interval: Duration,
    /// Ceiling on the slowest legitimate operation
    pub operation_timeout: Duration,
    /// Grace period before a held lock counts as abandoned
    pub recovery_buffer: Duration,
    /// Idle age past which conversations are reaped, when set
    pub idle_max_age: Option<Duration>,
}
