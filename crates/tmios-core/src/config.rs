/*!
 * Configuration management for tmios.
 *
 * This module loads the layered process configuration: compiled-in defaults,
 * an optional configuration file, then prefixed environment variables.
 */
use std::collections::HashMap;
use std::path::Path;

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::types::Value;

/// Core configuration for tmios
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General configuration
    #[serde(default)]
    pub general: GeneralConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Device runtime configuration
    #[serde(default)]
    pub devices: DevicesConfig,

    /// Interval scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Application environment (development, production, etc.)
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter (trace, debug, info, warn, error or a full directive)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to use JSON format for logs
    #[serde(default)]
    pub json_format: bool,

    /// Whether to include the event target in log lines
    #[serde(default = "default_true")]
    pub with_target: bool,
}

/// Device runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicesConfig {
    /// Default debug mode for new device instances
    #[serde(default)]
    pub debug_mode: bool,

    /// Prefix of every storage key written on commit
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Expiry of the keep-alive key written by a keep-alive commit, in seconds
    #[serde(default = "default_keep_alive_ttl_secs")]
    pub keep_alive_ttl_secs: u64,

    /// Initial entries of the registry environment store.
    ///
    /// Keys are lowercased by the configuration loader.
    #[serde(default)]
    pub env: HashMap<String, Value>,
}

/// Interval scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether interval tasks are scheduled at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Shortest period accepted for an interval task, in seconds
    #[serde(default = "default_min_period_secs")]
    pub min_period_secs: u64,

    /// Upper bound for a single interval run in milliseconds (0 means no bound)
    #[serde(default)]
    pub task_timeout_ms: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            environment: default_environment(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            with_target: true,
        }
    }
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            debug_mode: false,
            key_prefix: default_key_prefix(),
            keep_alive_ttl_secs: default_keep_alive_ttl_secs(),
            env: HashMap::new(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_period_secs: default_min_period_secs(),
            task_timeout_ms: 0,
        }
    }
}

fn default_app_name() -> String {
    "tmios".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_key_prefix() -> String {
    "tmios".to_string()
}

fn default_keep_alive_ttl_secs() -> u64 {
    120
}

fn default_min_period_secs() -> u64 {
    1
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Render the configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// A builder for creating a configuration
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_file: Option<String>,
    environment_prefix: Option<String>,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the config file path
    pub fn with_config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Set the environment variable prefix for configuration
    pub fn with_environment_prefix<S: AsRef<str>>(mut self, prefix: S) -> Self {
        self.environment_prefix = Some(prefix.as_ref().to_string());
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<Config> {
        let mut config_builder = ConfigLib::builder();

        let default_config = Config::default();
        config_builder = config_builder.add_source(
            ConfigLib::try_from(&default_config)
                .map_err(|e| Error::config(format!("Failed to create default config: {}", e)))?,
        );

        if let Some(config_file) = self.config_file {
            let path = Path::new(&config_file);
            if path.exists() {
                debug!("Loading configuration from {}", config_file);
                config_builder = config_builder.add_source(File::with_name(&config_file));
            } else {
                debug!("Configuration file {} does not exist, using defaults", config_file);
            }
        }

        if let Some(prefix) = self.environment_prefix {
            debug!("Loading configuration from environment variables with prefix {}", prefix);
            config_builder = config_builder.add_source(
                Environment::with_prefix(&prefix)
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config_lib = config_builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build configuration: {}", e)))?;

        let config: Config = config_lib
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize configuration: {}", e)))?;

        info!("Configuration loaded successfully");
        Ok(config)
    }
}
