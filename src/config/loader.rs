//! Configuration Loader
//!
//! Environment-aware layered loading on top of the `config` crate. Later
//! layers win:
//!
//! 1. [`PoolConfig::default`]
//! 2. `{config_dir}/workpool.{toml,yaml,json,...}` (optional)
//! 3. `{config_dir}/workpool-{environment}.{toml,yaml,json,...}` (optional)
//! 4. `WORKPOOL__*` environment variables, `__` separating nested keys
//!    (`WORKPOOL__REVIVAL__MAX_ATTEMPTS=10`)

use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::error::{ConfigResult, ConfigurationError};
use super::PoolConfig;

/// Prefix for environment variable overrides
pub const ENV_PREFIX: &str = "WORKPOOL";

/// Loaded, validated pool configuration
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: PoolConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_with_env_prefix(config_dir, environment, ENV_PREFIX)
    }

    /// Same as [`load_from_directory_with_env`](Self::load_from_directory_with_env)
    /// with a custom environment variable prefix
    pub fn load_with_env_prefix(
        config_dir: Option<PathBuf>,
        environment: &str,
        env_prefix: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let config = Self::load_layers(&config_directory, environment, env_prefix)?;
        config.validate()?;

        debug!(
            environment = %environment,
            size = ?config.size,
            stats_interval_ms = config.stats_interval_ms,
            revival_max_attempts = config.revival.max_attempts,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Detect current environment: WORKPOOL_ENV || APP_ENV || 'development'
    pub fn detect_environment() -> String {
        env::var("WORKPOOL_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    /// `WORKPOOL_CONFIG_DIR`, or `./config`
    fn default_config_directory() -> PathBuf {
        env::var("WORKPOOL_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }

    fn load_layers(
        config_directory: &Path,
        environment: &str,
        env_prefix: &str,
    ) -> ConfigResult<PoolConfig> {
        let load_error = |e: config::ConfigError| ConfigurationError::LoadError {
            environment: environment.to_string(),
            error: e.to_string(),
        };

        let defaults = Config::try_from(&PoolConfig::default()).map_err(load_error)?;
        let base = config_directory.join("workpool");
        let overrides = config_directory.join(format!("workpool-{environment}"));

        Config::builder()
            .add_source(defaults)
            .add_source(File::with_name(&base.to_string_lossy()).required(false))
            .add_source(File::with_name(&overrides.to_string_lossy()).required(false))
            .add_source(
                Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(Config::try_deserialize::<PoolConfig>)
            .map_err(load_error)
    }
}
