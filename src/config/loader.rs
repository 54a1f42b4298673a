//! Configuration Loader
//!
//! Environment-aware layering on top of the `config` crate:
//!
//! 1. `<dir>/pipeline.yaml` (optional)
//! 2. `<dir>/pipeline.<environment>.yaml` (optional)
//! 3. `PIPELINE__SECTION__KEY` environment variables
//!
//! Later layers override earlier ones key by key.

use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::PipelineConfig;

const ENV_PREFIX: &str = "PIPELINE";
const ENV_SEPARATOR: &str = "__";
const BASE_FILE: &str = "pipeline";

/// Loaded, validated configuration plus where it came from
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: PipelineConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection from `./config`
    pub fn load() -> ConfigResult<ConfigManager> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<ConfigManager> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration with an explicit environment.
    ///
    /// Useful in tests, which should not mutate process-wide environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<ConfigManager> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            environment,
            directory = %config_directory.display(),
            "Loading pipeline configuration"
        );

        let mut config = Self::build(&config_directory, environment)?;
        config.environment = environment.to_string();
        config.validate()?;

        let sanitized = config.sanitized();
        info!(
            environment,
            database_url = %sanitized.database.url,
            broker_url = %sanitized.broker.base_url,
            continuation = ?sanitized.continuation,
            "⚙️ Configuration loaded successfully"
        );

        Ok(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        })
    }

    fn build(config_directory: &Path, environment: &str) -> ConfigResult<PipelineConfig> {
        let base = config_directory.join(format!("{BASE_FILE}.yaml"));
        let overrides = config_directory.join(format!("{BASE_FILE}.{environment}.yaml"));

        let settings = Config::builder()
            .add_source(
                File::from(base)
                    .format(FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                File::from(overrides)
                    .format(FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::load_error(environment, e))?;

        settings
            .try_deserialize::<PipelineConfig>()
            .map_err(ConfigurationError::deserialize_error)
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn into_config(self) -> PipelineConfig {
        self.config
    }

    /// Get the current environment
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Get the configuration directory
    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// `PIPELINE_ENV`, then `APP_ENV`, then `development`
    pub fn detect_environment() -> String {
        env::var("PIPELINE_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }
}
