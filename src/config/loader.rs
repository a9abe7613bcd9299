//! Configuration Loader
//!
//! Layers an optional TOML file under environment overrides and validates the result.
//!
//! Environment overrides use the `TASKER_DISPATCH` prefix and `__` as the section
//! separator, e.g. `TASKER_DISPATCH__RETRY__MAX_RETRIES=5`.

use super::error::{ConfigResult, ConfigurationError};
use super::DispatchConfig;
use config::{Config, Environment, File, FileFormat};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const DEFAULT_CONFIG_PATH: &str = "config/dispatch.toml";
const ENV_PREFIX: &str = "TASKER_DISPATCH";

#[derive(Debug)]
pub struct ConfigManager {
    config: DispatchConfig,
    source_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load from the default location (`config/dispatch.toml`, if present) plus environment
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
        let path = default_path.exists().then_some(default_path);
        Self::build(path.as_deref(), true)
    }

    /// Load from an explicit file, which must exist, plus environment
    pub fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<Arc<ConfigManager>> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigurationError::config_file_not_found(path));
        }
        Self::build(Some(path), true)
    }

    /// Parse a TOML string without consulting the environment (useful for tests)
    pub fn from_toml_str(contents: &str) -> ConfigResult<Arc<ConfigManager>> {
        let settings = Config::builder()
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()
            .map_err(ConfigurationError::load_error)?;
        Self::finish(settings, None)
    }

    fn build(path: Option<&Path>, with_env: bool) -> ConfigResult<Arc<ConfigManager>> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            debug!(path = %path.display(), "Loading dispatch configuration file");
            builder = builder.add_source(File::from(path.to_path_buf()));
        }
        if with_env {
            builder = builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let settings = builder.build().map_err(ConfigurationError::load_error)?;
        Self::finish(settings, path.map(Path::to_path_buf))
    }

    fn finish(settings: Config, source_path: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let config: DispatchConfig = settings
            .try_deserialize()
            .map_err(ConfigurationError::deserialize_error)?;
        config.validate()?;

        info!(
            source = source_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "defaults".to_string()),
            max_retries = config.retry.max_retries,
            cache_provider = ?config.cache.provider,
            "Dispatch configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            source_path,
        }))
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }
}
