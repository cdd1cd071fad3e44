use crate::models::TuneConfig;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashMap;
use std::fs;

/// Name of the configuration file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "decktune.yaml";

/// Prefix of environment overrides, e.g. `DECKTUNE__SWAP__DEFAULT_SIZE_GB=2`.
pub const ENV_PREFIX: &str = "DECKTUNE";

/// Configuration manager for loading and saving `decktune.yaml`.
///
/// Values are layered, later sources winning:
/// - built-in defaults
/// - `decktune.yaml` in the config directory (optional)
/// - `DECKTUNE__<SECTION>__<KEY>` environment variables
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    config_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager, creating `config_dir` if needed.
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            config_path: config_dir.join(CONFIG_FILE_NAME),
            config_dir,
        })
    }

    /// Load the layered configuration.
    pub fn load(&self) -> Result<TuneConfig> {
        self.load_with_env(None)
    }

    /// Load with an explicit environment map in place of the process
    /// environment.
    pub fn load_with_env(&self, env: Option<HashMap<String, String>>) -> Result<TuneConfig> {
        if !self.config_path.exists() {
            tracing::warn!(
                "Config file not found at {}, using defaults",
                self.config_path
            );
        }

        let defaults = config::Config::try_from(&TuneConfig::default())
            .context("Failed to build default configuration")?;

        let settings = config::Config::builder()
            .add_source(defaults)
            .add_source(
                config::File::from(self.config_path.as_std_path())
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .with_context(|| format!("Failed to read config: {}", self.config_path))?;

        let config: TuneConfig = settings
            .try_deserialize()
            .with_context(|| format!("Failed to parse config: {}", self.config_path))?;

        tracing::info!("Loaded config from {}", self.config_dir);
        Ok(config)
    }

    /// Save `config` as YAML.
    pub fn save(&self, config: &TuneConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize config to YAML")?;

        fs::write(&self.config_path, yaml_string)
            .with_context(|| format!("Failed to write config: {}", self.config_path))?;

        tracing::info!("Saved config to {}", self.config_path);
        Ok(())
    }

    /// Write the default configuration unless a file already exists.
    /// Returns whether a file was written.
    pub fn write_default_if_missing(&self) -> Result<bool> {
        if self.config_path.exists() {
            return Ok(false);
        }
        self.save(&TuneConfig::default())?;
        Ok(true)
    }

    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn config_path(&self) -> &Utf8Path {
        &self.config_path
    }
}
