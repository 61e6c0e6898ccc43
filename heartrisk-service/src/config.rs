use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use heartrisk_assistant::AssistantConfig;
use serde::Deserialize;

use crate::error::StartupError;

/// Section of the configuration file holding the service configuration.
const CONFIG_SECTION: &str = "heartrisk_service";
/// Prefix of the environment variables overriding the configuration file.
const ENV_PREFIX: &str = "HEARTRISK_SERVICE";
/// Name of the environment variable holding the assistant API key.
pub const ASSISTANT_API_KEY_ENV: &str = "HEARTRISK_ASSISTANT_API_KEY";

fn default_model_artifact_path() -> PathBuf {
    PathBuf::from("heart_model.json")
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://127.0.0.1:3000".to_string(),
        "http://192.168.1.7:8081".to_string(),
    ]
}

/// Configuration for the heart risk service.
#[derive(Clone, Debug, Deserialize)]
pub struct HeartRiskServiceConfig {
    /// Bind address for the service, e.g. "0.0.0.0:8000"
    pub service_bind_address: String,

    /// Path of the fitted model artifact, loaded once at startup.
    #[serde(default = "default_model_artifact_path")]
    pub model_artifact_path: PathBuf,

    /// Origins allowed to call the service from a browser. `*` allows any origin.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    /// External text-generation endpoint used by `/chat`.
    pub assistant: AssistantConfig,
}

impl HeartRiskServiceConfig {
    /// Creates a new `HeartRiskServiceConfig` instance from a configuration file.
    ///
    /// The file should be in a format supported by the `config` crate (e.g. YAML, JSON,
    /// TOML) and contain a "heartrisk_service" section. Every value can be overridden
    /// from the environment, e.g. `HEARTRISK_SERVICE__SERVICE_BIND_ADDRESS` or
    /// `HEARTRISK_SERVICE__ASSISTANT__ENDPOINT_URL`; `allowed_origins` accepts a
    /// comma separated list.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read or parsed, or if a required
    /// value is missing.
    pub fn from_file_path<P: AsRef<Path>>(config_file_path: P) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::from(config_file_path.as_ref()))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .keep_prefix(true)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("heartrisk_service.allowed_origins"),
            );
        let config = builder.build()?;
        config.get::<Self>(CONFIG_SECTION)
    }

    /// Loads the configuration the service starts with.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError::Config`] if [`Self::from_file_path`] fails.
    pub fn load<P: AsRef<Path>>(config_file_path: P) -> Result<Self, StartupError> {
        Ok(Self::from_file_path(config_file_path)?)
    }

    /// Whether any origin may call the service.
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|origin| origin == "*")
    }
}
