// Configuration Management
//
// This crate handles all configuration loading for the client login service.
// It provides:
// - Configuration structs and deserialization
// - File loading logic
// - Default configuration values and legacy provider key normalization
//
// This keeps configuration concerns separate from the session engine.

use std::path::Path;
use thiserror::Error;

pub mod types;

// Re-export all configuration types
pub use types::*;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found. Tried paths: {paths}")]
    FileNotFound { paths: String },

    #[error("Failed to read configuration file: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {source}")]
    ParseError {
        #[from]
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration loading interface
impl ApiConfig {
    /// Load configuration from YAML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML document
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut config: ApiConfig = serde_yaml::from_str(content)?;

        // Database settings in the environment win over the file
        if let Ok(database) = DatabaseConfig::from_env() {
            config.database = Some(database);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        // Try different config locations in order
        let config_paths = ["config/config.yaml", "config.yaml", "config/default.yaml"];

        for path in &config_paths {
            if std::path::Path::new(path).exists() {
                return Self::load_from_file(path);
            }
        }

        // If no config file found, fail with descriptive error
        Err(ConfigError::FileNotFound {
            paths: config_paths.join(", "),
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.basepath.trim_matches('/').is_empty() {
            return Err(ConfigError::Invalid("basepath must not be empty".to_string()));
        }
        if self.auth.login_expiry == 0 {
            return Err(ConfigError::Invalid(
                "login_expiry must be at least one day".to_string(),
            ));
        }
        for provider in self.auth.provider_configs() {
            if provider.enabled && provider.name != PASSWORD_PROVIDER && provider.client_id.is_empty()
            {
                return Err(ConfigError::Invalid(format!(
                    "provider {} is enabled but has no clientId",
                    provider.name
                )));
            }
        }
        Ok(())
    }
}
