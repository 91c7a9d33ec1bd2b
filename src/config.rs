//! Application configuration

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_with::serde_as;

use crate::errors::GpsRecorderError;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub api: ApiConfig,
    pub database: DatabaseConfig,
}

/// Device-facing TCP listener settings.
#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Sessions whose devices stay silent this long are closed.
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub idle_timeout: Duration,
}

/// HTTP read API listener settings.
#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(
                Environment::with_prefix("GPSRECORDER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl ServerConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), GpsRecorderError> {
        if self.idle_timeout.is_zero() {
            return Err(GpsRecorderError::ConfigurationError {
                message: "Idle timeout must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl DatabaseConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), GpsRecorderError> {
        if self.url.is_empty() {
            return Err(GpsRecorderError::ConfigurationError {
                message: "Database URL cannot be empty".to_string(),
            });
        }
        Ok(())
    }
}
