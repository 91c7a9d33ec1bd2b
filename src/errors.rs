//! Errors for the GPS recorder
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GpsRecorderError {
    #[error("Configuration error")]
    ConfigError(#[from] config::ConfigError),

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("IO error")]
    IoError(#[from] std::io::Error),

    #[error("Connection closed before a device identifier was received")]
    NoIdentity,

    #[error("Invalid device identifier: {0}")]
    InvalidDeviceId(String),

    #[error("Frame decode error")]
    DecodeError(#[from] crate::avl::DecodeError),

    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Database migration error")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
}
