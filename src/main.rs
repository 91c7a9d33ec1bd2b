//! GPS recorder service

use std::sync::Arc;

use gps_recorder::api;
use gps_recorder::config::AppConfig;
use gps_recorder::database::Database;
use gps_recorder::errors::GpsRecorderError;
use gps_recorder::server::DeviceServer;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), GpsRecorderError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load configuration, preferring environment variables over config files
    let config = AppConfig::load()?;

    let db = Arc::new(Database::from_config(&config.database).await?);

    let device_server = DeviceServer::bind(&config.server, db.clone()).await?;

    // Setup signal handling for shutdown; open device sessions are dropped
    // abruptly, which the protocol tolerates.
    let shutdown_signal = signal::ctrl_c();

    tokio::select! {
        result = device_server.run() => {
            error!("GPS server exited: {:?}", result);
        }
        result = api::serve(&config.api, db.clone()) => {
            error!("API server exited: {:?}", result);
        }
        _ = shutdown_signal => {
            info!("Received shutdown signal");
        }
    }

    Ok(())
}
