//! TCP listener for device connections.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::errors::GpsRecorderError;
use crate::session::{LocationSink, Session};

/// Accepts device connections and runs one [`Session`] per connection.
///
/// All connection parameters come from the [`ServerConfig`] handed in at
/// construction; nothing is read from ambient process state.
pub struct DeviceServer {
    listener: TcpListener,
    sink: Arc<dyn LocationSink>,
    idle_timeout: Duration,
}

impl DeviceServer {
    /// Bind the listening socket.
    pub async fn bind(
        config: &ServerConfig,
        sink: Arc<dyn LocationSink>,
    ) -> Result<Self, GpsRecorderError> {
        config.validate()?;
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        info!("GPS server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            sink,
            idle_timeout: config.idle_timeout,
        })
    }

    /// Address the listener actually bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, GpsRecorderError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the process shuts down.
    ///
    /// Each session runs on its own task; a slow or stuck session never
    /// blocks acceptance, and its failures stay inside its task.
    pub async fn run(self) -> Result<(), GpsRecorderError> {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    info!("Accepted connection from {}", addr);
                    let session = Session::new(stream, Arc::clone(&self.sink), self.idle_timeout);
                    tokio::spawn(async move {
                        if let Err(e) = session.run().await {
                            error!("Session from {} ended with error: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}
