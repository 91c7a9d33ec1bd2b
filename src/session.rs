//! Per-connection device session.
//!
//! Each accepted connection runs one session: an identification handshake,
//! a start control byte, then a receive-decode-persist loop until the peer
//! disconnects or falls idle. Sessions are fully independent of each other;
//! the storage sink is the only shared resource.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::avl::{self, HEADER_PREFIX_LEN, MIN_FRAME_LEN};
use crate::errors::GpsRecorderError;
use crate::models::{DeviceId, LocationRecord};

/// Control byte telling the device to start sending frames.
pub const CMD_START: u8 = 0x01;
/// Control byte telling the device to stop sending frames.
pub const CMD_STOP: u8 = 0x00;

const READ_BUF_LEN: usize = 1024;

/// Destination for decoded location records.
///
/// Implementations must tolerate concurrent appends from independent
/// sessions and accept records out of temporal order.
#[async_trait]
pub trait LocationSink: Send + Sync {
    async fn append(&self, record: &LocationRecord) -> Result<(), GpsRecorderError>;
}

/// One device connection, from identification handshake to disconnect.
///
/// Generic over the stream so tests can drive it with an in-memory duplex.
pub struct Session<S> {
    stream: S,
    sink: Arc<dyn LocationSink>,
    idle_timeout: Duration,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Session<S> {
    pub fn new(stream: S, sink: Arc<dyn LocationSink>, idle_timeout: Duration) -> Self {
        Self {
            stream,
            sink,
            idle_timeout,
        }
    }

    /// Drive the session until the peer disconnects, falls idle, or an
    /// unrecoverable I/O error occurs.
    pub async fn run(mut self) -> Result<(), GpsRecorderError> {
        let mut buf = vec![0u8; READ_BUF_LEN];

        // Identification handshake: the first payload, whatever it is,
        // becomes the device id.
        let n = self.read(&mut buf).await?;
        if n == 0 {
            return Err(GpsRecorderError::NoIdentity);
        }
        let device_id = DeviceId::try_from(&buf[..n])?;
        info!("Device identified as {}", device_id);

        self.stream.write_all(&[CMD_START]).await?;

        let result = self.forward(&device_id, &mut buf).await;

        // The peer is usually already gone at this point; the stop byte is
        // best effort.
        let _ = self.stream.write_all(&[CMD_STOP]).await;
        let _ = self.stream.flush().await;

        result
    }

    /// Receive-decode-persist loop; returns when the peer closes or idles out.
    async fn forward(
        &mut self,
        device_id: &DeviceId,
        buf: &mut [u8],
    ) -> Result<(), GpsRecorderError> {
        loop {
            let n = self.read(buf).await?;
            if n == 0 {
                info!("Device {} disconnected, ending session", device_id);
                return Ok(());
            }
            self.handle_frame(device_id, &buf[..n]).await;
        }
    }

    /// Process one inbound payload as a single AVL frame.
    ///
    /// A malformed frame is logged and dropped; the session stays active.
    /// A failed append is likewise non-fatal, the record is dropped.
    async fn handle_frame(&self, device_id: &DeviceId, frame: &[u8]) {
        self.audit_header(device_id, frame);

        match avl::decode(frame) {
            Ok(position) => {
                let record = LocationRecord::new(device_id.clone(), position);
                if let Err(e) = self.sink.append(&record).await {
                    error!("Failed to persist location from {}: {}", device_id, e);
                }
            }
            Err(e) => {
                warn!("Dropping malformed frame from {}: {}", device_id, e);
            }
        }
    }

    /// Flag header fields the decoder trusts but does not enforce: a declared
    /// data length that disagrees with the bytes received, and frames that
    /// claim more than the one record we decode.
    fn audit_header(&self, device_id: &DeviceId, frame: &[u8]) {
        if frame.len() < MIN_FRAME_LEN {
            return;
        }
        let measured = (frame.len() - HEADER_PREFIX_LEN) as u32;
        if let Some(declared) = avl::declared_length(frame) {
            if declared != measured {
                warn!(
                    "Frame from {} declares {} data bytes but carries {}",
                    device_id, declared, measured
                );
            }
        }
        if let Some(count) = avl::record_count(frame) {
            if count != 1 {
                warn!(
                    "Frame from {} declares {} records; only the first is decoded",
                    device_id, count
                );
            }
        }
    }

    /// Read with the configured idle timeout; an expired timer is treated
    /// as a peer disconnect.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, GpsRecorderError> {
        match timeout(self.idle_timeout, self.stream.read(buf)).await {
            Ok(n) => Ok(n?),
            Err(_) => {
                warn!("Session idle for {:?}, closing", self.idle_timeout);
                Ok(0)
            }
        }
    }
}
