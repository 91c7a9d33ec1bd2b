//! Session and server integration tests over in-memory streams and real
//! TCP connections, using an in-memory sink instead of PostgreSQL.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::sleep;

use gps_recorder::config::ServerConfig;
use gps_recorder::errors::GpsRecorderError;
use gps_recorder::models::LocationRecord;
use gps_recorder::server::DeviceServer;
use gps_recorder::session::{LocationSink, Session, CMD_START, CMD_STOP};

/// Collects appended records in memory.
#[derive(Default)]
struct MemorySink {
    records: Mutex<Vec<LocationRecord>>,
}

impl MemorySink {
    fn records(&self) -> Vec<LocationRecord> {
        self.records.lock().unwrap().clone()
    }

    fn count_for(&self, device_id: &str) -> usize {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.device_id.as_str() == device_id)
            .count()
    }
}

#[async_trait]
impl LocationSink for MemorySink {
    async fn append(&self, record: &LocationRecord) -> Result<(), GpsRecorderError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// An always-failing sink, for the drop-and-continue path.
struct FailingSink;

#[async_trait]
impl LocationSink for FailingSink {
    async fn append(&self, _record: &LocationRecord) -> Result<(), GpsRecorderError> {
        Err(GpsRecorderError::ConfigurationError {
            message: "sink unavailable".to_string(),
        })
    }
}

fn frame(
    timestamp_ms: u64,
    lon: i32,
    lat: i32,
    altitude: i16,
    heading: i16,
    satellites: u8,
    speed: i16,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(34);
    buf.extend_from_slice(&[0u8; 4]);
    buf.extend_from_slice(&26u32.to_be_bytes());
    buf.push(0x08);
    buf.push(0x01);
    buf.extend_from_slice(&timestamp_ms.to_be_bytes());
    buf.push(0x01);
    buf.extend_from_slice(&lon.to_be_bytes());
    buf.extend_from_slice(&lat.to_be_bytes());
    buf.extend_from_slice(&altitude.to_be_bytes());
    buf.extend_from_slice(&heading.to_be_bytes());
    buf.push(satellites);
    buf.extend_from_slice(&speed.to_be_bytes());
    buf
}

/// Wait until the sink holds `expected` records for the device, or panic.
async fn wait_for_records(sink: &MemorySink, device_id: &str, expected: usize) {
    for _ in 0..200 {
        if sink.count_for(device_id) >= expected {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "device {} never reached {} records (got {})",
        device_id,
        expected,
        sink.count_for(device_id)
    );
}

#[tokio::test]
async fn handshake_binds_identity_and_sends_start() {
    let (mut client, server) = duplex(1024);
    let sink = Arc::new(MemorySink::default());
    let session = Session::new(server, sink.clone(), Duration::from_secs(5));
    let handle = tokio::spawn(session.run());

    client.write_all(b"356307042441013").await.unwrap();

    let mut reply = [0u8; 1];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[0], CMD_START);

    // Frame sent only after the start byte, as a device would.
    client
        .write_all(&frame(1_700_000_000_000, 10, 10, 100, 180, 5, 50))
        .await
        .unwrap();
    wait_for_records(&sink, "356307042441013", 1).await;

    client.shutdown().await.unwrap();

    // Best-effort stop byte, then EOF.
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[0], CMD_STOP);
    assert_eq!(client.read(&mut reply).await.unwrap(), 0);

    handle.await.unwrap().unwrap();

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].device_id.as_str(), "356307042441013");
    assert_eq!(records[0].position.lat, 0.000001);
    assert_eq!(records[0].position.lon, 0.000001);
    assert_eq!(records[0].position.altitude, 100);
    assert_eq!(records[0].position.heading, 180);
    assert_eq!(records[0].position.satellites, 5);
    assert_eq!(records[0].position.speed, 50);
}

#[tokio::test]
async fn immediate_disconnect_yields_no_identity() {
    let (client, server) = duplex(1024);
    let sink = Arc::new(MemorySink::default());
    let session = Session::new(server, sink.clone(), Duration::from_secs(5));
    let handle = tokio::spawn(session.run());

    drop(client);

    let result = handle.await.unwrap();
    assert!(matches!(result, Err(GpsRecorderError::NoIdentity)));
    assert!(sink.records().is_empty());
}

#[tokio::test]
async fn malformed_frame_keeps_session_alive() {
    let (mut client, server) = duplex(1024);
    let sink = Arc::new(MemorySink::default());
    let session = Session::new(server, sink.clone(), Duration::from_secs(5));
    let handle = tokio::spawn(session.run());

    client.write_all(b"device-a").await.unwrap();
    let mut reply = [0u8; 1];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[0], CMD_START);

    // Too short to be a frame; must be dropped without ending the session.
    client.write_all(&[0xde, 0xad, 0xbe, 0xef]).await.unwrap();
    sleep(Duration::from_millis(50)).await;

    client
        .write_all(&frame(1_700_000_001_000, 20, 30, 10, 90, 7, 40))
        .await
        .unwrap();
    wait_for_records(&sink, "device-a", 1).await;

    client.shutdown().await.unwrap();
    handle.await.unwrap().unwrap();

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].position.lon, 0.000002);
    assert_eq!(records[0].position.lat, 0.000003);
}

#[tokio::test]
async fn sink_failure_drops_record_but_keeps_session() {
    let (mut client, server) = duplex(1024);
    let session = Session::new(server, Arc::new(FailingSink), Duration::from_secs(5));
    let handle = tokio::spawn(session.run());

    client.write_all(b"device-b").await.unwrap();
    let mut reply = [0u8; 1];
    client.read_exact(&mut reply).await.unwrap();

    client
        .write_all(&frame(1_700_000_000_000, 10, 10, 100, 180, 5, 50))
        .await
        .unwrap();
    sleep(Duration::from_millis(50)).await;

    // The session must still be open and close cleanly.
    client.shutdown().await.unwrap();
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[0], CMD_STOP);

    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn idle_session_is_closed() {
    let (mut client, server) = duplex(1024);
    let sink = Arc::new(MemorySink::default());
    let session = Session::new(server, sink, Duration::from_millis(100));
    let handle = tokio::spawn(session.run());

    client.write_all(b"device-idle").await.unwrap();
    let mut reply = [0u8; 1];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[0], CMD_START);

    // Stay silent; the server should hang up with a stop byte.
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[0], CMD_STOP);

    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn concurrent_sessions_stay_isolated() {
    const DEVICES: usize = 4;
    const FRAMES_PER_DEVICE: usize = 3;

    let sink = Arc::new(MemorySink::default());
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        idle_timeout: Duration::from_secs(5),
    };
    let server = DeviceServer::bind(&config, sink.clone()).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());

    let mut clients = Vec::new();
    for device in 0..DEVICES {
        let sink = sink.clone();
        clients.push(tokio::spawn(async move {
            let device_id = format!("device-{device}");
            let mut stream = TcpStream::connect(addr).await.unwrap();

            stream.write_all(device_id.as_bytes()).await.unwrap();
            let mut reply = [0u8; 1];
            stream.read_exact(&mut reply).await.unwrap();
            assert_eq!(reply[0], CMD_START);

            for i in 0..FRAMES_PER_DEVICE {
                let raw = (device * 100 + i) as i32;
                stream
                    .write_all(&frame(
                        1_700_000_000_000 + i as u64,
                        raw,
                        raw,
                        device as i16,
                        0,
                        5,
                        i as i16,
                    ))
                    .await
                    .unwrap();
                // One frame per read on the server side; wait until it
                // lands before sending the next.
                wait_for_records(&sink, &device_id, i + 1).await;
            }

            stream.shutdown().await.unwrap();
        }));
    }
    for client in clients {
        client.await.unwrap();
    }

    let records = sink.records();
    assert_eq!(records.len(), DEVICES * FRAMES_PER_DEVICE);
    for device in 0..DEVICES {
        let device_id = format!("device-{device}");
        let own: Vec<_> = records
            .iter()
            .filter(|r| r.device_id.as_str() == device_id)
            .collect();
        assert_eq!(own.len(), FRAMES_PER_DEVICE);
        // Altitude encodes the device index; no cross-contamination.
        assert!(own.iter().all(|r| r.position.altitude == device as i16));
    }
}
