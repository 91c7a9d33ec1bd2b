//! AVL frame decoding.
//!
//! Tracking devices send binary AVL data packets with a fixed layout:
//! a 10-byte header (4-byte preamble, 4-byte data field length, codec id,
//! record count), then one position record consisting of an 8-byte
//! millisecond timestamp, a priority byte and 15 bytes of GPS data.
//! All multi-byte fields are big-endian.
//!
//! Decoding is a pure transformation; logging and persistence belong to
//! the caller.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::AvlPosition;

/// Shortest buffer that can hold a header and one position record.
pub const MIN_FRAME_LEN: usize = 34;

/// Bytes preceding the data field counted by the declared length
/// (preamble + length field).
pub const HEADER_PREFIX_LEN: usize = 8;

const TIMESTAMP_OFFSET: usize = 10;
const GPS_OFFSET: usize = TIMESTAMP_OFFSET + 8 + 1; // priority byte is skipped

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame too short: got {len} bytes, need at least {MIN_FRAME_LEN}")]
    FrameTooShort { len: usize },

    #[error("timestamp out of range: {millis} ms since epoch")]
    InvalidTimestamp { millis: u64 },
}

/// Decode one AVL frame into a position report.
///
/// Values are read positionally; the header is not validated beyond its
/// presence. Longitude and latitude arrive as signed 32-bit integers in
/// units of 1e-7 degrees, the timestamp as unsigned milliseconds since
/// the Unix epoch, normalized here to UTC.
pub fn decode(buf: &[u8]) -> Result<AvlPosition, DecodeError> {
    if buf.len() < MIN_FRAME_LEN {
        return Err(DecodeError::FrameTooShort { len: buf.len() });
    }

    let millis = read_u64(&buf[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 8]);
    let time = i64::try_from(millis)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .ok_or(DecodeError::InvalidTimestamp { millis })?;

    let lon = f64::from(read_i32(&buf[GPS_OFFSET..GPS_OFFSET + 4])) / 10_000_000.0;
    let lat = f64::from(read_i32(&buf[GPS_OFFSET + 4..GPS_OFFSET + 8])) / 10_000_000.0;
    let altitude = read_i16(&buf[GPS_OFFSET + 8..GPS_OFFSET + 10]);
    let heading = read_i16(&buf[GPS_OFFSET + 10..GPS_OFFSET + 12]);
    let satellites = buf[GPS_OFFSET + 12];
    let speed = read_i16(&buf[GPS_OFFSET + 13..GPS_OFFSET + 15]);

    Ok(AvlPosition {
        time,
        lon,
        lat,
        altitude,
        heading,
        satellites,
        speed,
    })
}

/// Data field length declared in the frame header, if the header is present.
///
/// The declared length is not cross-checked during decoding; sessions use
/// this to flag frames whose declared length disagrees with the bytes
/// actually received.
pub fn declared_length(buf: &[u8]) -> Option<u32> {
    buf.get(4..8).map(read_u32)
}

/// Record count declared in the frame header, if the header is present.
///
/// Only the first record of a frame is ever decoded; sessions warn when
/// a device claims more than one.
pub fn record_count(buf: &[u8]) -> Option<u8> {
    buf.get(9).copied()
}

fn read_u64(buf: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(buf);
    u64::from_be_bytes(bytes)
}

fn read_u32(buf: &[u8]) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(buf);
    u32::from_be_bytes(bytes)
}

fn read_i32(buf: &[u8]) -> i32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(buf);
    i32::from_be_bytes(bytes)
}

fn read_i16(buf: &[u8]) -> i16 {
    let mut bytes = [0u8; 2];
    bytes.copy_from_slice(buf);
    i16::from_be_bytes(bytes)
}
