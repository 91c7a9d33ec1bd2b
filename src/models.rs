//! Data models.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::GpsRecorderError;

/// Device-reported identifier, typically an IMEI.
///
/// Bound once per session from the first payload a device sends. The core
/// treats it as opaque text: it is neither validated for format nor checked
/// for uniqueness.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceId(String);

impl TryFrom<&[u8]> for DeviceId {
    type Error = GpsRecorderError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let text = std::str::from_utf8(value)
            .map_err(|_| GpsRecorderError::InvalidDeviceId(format!("{value:02x?}")))?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(GpsRecorderError::InvalidDeviceId(text.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl DeviceId {
    /// Get the identifier as text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One decoded position report, as carried by a single AVL frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvlPosition {
    /// Device clock, milliseconds on the wire, normalized to UTC.
    pub time: DateTime<Utc>,
    /// Longitude in decimal degrees (1e-7 degree resolution on the wire).
    pub lon: f64,
    /// Latitude in decimal degrees (1e-7 degree resolution on the wire).
    pub lat: f64,
    /// Altitude in metres.
    pub altitude: i16,
    /// Heading in degrees.
    pub heading: i16,
    /// Number of visible satellites.
    pub satellites: u8,
    /// Device-reported speed; the unit is whatever the device uses.
    pub speed: i16,
}

impl AvlPosition {
    /// Deterministic map link for the reported coordinates.
    pub fn map_url(&self) -> String {
        format!("https://www.google.com/maps?q={},{}", self.lat, self.lon)
    }
}

/// A position report tagged with the device that sent it.
///
/// Immutable once constructed; handed to storage exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationRecord {
    pub device_id: DeviceId,
    pub position: AvlPosition,
}

impl LocationRecord {
    /// Create a new location record
    pub fn new(device_id: DeviceId, position: AvlPosition) -> Self {
        Self {
            device_id,
            position,
        }
    }
}
