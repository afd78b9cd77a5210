//! Core types for the DEM protocol engine
//!
//! This module defines the raw frame exchanged with the transport, the decoded
//! sensor reading handed to callers, and the error taxonomy shared by every
//! layer of the engine.

use crate::sensors::SensorId;
use std::fmt;
use std::time::Instant;

/// Result type for protocol engine operations
pub type Result<T> = std::result::Result<T, DemError>;

/// Largest identifier representable on the bus (29-bit extended)
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

/// Largest 11-bit standard identifier
pub const MAX_STANDARD_ID: u32 = 0x7FF;

/// Raw CAN frame as sent to or received from the transport
///
/// Classic CAN only: the payload is always 8 bytes, unused bytes are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrame {
    /// CAN identifier (11-bit or 29-bit)
    pub id: u32,
    /// Frame data bytes, zero padded
    pub data: [u8; 8],
    /// True if this is an extended (29-bit) CAN ID
    pub is_extended: bool,
}

impl RawFrame {
    /// Create a frame, choosing the extended format when the ID needs it
    pub fn new(id: u32, data: [u8; 8]) -> Self {
        Self {
            id: id & MAX_EXTENDED_ID,
            data,
            is_extended: id > MAX_STANDARD_ID,
        }
    }

    /// Create an extended (29-bit) frame regardless of the ID value
    pub fn extended(id: u32, data: [u8; 8]) -> Self {
        Self {
            id: id & MAX_EXTENDED_ID,
            data,
            is_extended: true,
        }
    }

    /// Build a frame from up to 8 bytes, padding the rest with zeros
    pub fn from_slice(id: u32, bytes: &[u8]) -> Result<Self> {
        if bytes.len() > 8 {
            return Err(DemError::MalformedFrame {
                byte0: bytes.first().copied().unwrap_or(0),
                reason: format!("{} data bytes do not fit in one frame", bytes.len()),
            });
        }
        let mut data = [0u8; 8];
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(Self::new(id, data))
    }

    /// Payload rendered as space separated hex, e.g. `CD 1A A6 00 05 01 00 00`
    pub fn hex(&self) -> String {
        self.data
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_extended {
            write!(f, "0x{:08X} [{}]", self.id, self.hex())
        } else {
            write!(f, "0x{:03X} [{}]", self.id, self.hex())
        }
    }
}

/// A decoded physical value from the DEM module
///
/// One response can yield several readings (pump and solenoid current, or
/// all four wheel speeds).
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    /// Reading name, e.g. `oil_pressure` or `wheel_speed_fl`
    pub name: String,
    /// Raw integer extracted from the response
    pub raw_value: i64,
    /// Value after scaling
    pub physical_value: f64,
    /// Engineering unit (e.g. "bar", "°C", "km/h")
    pub unit: String,
    /// Monotonic time the response was decoded
    pub timestamp: Instant,
}

impl fmt::Display for SensorReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.physical_value.fract() == 0.0 {
            write!(f, "{}: {} {}", self.name, self.physical_value, self.unit)
        } else {
            write!(
                f,
                "{}: {:.3} {} ({} raw)",
                self.name, self.physical_value, self.unit, self.raw_value
            )
        }
    }
}

/// Errors raised by a `CanTransport` implementation
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("No frame received within {0:?}")]
    Timeout(std::time::Duration),

    #[error("Transport closed")]
    Closed,

    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while talking to the DEM module
#[derive(Debug, thiserror::Error)]
pub enum DemError {
    #[error("Malformed frame (byte0 = 0x{byte0:02X}): {reason}")]
    MalformedFrame { byte0: u8, reason: String },

    #[error("Unexpected response type 0x{actual:02X} (expected 0x{expected:02X})")]
    UnexpectedResponseType { expected: u8, actual: u8 },

    #[error("Insufficient data for {sensor}: need {needed} bytes, got {actual}")]
    InsufficientData {
        sensor: SensorId,
        needed: usize,
        actual: usize,
    },

    #[error("Timed out after {timeout_ms} ms waiting for {sensor}")]
    Timeout { sensor: SensorId, timeout_ms: u64 },

    #[error("A request for {sensor} is already in flight")]
    AlreadyInFlight { sensor: SensorId },

    #[error("Unknown sensor: {0}")]
    UnknownSensor(String),

    #[error("Unknown operation ID 0x{0:04X}")]
    UnknownOperation(u16),

    #[error("Request for {sensor} was cancelled")]
    Cancelled { sensor: SensorId },

    #[error("Failed to send request for {sensor}: {source}")]
    SendFailed {
        sensor: SensorId,
        #[source]
        source: TransportError,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Poller has shut down")]
    Shutdown,
}

impl DemError {
    /// Sensor this error relates to, if any
    pub fn sensor(&self) -> Option<SensorId> {
        match self {
            DemError::InsufficientData { sensor, .. }
            | DemError::Timeout { sensor, .. }
            | DemError::AlreadyInFlight { sensor }
            | DemError::Cancelled { sensor }
            | DemError::SendFailed { sensor, .. } => Some(*sensor),
            _ => None,
        }
    }

    /// True for errors a caller may reasonably retry by re-issuing the request
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DemError::Timeout { .. } | DemError::SendFailed { .. } | DemError::Cancelled { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_id_format_selection() {
        let standard = RawFrame::new(0x7E8, [0; 8]);
        assert!(!standard.is_extended);

        let extended = RawFrame::new(0x000F_FFFE, [0; 8]);
        assert!(extended.is_extended);
        assert_eq!(extended.id, 0x000F_FFFE);
    }

    #[test]
    fn test_frame_from_slice_pads_with_zeros() {
        let frame = RawFrame::from_slice(0x0120_4001, &[0xCE, 0x1A, 0xE6]).unwrap();
        assert_eq!(frame.data, [0xCE, 0x1A, 0xE6, 0, 0, 0, 0, 0]);

        let too_long = RawFrame::from_slice(0x0120_4001, &[0u8; 9]);
        assert!(matches!(too_long, Err(DemError::MalformedFrame { .. })));
    }

    #[test]
    fn test_frame_display() {
        let frame = RawFrame::new(0x000F_FFFE, [0xCD, 0x1A, 0xA6, 0x00, 0x05, 0x01, 0x00, 0x00]);
        assert_eq!(frame.hex(), "CD 1A A6 00 05 01 00 00");
        assert_eq!(format!("{}", frame), "0x000FFFFE [CD 1A A6 00 05 01 00 00]");
    }

    #[test]
    fn test_error_sensor_tagging() {
        let err = DemError::Timeout {
            sensor: SensorId::OilPressure,
            timeout_ms: 1000,
        };
        assert_eq!(err.sensor(), Some(SensorId::OilPressure));
        assert!(err.is_retryable());

        let err = DemError::UnexpectedResponseType {
            expected: 0xE6,
            actual: 0x7F,
        };
        assert_eq!(err.sensor(), None);
        assert!(!err.is_retryable());
    }
}
