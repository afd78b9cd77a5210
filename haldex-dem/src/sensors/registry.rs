//! Static sensor table
//!
//! Every sensor the DEM module exposes is listed once in [`SENSORS`]. The
//! table never changes at runtime; lookups are by [`SensorId`], by name, or by
//! the operation ID echoed in a response.

use super::decode;
use crate::codec::RequestSpec;
use crate::reassembly::LogicalMessage;
use crate::types::{DemError, Result, SensorReading};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

/// Sensors that can be requested from the DEM module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorId {
    /// Pump and solenoid current (two readings)
    PumpCurrent,
    /// Clutch oil pressure
    OilPressure,
    /// Clutch oil temperature
    OilTemperature,
    /// All four wheel speeds (four readings)
    WheelSpeeds,
}

impl SensorId {
    /// All sensors in table order
    pub const ALL: [SensorId; 4] = [
        SensorId::PumpCurrent,
        SensorId::OilPressure,
        SensorId::OilTemperature,
        SensorId::WheelSpeeds,
    ];

    /// Canonical snake_case name
    pub fn name(self) -> &'static str {
        match self {
            SensorId::PumpCurrent => "pump_current",
            SensorId::OilPressure => "oil_pressure",
            SensorId::OilTemperature => "oil_temperature",
            SensorId::WheelSpeeds => "wheel_speeds",
        }
    }

    /// Operation ID used to request this sensor
    pub fn operation_id(self) -> u16 {
        definition(self).request.operation_id
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SensorId {
    type Err = DemError;

    fn from_str(s: &str) -> Result<Self> {
        SensorId::ALL
            .into_iter()
            .find(|id| id.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DemError::UnknownSensor(s.to_string()))
    }
}

/// Decode function signature shared by all sensors
pub type DecodeFn = fn(&LogicalMessage, Instant) -> Result<Vec<SensorReading>>;

/// Static definition of one sensor
#[derive(Clone, Copy)]
pub struct SensorDefinition {
    pub id: SensorId,
    /// Read request sent to the module
    pub request: RequestSpec,
    /// Minimum message image length the decode function needs
    pub min_len: usize,
    /// Converts a complete message into readings
    pub decode_fn: DecodeFn,
}

impl fmt::Debug for SensorDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorDefinition")
            .field("id", &self.id)
            .field("request", &self.request)
            .field("min_len", &self.min_len)
            .finish_non_exhaustive()
    }
}

impl SensorDefinition {
    /// Decode a complete message, checking its length first
    pub fn decode(&self, message: &LogicalMessage, at: Instant) -> Result<Vec<SensorReading>> {
        if message.len() < self.min_len {
            return Err(DemError::InsufficientData {
                sensor: self.id,
                needed: self.min_len,
                actual: message.len(),
            });
        }
        (self.decode_fn)(message, at)
    }
}

/// The sensor table, in the order the module is polled
pub static SENSORS: [SensorDefinition; 4] = [
    SensorDefinition {
        id: SensorId::PumpCurrent,
        request: RequestSpec::read(0x0005),
        min_len: 9,
        decode_fn: decode::pump_current,
    },
    SensorDefinition {
        id: SensorId::OilPressure,
        request: RequestSpec::read(0x0003),
        min_len: 6,
        decode_fn: decode::oil_pressure,
    },
    SensorDefinition {
        id: SensorId::OilTemperature,
        request: RequestSpec::read(0x0002),
        min_len: 6,
        decode_fn: decode::oil_temperature,
    },
    SensorDefinition {
        id: SensorId::WheelSpeeds,
        request: RequestSpec::read(0x0006),
        min_len: 14,
        decode_fn: decode::wheel_speeds,
    },
];

/// Look up a sensor definition
pub fn definition(id: SensorId) -> &'static SensorDefinition {
    match id {
        SensorId::PumpCurrent => &SENSORS[0],
        SensorId::OilPressure => &SENSORS[1],
        SensorId::OilTemperature => &SENSORS[2],
        SensorId::WheelSpeeds => &SENSORS[3],
    }
}

/// Find the sensor answering a given operation ID
pub fn definition_for_operation(operation_id: u16) -> Option<&'static SensorDefinition> {
    SENSORS
        .iter()
        .find(|def| def.request.operation_id == operation_id)
}

/// Decode a complete message using the sensor its operation ID belongs to
pub fn decode_message(
    message: &LogicalMessage,
    at: Instant,
) -> Result<(SensorId, Vec<SensorReading>)> {
    let def = definition_for_operation(message.operation_id)
        .ok_or(DemError::UnknownOperation(message.operation_id))?;
    let readings = def.decode(message, at)?;
    Ok((def.id, readings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_consistent() {
        for id in SensorId::ALL {
            let def = definition(id);
            assert_eq!(def.id, id);
            assert_eq!(definition_for_operation(def.request.operation_id).unwrap().id, id);
        }
    }

    #[test]
    fn test_operation_ids() {
        assert_eq!(SensorId::PumpCurrent.operation_id(), 0x0005);
        assert_eq!(SensorId::OilPressure.operation_id(), 0x0003);
        assert_eq!(SensorId::OilTemperature.operation_id(), 0x0002);
        assert_eq!(SensorId::WheelSpeeds.operation_id(), 0x0006);
        assert!(definition_for_operation(0x0042).is_none());
    }

    #[test]
    fn test_parse_sensor_names() {
        assert_eq!("oil_pressure".parse::<SensorId>().unwrap(), SensorId::OilPressure);
        assert_eq!(" Wheel_Speeds ".parse::<SensorId>().unwrap(), SensorId::WheelSpeeds);
        assert!(matches!(
            "turbo_boost".parse::<SensorId>(),
            Err(DemError::UnknownSensor(_))
        ));
    }

    #[test]
    fn test_decode_rejects_short_messages() {
        let short =
            LogicalMessage::from_image(0x0006, vec![0xCE, 0x1A, 0xE6, 0x00, 0x06, 0x00, 0x00]);
        match decode_message(&short, Instant::now()) {
            Err(DemError::InsufficientData { sensor, needed, actual }) => {
                assert_eq!(sensor, SensorId::WheelSpeeds);
                assert_eq!(needed, 14);
                assert_eq!(actual, 7);
            }
            other => panic!("expected InsufficientData, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_operation() {
        let msg =
            LogicalMessage::from_image(0x0042, vec![0xCE, 0x1A, 0xE6, 0x00, 0x42, 0x00, 0x00]);
        assert!(matches!(
            decode_message(&msg, Instant::now()),
            Err(DemError::UnknownOperation(0x0042))
        ));
    }
}
