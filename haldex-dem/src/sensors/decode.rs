//! Sensor decode functions
//!
//! Each function extracts raw integers from a complete message image and
//! converts them to physical values. Offsets are relative to the first control
//! byte, so offset 5 is the first byte after the echoed operation ID. Callers
//! go through [`SensorDefinition::decode`](super::SensorDefinition::decode),
//! which checks the message length before any of these run.

use crate::reassembly::LogicalMessage;
use crate::types::{Result, SensorReading};
use byteorder::{BigEndian, ByteOrder};
use std::time::Instant;

/// Oil pressure scale (bar per count)
pub const OIL_PRESSURE_BAR_PER_COUNT: f64 = 0.0164;
/// Wheel speed scale (km/h per count)
pub const WHEEL_SPEED_KMH_PER_COUNT: f64 = 0.0156;

pub const UNIT_ADC: &str = "ADC";
pub const UNIT_BAR: &str = "bar";
pub const UNIT_CELSIUS: &str = "°C";
pub const UNIT_KMH: &str = "km/h";

/// Wheel speed channels: reading name and offset of the big-endian u16
const WHEEL_OFFSETS: [(&str, usize); 4] = [
    ("wheel_speed_fl", 8),
    ("wheel_speed_fr", 6),
    ("wheel_speed_rl", 12),
    ("wheel_speed_rr", 10),
];

fn reading(
    name: &str,
    raw_value: i64,
    physical_value: f64,
    unit: &str,
    at: Instant,
) -> SensorReading {
    SensorReading {
        name: name.to_string(),
        raw_value,
        physical_value,
        unit: unit.to_string(),
        timestamp: at,
    }
}

/// Pump current (i16 at 5) and solenoid current (i16 at 7), in ADC counts
pub fn pump_current(message: &LogicalMessage, at: Instant) -> Result<Vec<SensorReading>> {
    let data = &message.data;
    let pump = BigEndian::read_i16(&data[5..7]);
    let solenoid = BigEndian::read_i16(&data[7..9]);

    log::info!("Haldex currents - Pump: {} ADC, Solenoid: {} ADC", pump, solenoid);

    Ok(vec![
        reading("pump_current", pump as i64, pump as f64, UNIT_ADC, at),
        reading("solenoid_current", solenoid as i64, solenoid as f64, UNIT_ADC, at),
    ])
}

/// Oil pressure: unsigned byte at 5, scaled to bar
pub fn oil_pressure(message: &LogicalMessage, at: Instant) -> Result<Vec<SensorReading>> {
    let raw = message.data[5];
    let bar = raw as f64 * OIL_PRESSURE_BAR_PER_COUNT;

    log::info!("Haldex oil pressure: {:.2} bar ({} raw)", bar, raw);

    Ok(vec![reading("oil_pressure", raw as i64, bar, UNIT_BAR, at)])
}

/// Oil temperature: signed byte at 5, already in °C
pub fn oil_temperature(message: &LogicalMessage, at: Instant) -> Result<Vec<SensorReading>> {
    let raw = message.data[5] as i8;

    log::info!("Haldex oil temperature: {}°C", raw);

    Ok(vec![reading("oil_temperature", raw as i64, raw as f64, UNIT_CELSIUS, at)])
}

/// Wheel speeds: four big-endian u16 values scaled to km/h
///
/// Readings come out in FL, FR, RL, RR order.
pub fn wheel_speeds(message: &LogicalMessage, at: Instant) -> Result<Vec<SensorReading>> {
    let data = &message.data;
    let readings: Vec<SensorReading> = WHEEL_OFFSETS
        .iter()
        .map(|&(name, offset)| {
            let raw = BigEndian::read_u16(&data[offset..offset + 2]);
            reading(name, raw as i64, raw as f64 * WHEEL_SPEED_KMH_PER_COUNT, UNIT_KMH, at)
        })
        .collect();

    log::info!(
        "Wheel speeds - FL: {:.1}, FR: {:.1}, RL: {:.1}, RR: {:.1} km/h",
        readings[0].physical_value,
        readings[1].physical_value,
        readings[2].physical_value,
        readings[3].physical_value
    );

    Ok(readings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::{definition, SensorId};

    fn image(operation_id: u16, payload: &[u8]) -> LogicalMessage {
        let mut data = vec![0x8F, 0x1A, 0xE6];
        data.extend_from_slice(&operation_id.to_be_bytes());
        data.extend_from_slice(payload);
        LogicalMessage::from_image(operation_id, data)
    }

    #[test]
    fn test_oil_pressure_scaling() {
        let msg = image(0x0003, &[0x0A, 0x00]);
        let readings = oil_pressure(&msg, Instant::now()).unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].raw_value, 10);
        assert!((readings[0].physical_value - 0.164).abs() < 1e-9);
        assert_eq!(readings[0].unit, "bar");
    }

    #[test]
    fn test_oil_temperature_is_signed() {
        let msg = image(0x0002, &[0xE7, 0x00]);
        let readings = oil_temperature(&msg, Instant::now()).unwrap();
        assert_eq!(readings[0].raw_value, -25);
        assert_eq!(readings[0].physical_value, -25.0);
        assert_eq!(readings[0].unit, "°C");
    }

    #[test]
    fn test_pump_and_solenoid_current() {
        let msg = image(0x0005, &[0x04, 0xD2, 0x02, 0x37]);
        let readings = pump_current(&msg, Instant::now()).unwrap();
        assert_eq!(readings[0].name, "pump_current");
        assert_eq!(readings[0].raw_value, 1234);
        assert_eq!(readings[1].name, "solenoid_current");
        assert_eq!(readings[1].raw_value, 567);
    }

    #[test]
    fn test_negative_current() {
        let msg = image(0x0005, &[0xFF, 0xFE, 0x80, 0x00]);
        let readings = pump_current(&msg, Instant::now()).unwrap();
        assert_eq!(readings[0].raw_value, -2);
        assert_eq!(readings[1].raw_value, -32768);
    }

    #[test]
    fn test_wheel_speed_positions() {
        // offset 5 is unused, then FR, FL, RR, RL
        let msg = image(
            0x0006,
            &[0x00, 0x01, 0x90, 0x00, 0x64, 0x00, 0xC8, 0x00, 0x32],
        );
        let readings = wheel_speeds(&msg, Instant::now()).unwrap();
        let names: Vec<&str> = readings.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["wheel_speed_fl", "wheel_speed_fr", "wheel_speed_rl", "wheel_speed_rr"]
        );

        assert_eq!(readings[1].raw_value, 400);
        assert!((readings[1].physical_value - 6.24).abs() < 1e-9);
        assert_eq!(readings[0].raw_value, 100);
        assert_eq!(readings[3].raw_value, 200);
        assert_eq!(readings[2].raw_value, 50);
    }

    #[test]
    fn test_min_len_covers_every_offset() {
        // A message exactly min_len long must decode without panicking
        for id in SensorId::ALL {
            let def = definition(id);
            let msg = LogicalMessage::from_image(def.request.operation_id, vec![0u8; def.min_len]);
            assert!(def.decode(&msg, Instant::now()).is_ok(), "{} failed", id);
        }
    }
}
