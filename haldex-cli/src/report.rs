//! Output formatting (text lines and JSON lines)

use crate::state::{self, DashboardState};
use chrono::{DateTime, Local};
use haldex_dem::{DemError, SensorId, SensorReading};
use serde::Serialize;

/// One reading as written to JSON output
#[derive(Debug, Serialize)]
pub struct ReadingRecord<'a> {
    pub timestamp: String,
    pub sensor: SensorId,
    pub name: &'a str,
    pub raw_value: i64,
    pub value: f64,
    pub unit: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imperial: Option<ImperialValue>,
}

#[derive(Debug, Serialize)]
pub struct ImperialValue {
    pub value: f64,
    pub unit: &'static str,
}

/// Failed poll as written to JSON output
#[derive(Debug, Serialize)]
pub struct ErrorRecord {
    pub timestamp: String,
    pub sensor: SensorId,
    pub error: String,
    pub retryable: bool,
}

/// Counters written at the end of a monitor run
#[derive(Debug, Serialize)]
pub struct Summary {
    pub updates: u64,
    pub errors: u64,
    pub last_update: Option<String>,
}

fn imperial_of(reading: &SensorReading) -> Option<ImperialValue> {
    state::imperial(reading.physical_value, &reading.unit)
        .map(|(value, unit)| ImperialValue { value, unit })
}

/// Text line for one reading
pub fn format_reading(reading: &SensorReading) -> String {
    match imperial_of(reading) {
        Some(imperial) => format!(
            "{:<18} {:>9.2} {:<5} ({:.1} {})",
            reading.name, reading.physical_value, reading.unit, imperial.value, imperial.unit
        ),
        None => format!(
            "{:<18} {:>9.2} {}",
            reading.name, reading.physical_value, reading.unit
        ),
    }
}

/// JSON line for one poll result
pub fn json_readings(
    sensor: SensorId,
    readings: &[SensorReading],
    at: DateTime<Local>,
) -> serde_json::Result<String> {
    let records: Vec<ReadingRecord> = readings
        .iter()
        .map(|r| ReadingRecord {
            timestamp: at.to_rfc3339(),
            sensor,
            name: &r.name,
            raw_value: r.raw_value,
            value: r.physical_value,
            unit: &r.unit,
            imperial: imperial_of(r),
        })
        .collect();
    serde_json::to_string(&records)
}

/// JSON line for one failed poll
pub fn json_error(
    sensor: SensorId,
    error: &DemError,
    at: DateTime<Local>,
) -> serde_json::Result<String> {
    serde_json::to_string(&ErrorRecord {
        timestamp: at.to_rfc3339(),
        sensor,
        error: error.to_string(),
        retryable: error.is_retryable(),
    })
}

pub fn summary(state: &DashboardState) -> Summary {
    Summary {
        updates: state.update_count(),
        errors: state.error_count(),
        last_update: state.last_update().map(|t| t.to_rfc3339()),
    }
}

/// Human readable end-of-run summary
pub fn format_summary(state: &DashboardState) -> String {
    let mut out = String::new();
    out.push_str("───────────────────────────────────────────────\n");
    for (name, latest) in state.values() {
        let imperial = latest
            .imperial()
            .map(|(value, unit)| format!(" / {:.1} {}", value, unit))
            .unwrap_or_default();
        out.push_str(&format!(
            "  {:<18} {:>9.2} {}{} [raw {}] (at {})\n",
            name,
            latest.physical_value,
            latest.unit,
            imperial,
            latest.raw_value,
            latest.updated_at.format("%H:%M:%S")
        ));
    }
    out.push_str(&format!(
        "  Updates: {}  Errors: {}",
        state.update_count(),
        state.error_count()
    ));
    if let Some(error) = state.last_error() {
        out.push_str(&format!("\n  Last error: {}", error));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn pressure() -> SensorReading {
        SensorReading {
            name: "oil_pressure".to_string(),
            raw_value: 122,
            physical_value: 2.0008,
            unit: "bar".to_string(),
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn test_format_reading_with_imperial() {
        let line = format_reading(&pressure());
        assert!(line.starts_with("oil_pressure"));
        assert!(line.contains("2.00 bar"));
        assert!(line.contains("29.0 psi"));
    }

    #[test]
    fn test_json_readings() {
        let line = json_readings(SensorId::OilPressure, &[pressure()], Local::now()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();

        assert_eq!(parsed[0]["sensor"], "oil_pressure");
        assert_eq!(parsed[0]["raw_value"], 122);
        assert_eq!(parsed[0]["imperial"]["unit"], "psi");
    }

    #[test]
    fn test_json_error() {
        let err = DemError::AlreadyInFlight {
            sensor: SensorId::WheelSpeeds,
        };
        let line = json_error(SensorId::WheelSpeeds, &err, Local::now()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["sensor"], "wheel_speeds");
        assert!(parsed["error"].as_str().unwrap().contains("already in flight"));
        assert_eq!(parsed["retryable"], false);

        let err = DemError::Timeout {
            sensor: SensorId::OilTemperature,
            timeout_ms: 1000,
        };
        let line = json_error(SensorId::OilTemperature, &err, Local::now()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["retryable"], true);
    }

    #[test]
    fn test_summary_counts() {
        let mut state = DashboardState::new();
        state.record(&[pressure()]);
        let summary = summary(&state);
        assert_eq!(summary.updates, 1);
        assert_eq!(summary.errors, 0);
        let text = format_summary(&state);
        assert!(text.contains("Updates: 1  Errors: 0"));
        assert!(text.contains("/ 29.0 psi [raw 122]"));
    }
}
