//! Dashboard state
//!
//! Latest value per reading plus update/error counters. Kept in the
//! application so the protocol library stays free of global state.

use chrono::{DateTime, Local};
use haldex_dem::{DemError, SensorId, SensorReading};
use std::collections::BTreeMap;

const PSI_PER_BAR: f64 = 14.504;

/// Convert Celsius to Fahrenheit
pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

/// Convert bar to psi
pub fn bar_to_psi(bar: f64) -> f64 {
    bar * PSI_PER_BAR
}

/// Value in the imperial unit the dashboard also shows, if there is one
pub fn imperial(value: f64, unit: &str) -> Option<(f64, &'static str)> {
    match unit {
        "°C" => Some((celsius_to_fahrenheit(value), "°F")),
        "bar" => Some((bar_to_psi(value), "psi")),
        _ => None,
    }
}

/// Most recent value of one reading
#[derive(Debug, Clone, PartialEq)]
pub struct LatestValue {
    pub raw_value: i64,
    pub physical_value: f64,
    pub unit: String,
    pub updated_at: DateTime<Local>,
}

impl LatestValue {
    pub fn imperial(&self) -> Option<(f64, &'static str)> {
        imperial(self.physical_value, &self.unit)
    }
}

#[derive(Debug, Default)]
pub struct DashboardState {
    /// Latest value keyed by reading name
    values: BTreeMap<String, LatestValue>,
    update_count: u64,
    error_count: u64,
    last_update: Option<DateTime<Local>>,
    last_error: Option<String>,
}

impl DashboardState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the readings of one successful poll
    pub fn record(&mut self, readings: &[SensorReading]) {
        let now = Local::now();
        for reading in readings {
            self.values.insert(
                reading.name.clone(),
                LatestValue {
                    raw_value: reading.raw_value,
                    physical_value: reading.physical_value,
                    unit: reading.unit.clone(),
                    updated_at: now,
                },
            );
        }
        self.update_count += 1;
        self.last_update = Some(now);
    }

    /// Record a failed poll
    pub fn record_error(&mut self, sensor: SensorId, error: &DemError) {
        self.error_count += 1;
        self.last_error = Some(format!("{}: {}", sensor, error));
    }

    pub fn get(&self, name: &str) -> Option<&LatestValue> {
        self.values.get(name)
    }

    pub fn values(&self) -> impl Iterator<Item = (&String, &LatestValue)> {
        self.values.iter()
    }

    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    pub fn last_update(&self) -> Option<DateTime<Local>> {
        self.last_update
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}
