//! Configuration loading and parsing

use anyhow::{bail, Context, Result};
use haldex_dem::{PollerConfig, SensorId, SimValues};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main application configuration (loaded from config.toml)
///
/// Every table is optional; missing values fall back to defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub simulator: SimValues,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    /// Pause between poll cycles
    #[serde(default = "default_interval")]
    pub interval_ms: u64,
    /// Stop after this many cycles (default: run until interrupted)
    pub count: Option<u64>,
    /// Sensors polled each cycle
    #[serde(default = "default_sensors")]
    pub sensors: Vec<SensorId>,
    /// Keep the module awake while monitoring
    #[serde(default)]
    pub keep_alive: bool,
    /// Emit JSON lines instead of text
    #[serde(default)]
    pub json: bool,
}

fn default_interval() -> u64 {
    1000
}

fn default_sensors() -> Vec<SensorId> {
    SensorId::ALL.to_vec()
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval(),
            count: None,
            sensors: default_sensors(),
            keep_alive: false,
            json: false,
        }
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate(&config).with_context(|| format!("Invalid config file: {:?}", path))?;

    Ok(config)
}

fn validate(config: &AppConfig) -> Result<()> {
    if config.poller.request_timeout_ms == 0 {
        bail!("poller.request_timeout_ms must be greater than zero");
    }
    if config.monitor.sensors.is_empty() {
        bail!("monitor.sensors must name at least one sensor");
    }
    if config.monitor.interval_ms < config.poller.min_poll_interval_ms {
        log::warn!(
            "monitor.interval_ms ({}) is below the safe minimum of {} ms",
            config.monitor.interval_ms,
            config.poller.min_poll_interval_ms
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_deserialization() {
        let toml_content = r#"
            [poller]
            request_timeout_ms = 500
            keep_alive_sensor = "oil_pressure"

            [monitor]
            interval_ms = 2000
            sensors = ["oil_temperature", "wheel_speeds"]

            [simulator]
            oil_temperature = -5
        "#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.poller.request_timeout_ms, 500);
        assert_eq!(config.poller.keep_alive_sensor, SensorId::OilPressure);
        assert_eq!(config.poller.reassembly_timeout_ms, 250);
        assert_eq!(
            config.monitor.sensors,
            vec![SensorId::OilTemperature, SensorId::WheelSpeeds]
        );
        assert_eq!(config.simulator.oil_temperature, -5);
        assert_eq!(config.simulator.pump_current, 1234);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.monitor.interval_ms, 1000);
        assert_eq!(config.monitor.sensors.len(), 4);
        assert!(!config.monitor.keep_alive);
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[monitor]\ncount = 3\njson = true").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.monitor.count, Some(3));
        assert!(config.monitor.json);
    }

    #[test]
    fn test_load_config_rejects_bad_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[monitor]\nsensors = []").unwrap();
        assert!(load_config(file.path()).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[monitor]\nsensors = [\"boost\"]").unwrap();
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
