//! Poller configuration types
//!
//! Timing knobs for the poll scheduler. Every field has a serde default so a
//! partial TOML/JSON table is enough to build a configuration.

use crate::codec::{DEM_MODULE_ID, RESPONSE_ID};
use crate::sensors::SensorId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the poll scheduler
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollerConfig {
    /// How long a request waits for a complete response (default: 1000ms)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// How long a partial multi-frame message may stay incomplete (default: 250ms)
    #[serde(default = "default_reassembly_timeout")]
    pub reassembly_timeout_ms: u64,

    /// Minimum safe interval between sensor requests (default: 250ms)
    ///
    /// The poller never throttles callers below this; it is used by
    /// `poll_all` and documented for callers driving their own loop.
    #[serde(default = "default_min_poll_interval")]
    pub min_poll_interval_ms: u64,

    /// Keep-alive cadence used by `start_keep_alive_default` (default: 500ms)
    #[serde(default = "default_keep_alive_interval")]
    pub keep_alive_interval_ms: u64,

    /// Sensor read used as the keep-alive request (default: oil temperature)
    #[serde(default = "default_keep_alive_sensor")]
    pub keep_alive_sensor: SensorId,

    /// Receive slice of the receiver thread (default: 50ms)
    #[serde(default = "default_receive_slice")]
    pub receive_slice_ms: u64,

    /// Identifier responses arrive on
    #[serde(default = "default_response_id")]
    pub response_id: u32,

    /// Module ID expected in response headers
    #[serde(default = "default_module_id")]
    pub module_id: u8,
}

fn default_request_timeout() -> u64 {
    1000
}

fn default_reassembly_timeout() -> u64 {
    250
}

fn default_min_poll_interval() -> u64 {
    250
}

fn default_keep_alive_interval() -> u64 {
    500
}

fn default_keep_alive_sensor() -> SensorId {
    SensorId::OilTemperature
}

fn default_receive_slice() -> u64 {
    50
}

fn default_response_id() -> u32 {
    RESPONSE_ID
}

fn default_module_id() -> u8 {
    DEM_MODULE_ID
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout(),
            reassembly_timeout_ms: default_reassembly_timeout(),
            min_poll_interval_ms: default_min_poll_interval(),
            keep_alive_interval_ms: default_keep_alive_interval(),
            keep_alive_sensor: default_keep_alive_sensor(),
            receive_slice_ms: default_receive_slice(),
            response_id: default_response_id(),
            module_id: default_module_id(),
        }
    }
}

impl PollerConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Builder method: set the reassembly timeout
    pub fn with_reassembly_timeout(mut self, timeout: Duration) -> Self {
        self.reassembly_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Builder method: set the minimum poll interval
    pub fn with_min_poll_interval(mut self, interval: Duration) -> Self {
        self.min_poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Builder method: set the keep-alive cadence
    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Builder method: choose the sensor read used as keep-alive
    pub fn with_keep_alive_sensor(mut self, sensor: SensorId) -> Self {
        self.keep_alive_sensor = sensor;
        self
    }

    /// Builder method: set the receiver thread's receive slice
    pub fn with_receive_slice(mut self, slice: Duration) -> Self {
        self.receive_slice_ms = slice.as_millis() as u64;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reassembly_timeout(&self) -> Duration {
        Duration::from_millis(self.reassembly_timeout_ms)
    }

    pub fn min_poll_interval(&self) -> Duration {
        Duration::from_millis(self.min_poll_interval_ms)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }

    /// Receive slice, never zero so the receiver loop cannot spin
    pub fn receive_slice(&self) -> Duration {
        Duration::from_millis(self.receive_slice_ms.max(1))
    }
}
