//! Sensor registry and decode functions
//!
//! This module maps each DEM sensor to its read request and to the function
//! that turns a reassembled response into physical readings.

pub mod decode;
pub mod registry;

// Re-export key types for convenience
pub use registry::{
    decode_message, definition, definition_for_operation, SensorDefinition, SensorId, SENSORS,
};
