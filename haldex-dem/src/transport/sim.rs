//! In-memory DEM module
//!
//! Answers read-by-identifier requests with scripted sensor values, the way a
//! bench module would. Used by the tests, the example and the CLI when no CAN
//! adapter is attached.

use super::CanTransport;
use crate::codec::{self, DEM_MODULE_ID, READ_BY_IDENTIFIER, REQUEST_ID};
use crate::sensors::SensorId;
use crate::types::{RawFrame, TransportError};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Sensor values the simulated module reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimValues {
    /// Pump current in ADC counts
    pub pump_current: i16,
    /// Solenoid current in ADC counts
    pub solenoid_current: i16,
    /// Oil pressure in raw counts (0.0164 bar each)
    pub oil_pressure_raw: u8,
    /// Oil temperature in °C
    pub oil_temperature: i8,
    /// Wheel speeds in raw counts (0.0156 km/h each), FL, FR, RL, RR
    pub wheel_speeds_raw: [u16; 4],
}

impl Default for SimValues {
    fn default() -> Self {
        Self {
            pump_current: 1234,
            solenoid_current: 567,
            oil_pressure_raw: 122,
            oil_temperature: 45,
            wheel_speeds_raw: [3205, 3205, 3190, 3190],
        }
    }
}

impl SimValues {
    /// Sensor payload following the echoed operation ID
    fn payload(&self, sensor: SensorId) -> Vec<u8> {
        match sensor {
            SensorId::PumpCurrent => {
                let mut payload = self.pump_current.to_be_bytes().to_vec();
                payload.extend_from_slice(&self.solenoid_current.to_be_bytes());
                payload
            }
            SensorId::OilPressure => vec![self.oil_pressure_raw, 0x00],
            SensorId::OilTemperature => vec![self.oil_temperature as u8, 0x00],
            SensorId::WheelSpeeds => {
                let [fl, fr, rl, rr] = self.wheel_speeds_raw;
                let mut payload = vec![0x00];
                for raw in [fr, fl, rr, rl] {
                    payload.extend_from_slice(&raw.to_be_bytes());
                }
                payload
            }
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    inbound: VecDeque<RawFrame>,
    sent: Vec<RawFrame>,
    values: SimValues,
    silent: HashSet<SensorId>,
    fail_sends: bool,
    closed: bool,
}

/// Simulated DEM module behind a [`CanTransport`]
#[derive(Debug, Default)]
pub struct SimulatedDem {
    state: Mutex<SimState>,
    arrived: Condvar,
}

impl SimulatedDem {
    /// Create a module reporting the given values
    pub fn new(values: SimValues) -> Self {
        Self {
            state: Mutex::new(SimState {
                values,
                ..SimState::default()
            }),
            arrived: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop answering requests for a sensor (simulates a sleeping module)
    pub fn silence(&self, sensor: SensorId) {
        self.lock().silent.insert(sensor);
    }

    /// Resume answering requests for a sensor
    pub fn wake(&self, sensor: SensorId) {
        self.lock().silent.remove(&sensor);
    }

    /// Make every following `send` fail with an I/O error
    pub fn fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }

    /// Queue an arbitrary inbound frame
    pub fn inject(&self, frame: RawFrame) {
        self.lock().inbound.push_back(frame);
        self.arrived.notify_all();
    }

    /// Every frame sent so far
    pub fn sent_frames(&self) -> Vec<RawFrame> {
        self.lock().sent.clone()
    }

    /// Close the link; pending and future receives fail with `Closed`
    pub fn close(&self) {
        self.lock().closed = true;
        self.arrived.notify_all();
    }

    fn answer(state: &mut SimState, frame: &RawFrame) {
        if frame.id != REQUEST_ID {
            return;
        }
        let header = match codec::decode_frame_header(frame) {
            Ok(header) => header,
            Err(e) => {
                log::debug!("Simulated DEM ignoring request: {}", e);
                return;
            }
        };
        if header.module_id != DEM_MODULE_ID || header.response_type != READ_BY_IDENTIFIER {
            return;
        }
        let Some(def) = crate::sensors::definition_for_operation(header.operation_id) else {
            log::debug!(
                "Simulated DEM has no data for op 0x{:04X}",
                header.operation_id
            );
            return;
        };
        if state.silent.contains(&def.id) {
            log::trace!("Simulated DEM silent for {}", def.id);
            return;
        }

        let payload = state.values.payload(def.id);
        state
            .inbound
            .extend(codec::encode_response(header.operation_id, &payload));
    }
}

impl CanTransport for SimulatedDem {
    fn send(&self, frame: &RawFrame) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        if state.fail_sends {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "simulated send failure",
            )));
        }
        state.sent.push(*frame);
        Self::answer(&mut state, frame);
        drop(state);
        self.arrived.notify_all();
        Ok(())
    }

    fn receive(&self, timeout: Duration) -> Result<RawFrame, TransportError> {
        let state = self.lock();
        let (mut state, _) = self
            .arrived
            .wait_timeout_while(state, timeout, |s| s.inbound.is_empty() && !s.closed)
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(frame) = state.inbound.pop_front() {
            return Ok(frame);
        }
        if state.closed {
            return Err(TransportError::Closed);
        }
        Err(TransportError::Timeout(timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_request, RequestSpec, RESPONSE_ID};

    #[test]
    fn test_answers_oil_temperature_request() {
        let sim = SimulatedDem::new(SimValues {
            oil_temperature: 13,
            ..SimValues::default()
        });
        sim.send(&encode_request(&RequestSpec::read(0x0002))).unwrap();

        let frame = sim.receive(Duration::from_millis(10)).unwrap();
        assert_eq!(frame.id, RESPONSE_ID);
        assert_eq!(frame.data, [0xCE, 0x1A, 0xE6, 0x00, 0x02, 0x0D, 0x00, 0x00]);
        assert_eq!(sim.sent_frames().len(), 1);
    }

    #[test]
    fn test_silent_sensor_times_out() {
        let sim = SimulatedDem::default();
        sim.silence(SensorId::OilPressure);
        sim.send(&encode_request(&RequestSpec::read(0x0003))).unwrap();

        assert!(matches!(
            sim.receive(Duration::from_millis(5)),
            Err(TransportError::Timeout(_))
        ));
    }

    #[test]
    fn test_wheel_speed_payload_layout() {
        let values = SimValues {
            wheel_speeds_raw: [1, 2, 3, 4],
            ..SimValues::default()
        };
        // FR, FL, RR, RL after one unused byte
        assert_eq!(
            values.payload(SensorId::WheelSpeeds),
            vec![0x00, 0x00, 0x02, 0x00, 0x01, 0x00, 0x04, 0x00, 0x03]
        );
    }

    #[test]
    fn test_close_and_send_failure() {
        let sim = SimulatedDem::default();
        sim.fail_sends(true);
        assert!(matches!(
            sim.send(&encode_request(&RequestSpec::read(0x0002))),
            Err(TransportError::Io(_))
        ));

        sim.close();
        assert!(matches!(
            sim.receive(Duration::from_millis(5)),
            Err(TransportError::Closed)
        ));
    }
}
