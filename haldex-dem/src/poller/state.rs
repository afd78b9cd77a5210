//! Per-sensor request state
//!
//! Each sensor moves through `Idle → AwaitingResponse → {Decoded | TimedOut |
//! Errored | Cancelled} → Idle`. The terminal state is kept as `last_outcome`
//! once the sensor is idle again.

use std::fmt;
use std::time::Instant;

/// Where a sensor currently is in its request cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestState {
    #[default]
    Idle,
    AwaitingResponse,
}

/// How the last request for a sensor ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Decoded,
    TimedOut,
    Errored,
    Cancelled,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Decoded => write!(f, "decoded"),
            Outcome::TimedOut => write!(f, "timed out"),
            Outcome::Errored => write!(f, "errored"),
            Outcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Request bookkeeping for one sensor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollState {
    pub state: RequestState,
    pub last_outcome: Option<Outcome>,
    pub last_request_sent: Option<Instant>,
    pub last_response_received: Option<Instant>,
    pub outstanding_operation_id: Option<u16>,
    pub consecutive_timeouts: u32,
}

impl PollState {
    /// Request handed to the transport
    pub(crate) fn on_sent(&mut self, operation_id: u16, at: Instant) {
        self.state = RequestState::AwaitingResponse;
        self.last_request_sent = Some(at);
        self.outstanding_operation_id = Some(operation_id);
    }

    /// Request finished, back to idle
    pub(crate) fn finish(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Decoded => self.consecutive_timeouts = 0,
            Outcome::TimedOut => self.consecutive_timeouts += 1,
            Outcome::Errored | Outcome::Cancelled => {}
        }
        self.state = RequestState::Idle;
        self.last_outcome = Some(outcome);
        self.outstanding_operation_id = None;
    }
}
