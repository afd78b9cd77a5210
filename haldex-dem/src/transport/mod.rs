//! Transport adapter interface
//!
//! The engine never touches CAN hardware itself. Anything that can send and
//! receive 8-byte frames with an 11- or 29-bit identifier can drive it by
//! implementing [`CanTransport`].

use crate::types::RawFrame;
pub use crate::types::TransportError;
use std::sync::Arc;
use std::time::Duration;

pub mod sim;

pub use sim::{SimValues, SimulatedDem};

/// Raw frame link to the CAN bus
///
/// Implementations are shared between the receiver thread and the writer
/// thread, hence `Send + Sync` and `&self` methods. Frames for one identifier
/// must be delivered in the order they were received on the bus.
pub trait CanTransport: Send + Sync {
    /// Send one frame
    fn send(&self, frame: &RawFrame) -> Result<(), TransportError>;

    /// Receive the next frame, waiting at most `timeout`
    ///
    /// Returns `TransportError::Timeout` when nothing arrived in time.
    fn receive(&self, timeout: Duration) -> Result<RawFrame, TransportError>;

    /// Ask the adapter to only deliver frames with this identifier
    ///
    /// Optional. The engine filters unmatched frames itself.
    fn subscribe_filter(&self, _id: u32) -> Result<(), TransportError> {
        Ok(())
    }
}

impl<T: CanTransport + ?Sized> CanTransport for Arc<T> {
    fn send(&self, frame: &RawFrame) -> Result<(), TransportError> {
        (**self).send(frame)
    }

    fn receive(&self, timeout: Duration) -> Result<RawFrame, TransportError> {
        (**self).receive(timeout)
    }

    fn subscribe_filter(&self, id: u32) -> Result<(), TransportError> {
        (**self).subscribe_filter(id)
    }
}

impl<T: CanTransport + ?Sized> CanTransport for Box<T> {
    fn send(&self, frame: &RawFrame) -> Result<(), TransportError> {
        (**self).send(frame)
    }

    fn receive(&self, timeout: Duration) -> Result<RawFrame, TransportError> {
        (**self).receive(timeout)
    }

    fn subscribe_filter(&self, id: u32) -> Result<(), TransportError> {
        (**self).subscribe_filter(id)
    }
}
