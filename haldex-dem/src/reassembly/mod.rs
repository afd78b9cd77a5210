//! Multi-frame response reassembly
//!
//! Merges the physical frames of one DEM response into a [`LogicalMessage`].
//! The protocol carries no sequence counter: continuation frames are appended
//! in arrival order, so the transport must deliver frames for one identifier
//! in the order they were received on the bus.

use crate::codec::{
    self, FrameControl, FrameKind, DEM_MODULE_ID, READ_BY_IDENTIFIER, RESPONSE_ID,
};
use crate::types::{RawFrame, Result};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// One logical response, possibly spanning several frames
///
/// `data` is the wire image of the message: the control byte of the first
/// frame followed by every meaningful byte of every frame. Sensor offsets
/// index into this image.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalMessage {
    /// Identifier the frames arrived on
    pub response_id: u32,
    /// Module that answered
    pub module_id: u8,
    /// Operation ID echoed by the module
    pub operation_id: u16,
    /// Message image starting with the first control byte
    pub data: Vec<u8>,
    /// True once the last frame has been appended
    pub complete: bool,
}

impl LogicalMessage {
    /// Build a complete message from an already assembled image
    pub fn from_image(operation_id: u16, data: Vec<u8>) -> Self {
        Self {
            response_id: RESPONSE_ID,
            module_id: DEM_MODULE_ID,
            operation_id,
            data,
            complete: true,
        }
    }

    /// Number of bytes collected so far
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if no bytes have been collected
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Result of pushing one frame into the buffer
#[derive(Debug, Clone, PartialEq)]
pub enum Ingest {
    /// Frame was not for us (foreign identifier/module, or orphan continuation)
    Ignored,
    /// Frame was accepted; the message for `operation_id` still needs frames
    Pending { operation_id: u16 },
    /// Frame completed a message
    Complete(LogicalMessage),
}

/// In-progress message plus the time its first frame arrived
#[derive(Debug)]
struct Partial {
    message: LogicalMessage,
    started: Instant,
}

/// Reassembly buffer keyed by response identifier
///
/// Continuation frames carry no operation ID, so at most one message can be
/// in progress per identifier. A new first frame replaces a stale one.
#[derive(Debug)]
pub struct ReassemblyBuffer {
    response_id: u32,
    module_id: u8,
    in_progress: HashMap<u32, Partial>,
}

impl Default for ReassemblyBuffer {
    fn default() -> Self {
        Self::new(RESPONSE_ID, DEM_MODULE_ID)
    }
}

impl ReassemblyBuffer {
    /// Create a buffer accepting frames from one identifier and module
    pub fn new(response_id: u32, module_id: u8) -> Self {
        Self {
            response_id,
            module_id,
            in_progress: HashMap::new(),
        }
    }

    /// Push one received frame
    ///
    /// Returns `MalformedFrame` for an invalid control byte and
    /// `UnexpectedResponseType` for a header that does not answer a
    /// read-by-identifier request. Neither affects other messages.
    pub fn push(&mut self, frame: &RawFrame, now: Instant) -> Result<Ingest> {
        if frame.id != self.response_id {
            log::trace!("Ignoring frame on foreign ID: {}", frame);
            return Ok(Ingest::Ignored);
        }

        let control = FrameControl::parse(frame.data[0])?;

        match control.kind {
            FrameKind::Single | FrameKind::First => {
                let header = if control.kind == FrameKind::Single {
                    codec::decode_frame_header(frame)?
                } else {
                    codec::decode_first_header(frame)?
                };

                if header.module_id != self.module_id {
                    log::debug!(
                        "Ignoring frame from module 0x{:02X}: {}",
                        header.module_id,
                        frame
                    );
                    return Ok(Ingest::Ignored);
                }
                codec::check_response_type(READ_BY_IDENTIFIER, header.response_type)?;

                let mut data = Vec::with_capacity(1 + header.remaining.len());
                data.push(header.length_prefix);
                data.extend_from_slice(&header.remaining);

                let message = LogicalMessage {
                    response_id: frame.id,
                    module_id: header.module_id,
                    operation_id: header.operation_id,
                    data,
                    complete: control.kind == FrameKind::Single,
                };

                if message.complete {
                    log::debug!("Single-frame response: {}", frame);
                    return Ok(Ingest::Complete(message));
                }

                log::debug!("Multi-frame start: {}", frame);
                let operation_id = message.operation_id;
                let stale = self.in_progress.insert(
                    frame.id,
                    Partial {
                        message,
                        started: now,
                    },
                );
                if let Some(stale) = stale {
                    log::warn!(
                        "Discarding incomplete message for op 0x{:04X} ({} bytes), new start frame",
                        stale.message.operation_id,
                        stale.message.len()
                    );
                }
                Ok(Ingest::Pending { operation_id })
            }
            FrameKind::Middle | FrameKind::Last => {
                let Some(partial) = self.in_progress.get_mut(&frame.id) else {
                    log::warn!("Received continuation frame without start frame: {}", frame);
                    return Ok(Ingest::Ignored);
                };

                partial
                    .message
                    .data
                    .extend_from_slice(&frame.data[1..1 + control.len]);
                log::debug!("Multi-frame continuation: {}", frame);

                if !control.kind.ends_message() {
                    return Ok(Ingest::Pending {
                        operation_id: partial.message.operation_id,
                    });
                }

                match self.in_progress.remove(&frame.id) {
                    Some(Partial { mut message, .. }) => {
                        message.complete = true;
                        log::debug!(
                            "Multi-frame complete for op 0x{:04X}: {} bytes",
                            message.operation_id,
                            message.len()
                        );
                        Ok(Ingest::Complete(message))
                    }
                    None => Ok(Ingest::Ignored),
                }
            }
        }
    }

    /// Drop partial state for an identifier/operation pair
    ///
    /// Returns true if a partial message was discarded.
    pub fn discard(&mut self, response_id: u32, operation_id: u16) -> bool {
        let matches = self
            .in_progress
            .get(&response_id)
            .is_some_and(|p| p.message.operation_id == operation_id);
        if matches {
            self.in_progress.remove(&response_id);
            log::debug!(
                "Discarded partial message for 0x{:08X}/0x{:04X}",
                response_id,
                operation_id
            );
        }
        matches
    }

    /// Evict messages that stayed incomplete for longer than `max_age`
    pub fn evict_expired(&mut self, now: Instant, max_age: Duration) -> Vec<LogicalMessage> {
        let expired: Vec<u32> = self
            .in_progress
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.started) > max_age)
            .map(|(id, _)| *id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.in_progress.remove(&id))
            .map(|p| {
                log::warn!(
                    "Reassembly timeout for op 0x{:04X} after {} bytes",
                    p.message.operation_id,
                    p.message.len()
                );
                p.message
            })
            .collect()
    }

    /// Number of messages still waiting for frames
    pub fn pending_count(&self) -> usize {
        self.in_progress.len()
    }
}
