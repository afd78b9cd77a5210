//! Frame codec for the DEM read-by-identifier protocol
//!
//! Every frame starts with a control byte:
//! - bit 7 (`0x80`): first frame of a message
//! - bit 6 (`0x40`): last frame of a message
//! - bit 3 (`0x08`): always set
//! - bits 0-2: number of meaningful bytes following the control byte
//!
//! A message that fits in one frame therefore starts with `0xC8 | n`, which is
//! the `0xCA..=0xCF` "length prefix" range seen on every request and on short
//! responses. Longer responses are split into a first frame (`0x88 | n`),
//! optional middle frames (`0x08 | n`) and a last frame (`0x48 | n`).
//!
//! Frames that carry a header (single and first frames) continue with the
//! module ID, the operation type and the big-endian operation ID.

use crate::types::{DemError, RawFrame, Result};
use byteorder::{BigEndian, ByteOrder};

/// Identifier all requests are broadcast on
pub const REQUEST_ID: u32 = 0x000F_FFFE;
/// Identifier the DEM module answers on
pub const RESPONSE_ID: u32 = 0x0120_4001;
/// Module ID of the DEM (rear differential) control unit
pub const DEM_MODULE_ID: u8 = 0x1A;
/// Operation type: read data by identifier
pub const READ_BY_IDENTIFIER: u8 = 0xA6;
/// Operation type of a positive answer to `READ_BY_IDENTIFIER`
pub const RESPONSE_BY_IDENTIFIER: u8 = 0xE6;
/// Base value of the length prefix of a single-frame message
pub const LENGTH_PREFIX_BASE: u8 = 0xC8;
/// Meaningful bytes in every currently defined request
pub const REQUEST_PAYLOAD_LEN: u8 = 5;

const FLAG_FIRST: u8 = 0x80;
const FLAG_LAST: u8 = 0x40;
const FLAG_MARKER: u8 = 0x08;
const LENGTH_MASK: u8 = 0x07;

/// Bytes after the control byte that make up a header
const HEADER_LEN: usize = 4;
/// Maximum meaningful bytes after the control byte
const MAX_FRAME_PAYLOAD: usize = 7;

/// A read request for one operation on one module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestSpec {
    /// Target module (0x1A for the DEM)
    pub module_id: u8,
    /// Operation type (0xA6, read by identifier)
    pub operation_type: u8,
    /// Parameter being requested
    pub operation_id: u16,
    /// Number of responses the module should send
    pub expected_responses: u8,
}

impl RequestSpec {
    /// Read-by-identifier request to the DEM module expecting one answer
    pub const fn read(operation_id: u16) -> Self {
        Self {
            module_id: DEM_MODULE_ID,
            operation_type: READ_BY_IDENTIFIER,
            operation_id,
            expected_responses: 0x01,
        }
    }
}

/// Position of a frame within a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Complete message in one frame
    Single,
    /// First frame of a multi-frame message
    First,
    /// Continuation frame, more frames follow
    Middle,
    /// Final continuation frame
    Last,
}

/// Decoded control byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameControl {
    pub kind: FrameKind,
    /// Meaningful bytes following the control byte
    pub len: usize,
}

impl FrameControl {
    /// Interpret the first byte of a frame
    pub fn parse(byte0: u8) -> Result<Self> {
        if byte0 & FLAG_MARKER == 0 {
            return Err(DemError::MalformedFrame {
                byte0,
                reason: "frame marker bit not set".to_string(),
            });
        }

        let kind = match (byte0 & FLAG_FIRST != 0, byte0 & FLAG_LAST != 0) {
            (true, true) => FrameKind::Single,
            (true, false) => FrameKind::First,
            (false, false) => FrameKind::Middle,
            (false, true) => FrameKind::Last,
        };
        let len = (byte0 & LENGTH_MASK) as usize;

        if kind.carries_header() && len < HEADER_LEN {
            return Err(DemError::MalformedFrame {
                byte0,
                reason: format!("{} bytes cannot hold a message header", len),
            });
        }

        Ok(Self { kind, len })
    }

    /// Encode back into a control byte
    pub fn to_byte(self) -> u8 {
        let flags = match self.kind {
            FrameKind::Single => FLAG_FIRST | FLAG_LAST,
            FrameKind::First => FLAG_FIRST,
            FrameKind::Middle => 0,
            FrameKind::Last => FLAG_LAST,
        };
        flags | FLAG_MARKER | (self.len.min(MAX_FRAME_PAYLOAD) as u8)
    }
}

impl FrameKind {
    /// Single and first frames start with module ID, type and operation ID
    pub fn carries_header(self) -> bool {
        matches!(self, FrameKind::Single | FrameKind::First)
    }

    /// Single and last frames terminate a message
    pub fn ends_message(self) -> bool {
        matches!(self, FrameKind::Single | FrameKind::Last)
    }
}

/// Header fields of a single or first frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Raw control byte (0xCA..=0xCF for single frames)
    pub length_prefix: u8,
    pub module_id: u8,
    pub response_type: u8,
    pub operation_id: u16,
    /// Meaningful bytes following the control byte
    pub remaining: Vec<u8>,
}

impl FrameHeader {
    /// Sensor data bytes after the echoed operation ID
    pub fn payload(&self) -> &[u8] {
        self.remaining.get(HEADER_LEN..).unwrap_or(&[])
    }
}

/// Build the outbound frame for a request
///
/// Layout: `[0xC8 + 5, module, type, op_hi, op_lo, expected, 0, 0]` on
/// identifier `0x000FFFFE`.
pub fn encode_request(spec: &RequestSpec) -> RawFrame {
    let mut data = [0u8; 8];
    data[0] = LENGTH_PREFIX_BASE + REQUEST_PAYLOAD_LEN;
    data[1] = spec.module_id;
    data[2] = spec.operation_type;
    BigEndian::write_u16(&mut data[3..5], spec.operation_id);
    data[5] = spec.expected_responses;

    RawFrame::extended(REQUEST_ID, data)
}

/// Decode the header of a single-frame message
///
/// Byte0 must be a length prefix in `0xCA..=0xCF`; `remaining` holds the
/// `byte0 - 0xC8` bytes that follow it.
pub fn decode_frame_header(frame: &RawFrame) -> Result<FrameHeader> {
    let byte0 = frame.data[0];
    if !(0xCA..=0xCF).contains(&byte0) {
        return Err(DemError::MalformedFrame {
            byte0,
            reason: "length prefix outside 0xCA..=0xCF".to_string(),
        });
    }
    Ok(parse_header(frame, (byte0 - LENGTH_PREFIX_BASE) as usize))
}

/// Decode the header of the first frame of a multi-frame message
pub fn decode_first_header(frame: &RawFrame) -> Result<FrameHeader> {
    let control = FrameControl::parse(frame.data[0])?;
    if control.kind != FrameKind::First {
        return Err(DemError::MalformedFrame {
            byte0: frame.data[0],
            reason: format!("expected a first frame, got {:?}", control.kind),
        });
    }
    Ok(parse_header(frame, control.len))
}

fn parse_header(frame: &RawFrame, len: usize) -> FrameHeader {
    let data = &frame.data;
    FrameHeader {
        length_prefix: data[0],
        module_id: data[1],
        response_type: data[2],
        operation_id: BigEndian::read_u16(&data[3..5]),
        remaining: data[1..1 + len].to_vec(),
    }
}

/// Check that a response type answers the given request type
///
/// A positive answer sets bit 6 of the request type (`0xA6` → `0xE6`).
pub fn check_response_type(request_type: u8, response_type: u8) -> Result<()> {
    let expected = request_type | 0x40;
    if response_type != expected {
        return Err(DemError::UnexpectedResponseType {
            expected,
            actual: response_type,
        });
    }
    Ok(())
}

/// Build the frames the DEM module sends in answer to a read request
///
/// `payload` is the sensor data following the echoed operation ID.
pub fn encode_response(operation_id: u16, payload: &[u8]) -> Vec<RawFrame> {
    let mut body = Vec::with_capacity(HEADER_LEN + payload.len());
    body.push(DEM_MODULE_ID);
    body.push(RESPONSE_BY_IDENTIFIER);
    body.extend_from_slice(&operation_id.to_be_bytes());
    body.extend_from_slice(payload);

    let chunks: Vec<&[u8]> = body.chunks(MAX_FRAME_PAYLOAD).collect();
    let last = chunks.len() - 1;

    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let kind = match (i == 0, i == last) {
                (true, true) => FrameKind::Single,
                (true, false) => FrameKind::First,
                (false, false) => FrameKind::Middle,
                (false, true) => FrameKind::Last,
            };
            let mut data = [0u8; 8];
            data[0] = FrameControl { kind, len: chunk.len() }.to_byte();
            data[1..1 + chunk.len()].copy_from_slice(chunk);
            RawFrame::extended(RESPONSE_ID, data)
        })
        .collect()
}
