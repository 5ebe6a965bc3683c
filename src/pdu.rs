//!# ISO 15765-2 protocol data units
//!
//! The transport protocol multiplexes four PDU kinds onto the payload bytes
//! of a CAN frame. The first byte (after any addressing prefix) carries the
//! protocol control information: frame type in the high nibble, a type
//! specific value in the low nibble. Lengths beyond what the nibble fields
//! can express use the escape forms introduced for CAN FD: Single frames
//! move the length to a dedicated byte, First frames to a 32 bit big-endian
//! field.
//!
//! [Pdu::decode] parses the payload region of an incoming frame into a typed
//! PDU. The `encode` constructors on each PDU kind build the outbound
//! payload bytes, including the addressing prefix. Neither side touches
//! padding or DLC handling, which remain frame-level concerns.
use crate::frame::MAX_PAYLOAD_FD;
use byteorder::{BigEndian, ByteOrder};
use bytes::{Bytes, BytesMut};
use embedded_time::duration::Microseconds;
use modular_bitfield_msb::prelude::*;

/// Data bytes a small-form Single frame can carry; anything longer needs the
/// escape form
pub const SMALL_SINGLE_FRAME_MAX_DATA: usize = 7;

/// Largest frame length encodable in a small-form First frame
pub const SMALL_FIRST_FRAME_MAX_LENGTH: usize = 0xFFF;

/// The four PDU kinds of ISO 15765-2
#[derive(BitfieldSpecifier, Debug, Copy, Clone, Eq, PartialEq)]
#[bits = 4]
pub enum FrameType {
    Single,
    First,
    Consecutive,
    FlowControl,
}

/// Receiver verdict carried by a Flow Control frame
#[derive(BitfieldSpecifier, Debug, Copy, Clone, Eq, PartialEq)]
#[bits = 4]
pub enum FlowStatus {
    /// Clear to send the next block of consecutive frames
    ContinueToSend = 0,

    /// Hold off and await another flow control
    Wait = 1,

    /// Receiver cannot take a message of the announced length
    Overflow = 2,
}

/// Leading PCI byte common to all PDU kinds
#[bitfield(bits = 8)]
pub struct PciByte {
    pub frame_type: FrameType,
    pub low_nibble: B4,
}

/// PCI byte of a small-form Single frame
#[bitfield(bits = 8)]
pub struct SinglePci {
    pub frame_type: FrameType,
    pub length: B4,
}

/// Two-byte PCI of a First frame, 12 bit length
#[bitfield(bits = 16)]
pub struct FirstFramePci {
    pub frame_type: FrameType,
    pub frame_length: B12,
}

/// PCI byte of a Consecutive frame
#[bitfield(bits = 8)]
pub struct ConsecutivePci {
    pub frame_type: FrameType,
    pub seq_num: B4,
}

/// Three-byte PCI of a Flow Control frame
#[bitfield(bits = 24)]
pub struct FlowControlPci {
    pub frame_type: FrameType,
    pub flow_status: FlowStatus,
    pub block_size: B8,
    pub st_min: B8,
}

/// Possible errors when decoding a frame payload into a [Pdu]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// No PDU bytes after the addressing prefix
    EmptyFrame,

    /// Type nibble outside the four defined PDU kinds
    UnknownFrameType(u8),

    /// Single frame announcing more data than the frame carries
    SingleFrameLengthExceedsData {
        length: u8,
        room: usize,
    },

    /// Escape-form Single frame with a length byte of zero
    ZeroLengthSingleFrame,

    /// Escape-form Single frame shorter than its length byte
    TruncatedSingleFrame,

    /// First frame shorter than its length field
    TruncatedFirstFrame,

    /// Flow control frame shorter than three bytes
    TruncatedFlowControl,

    /// Flow status nibble outside the three defined values
    UnknownFlowStatus(u8),

    /// STmin byte in none of the defined ranges
    InvalidStMin(u8),
}

impl core::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DecodeError::EmptyFrame => {
                write!(f, "received frame is missing data according to the prefix size")
            }
            DecodeError::UnknownFrameType(value) => {
                write!(f, "received message with unknown frame type {value}")
            }
            DecodeError::SingleFrameLengthExceedsData { length, room } => {
                write!(
                    f,
                    "received single frame with a length of {length} while there is room for {room} bytes of data"
                )
            }
            DecodeError::ZeroLengthSingleFrame => {
                write!(f, "received single frame with a length of 0 bytes")
            }
            DecodeError::TruncatedSingleFrame => {
                write!(f, "single frame with escape sequence must be at least 2 bytes long")
            }
            DecodeError::TruncatedFirstFrame => {
                write!(f, "first frame is too short for its length field")
            }
            DecodeError::TruncatedFlowControl => {
                write!(f, "flow control frame must be at least 3 bytes long")
            }
            DecodeError::UnknownFlowStatus(value) => write!(f, "unknown flow status {value}"),
            DecodeError::InvalidStMin(value) => {
                write!(f, "invalid STmin value 0x{value:02X} received in flow control")
            }
        }
    }
}

/// Single frame: complete message in one frame
#[derive(Debug, Clone, PartialEq)]
pub struct SingleFrame {
    /// Announced payload length
    pub length: u8,

    /// Payload bytes
    pub data: Bytes,

    /// Length was carried in the escape byte rather than the PCI nibble
    pub escape_sequence: bool,
}

/// First frame: announces a multi-frame message and carries its head
#[derive(Debug, Clone, PartialEq)]
pub struct FirstFrame {
    /// Announced total message length
    pub length: u32,

    /// Initial payload bytes
    pub data: Bytes,

    /// Length was carried in the 32 bit escape field
    pub escape_sequence: bool,
}

/// Consecutive frame: one segment of a multi-frame message
#[derive(Debug, Clone, PartialEq)]
pub struct ConsecutiveFrame {
    /// Sequence number, cyclic in 0..=15
    pub seq_num: u8,

    /// Payload bytes. No length of its own, the receiver caps by the
    /// remaining message length.
    pub data: Bytes,
}

/// Flow control frame: receiver feedback steering the sender
#[derive(Debug, Clone, PartialEq)]
pub struct FlowControl {
    pub flow_status: FlowStatus,

    /// Consecutive frames allowed before the next flow control, 0 = no limit
    pub block_size: u8,

    /// Raw STmin byte as received
    pub st_min: u8,

    /// Decoded minimum separation time between consecutive frames
    pub separation_time: Microseconds<u32>,
}

/// A decoded protocol data unit
#[derive(Debug, Clone, PartialEq)]
pub enum Pdu {
    Single(SingleFrame),
    First(FirstFrame),
    Consecutive(ConsecutiveFrame),
    FlowControl(FlowControl),
}

impl Pdu {
    /// Parses the payload region of a frame into a typed PDU.
    ///
    /// `start_of_data` is the size of the addressing prefix preceding the
    /// PCI byte (0 or 1 depending on the addressing variant).
    pub fn decode(data: &Bytes, start_of_data: usize) -> Result<Pdu, DecodeError> {
        if data.len() < start_of_data {
            return Err(DecodeError::EmptyFrame);
        }

        let payload = data.slice(start_of_data..);

        if payload.is_empty() {
            return Err(DecodeError::EmptyFrame);
        }

        let pci = PciByte::from_bytes([payload[0]]);
        let frame_type = pci
            .frame_type_or_err()
            .map_err(|error| DecodeError::UnknownFrameType(error.invalid_bytes))?;

        match frame_type {
            FrameType::Single => Self::decode_single(&payload),
            FrameType::First => Self::decode_first(&payload),
            FrameType::Consecutive => Ok(Pdu::Consecutive(ConsecutiveFrame {
                seq_num: pci.low_nibble(),
                data: payload.slice(1..),
            })),
            FrameType::FlowControl => Self::decode_flow_control(&payload),
        }
    }

    fn decode_single(payload: &Bytes) -> Result<Pdu, DecodeError> {
        let length = payload[0] & 0xF;

        if length != 0 {
            if length as usize > payload.len() - 1 {
                return Err(DecodeError::SingleFrameLengthExceedsData {
                    length,
                    room: payload.len() - 1,
                });
            }

            return Ok(Pdu::Single(SingleFrame {
                length,
                data: payload.slice(1..1 + length as usize),
                escape_sequence: false,
            }));
        }

        // Length nibble of zero announces the escape form
        if payload.len() < 2 {
            return Err(DecodeError::TruncatedSingleFrame);
        }

        let length = payload[1];

        if length == 0 {
            return Err(DecodeError::ZeroLengthSingleFrame);
        }

        if length as usize > payload.len() - 2 {
            return Err(DecodeError::SingleFrameLengthExceedsData {
                length,
                room: payload.len() - 2,
            });
        }

        Ok(Pdu::Single(SingleFrame {
            length,
            data: payload.slice(2..2 + length as usize),
            escape_sequence: true,
        }))
    }

    fn decode_first(payload: &Bytes) -> Result<Pdu, DecodeError> {
        if payload.len() < 2 {
            return Err(DecodeError::TruncatedFirstFrame);
        }

        let pci = FirstFramePci::from_bytes([payload[0], payload[1]]);
        let length = pci.frame_length() as u32;

        if length != 0 {
            let end = 2 + (length as usize).min(payload.len() - 2);

            return Ok(Pdu::First(FirstFrame {
                length,
                data: payload.slice(2..end),
                escape_sequence: false,
            }));
        }

        // A 12 bit length of zero announces the 32 bit escape field
        if payload.len() < 6 {
            return Err(DecodeError::TruncatedFirstFrame);
        }

        let length = BigEndian::read_u32(&payload[2..6]);
        let end = 6 + (length as usize).min(payload.len() - 6);

        Ok(Pdu::First(FirstFrame {
            length,
            data: payload.slice(6..end),
            escape_sequence: true,
        }))
    }

    fn decode_flow_control(payload: &Bytes) -> Result<Pdu, DecodeError> {
        if payload.len() < 3 {
            return Err(DecodeError::TruncatedFlowControl);
        }

        let pci = FlowControlPci::from_bytes([payload[0], payload[1], payload[2]]);
        let flow_status = pci
            .flow_status_or_err()
            .map_err(|error| DecodeError::UnknownFlowStatus(error.invalid_bytes))?;

        let st_min = pci.st_min();

        Ok(Pdu::FlowControl(FlowControl {
            flow_status,
            block_size: pci.block_size(),
            st_min,
            separation_time: decode_separation_time(st_min)?,
        }))
    }
}

impl SingleFrame {
    /// Builds the payload bytes of a Single frame, choosing the small or
    /// escape form by data length. `data` must fit the negotiated frame
    /// size, which the transmit path guarantees.
    pub fn encode(prefix: Option<u8>, data: &[u8]) -> BytesMut {
        let mut payload = BytesMut::with_capacity(MAX_PAYLOAD_FD);

        if let Some(byte) = prefix {
            payload.extend_from_slice(&[byte]);
        }

        if data.len() <= SMALL_SINGLE_FRAME_MAX_DATA {
            let pci = SinglePci::new()
                .with_frame_type(FrameType::Single)
                .with_length(data.len() as u8);
            payload.extend_from_slice(&pci.into_bytes());
        } else {
            let pci = SinglePci::new().with_frame_type(FrameType::Single).with_length(0);
            payload.extend_from_slice(&pci.into_bytes());
            payload.extend_from_slice(&[data.len() as u8]);
        }

        payload.extend_from_slice(data);
        payload
    }
}

impl FirstFrame {
    /// Builds the payload bytes of a First frame announcing `frame_length`
    /// bytes in total and carrying `chunk` as the head of the message
    pub fn encode(prefix: Option<u8>, frame_length: usize, chunk: &[u8]) -> BytesMut {
        let mut payload = BytesMut::with_capacity(MAX_PAYLOAD_FD);

        if let Some(byte) = prefix {
            payload.extend_from_slice(&[byte]);
        }

        if frame_length <= SMALL_FIRST_FRAME_MAX_LENGTH {
            let pci = FirstFramePci::new()
                .with_frame_type(FrameType::First)
                .with_frame_length(frame_length as u16);
            payload.extend_from_slice(&pci.into_bytes());
        } else {
            // Escape form: zero 12 bit length, then the real one on 32 bits
            let pci = FirstFramePci::new().with_frame_type(FrameType::First).with_frame_length(0);
            payload.extend_from_slice(&pci.into_bytes());

            let mut length = [0u8; 4];
            BigEndian::write_u32(&mut length, frame_length as u32);
            payload.extend_from_slice(&length);
        }

        payload.extend_from_slice(chunk);
        payload
    }
}

impl ConsecutiveFrame {
    /// Builds the payload bytes of a Consecutive frame. The sequence number
    /// wraps modulo 16.
    pub fn encode(prefix: Option<u8>, seq_num: u8, chunk: &[u8]) -> BytesMut {
        let mut payload = BytesMut::with_capacity(MAX_PAYLOAD_FD);

        if let Some(byte) = prefix {
            payload.extend_from_slice(&[byte]);
        }

        let pci = ConsecutivePci::new()
            .with_frame_type(FrameType::Consecutive)
            .with_seq_num(seq_num & 0xF);
        payload.extend_from_slice(&pci.into_bytes());
        payload.extend_from_slice(chunk);
        payload
    }
}

impl FlowControl {
    /// Builds the payload bytes of a Flow Control frame
    pub fn encode(prefix: Option<u8>, flow_status: FlowStatus, block_size: u8, st_min: u8) -> BytesMut {
        let mut payload = BytesMut::with_capacity(MAX_PAYLOAD_FD);

        if let Some(byte) = prefix {
            payload.extend_from_slice(&[byte]);
        }

        let pci = FlowControlPci::new()
            .with_frame_type(FrameType::FlowControl)
            .with_flow_status(flow_status)
            .with_block_size(block_size)
            .with_st_min(st_min);
        payload.extend_from_slice(&pci.into_bytes());
        payload
    }
}

/// Decodes the STmin byte of a flow control frame.
///
/// 0x00..=0x7F are whole milliseconds, 0xF1..=0xF9 are 100 µs steps, every
/// other value is reserved and rejected.
pub fn decode_separation_time(raw: u8) -> Result<Microseconds<u32>, DecodeError> {
    match raw {
        0x00..=0x7F => Ok(Microseconds(raw as u32 * 1_000)),
        0xF1..=0xF9 => Ok(Microseconds((raw as u32 - 0xF0) * 100)),
        _ => Err(DecodeError::InvalidStMin(raw)),
    }
}

/// Inverse of [decode_separation_time]: returns the STmin byte expressing
/// the given separation time exactly, `None` when no byte value does
pub fn encode_separation_time(time: Microseconds<u32>) -> Option<u8> {
    let micros = time.0;

    if micros % 1_000 == 0 && micros / 1_000 <= 0x7F {
        return Some((micros / 1_000) as u8);
    }

    if micros % 100 == 0 && (100..=900).contains(&micros) {
        return Some(0xF0 + (micros / 100) as u8);
    }

    None
}
