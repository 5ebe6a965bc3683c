//!# CAN frame value object
//!
//! [CanFrame] describes a single frame on the bus, classical CAN or CAN FD,
//! in either direction. It is a plain value: constructing one performs no
//! validation unless [CanFrame::validate] is called explicitly, mirroring
//! drivers that deliver whatever appeared on the wire.
//!
//! Frames deliberately do not implement `PartialEq`. Containers treat them as
//! opaque values; content comparison goes through [CanFrame::compare_with],
//! which takes a timestamp tolerance and can ignore the Tx/Rx direction.
//!
//!```
//! use cantp::frame::CanFrame;
//! use embedded_can::StandardId;
//!
//! let frame = CanFrame::new(StandardId::new(0x7E0).unwrap(), &[0x02, 0x3E, 0x00]);
//! assert_eq!(frame.dlc, 3);
//! assert!(frame.validate().is_ok());
//!```
use bytes::Bytes;
use embedded_can::Id;

/// Maximum payload of a classical CAN frame
pub const MAX_PAYLOAD_CLASSIC: usize = 8;

/// Maximum payload of a CAN FD frame
pub const MAX_PAYLOAD_FD: usize = 64;

/// Payload length for each of the 16 DLC codes.
/// Codes 0 to 8 map directly, the upper codes are CAN FD sizes.
pub const DLC_LENGTHS: [usize; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

/// Default tolerance applied when comparing frame timestamps
pub const DEFAULT_TIMESTAMP_DELTA: f64 = 1.0e-6;

/// Possible errors when validating or sizing a [CanFrame]
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum FrameError {
    /// Payload length exceeds what any DLC code can describe
    ImpossibleSize(usize),

    /// DLC code outside the 4 bit range
    InvalidDlc(u8),

    /// Timestamp is negative, infinite or NaN
    InvalidTimestamp(f64),

    /// Remote frames may not carry data
    RemoteFrameWithData,

    /// A frame cannot be remote and an error frame at the same time
    RemoteAndErrorFrame,

    /// Classical frame where the DLC does not match the payload length
    DlcMismatch {
        dlc: u8,
        length: usize,
    },

    /// CAN FD frame with a payload length no DLC code describes
    InvalidFdLength(usize),

    /// Bit rate switch or error state indicator set on a classical frame
    FdFlagsOnClassicFrame,
}

impl core::fmt::Display for FrameError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FrameError::ImpossibleSize(size) => {
                write!(f, "no DLC describes a payload of {size} bytes")
            }
            FrameError::InvalidDlc(dlc) => write!(f, "DLC {dlc} is out of range"),
            FrameError::InvalidTimestamp(ts) => write!(f, "timestamp {ts} is not a valid instant"),
            FrameError::RemoteFrameWithData => write!(f, "remote frames may not carry data"),
            FrameError::RemoteAndErrorFrame => {
                write!(f, "a frame cannot be a remote and an error frame at the same time")
            }
            FrameError::DlcMismatch { dlc, length } => {
                write!(f, "DLC {dlc} does not match payload length {length}")
            }
            FrameError::InvalidFdLength(length) => {
                write!(f, "{length} bytes is not a valid CAN FD payload length")
            }
            FrameError::FdFlagsOnClassicFrame => {
                write!(f, "bit rate switch and error state indicator require a CAN FD frame")
            }
        }
    }
}

/// Returns the smallest DLC code whose payload size holds `length` bytes
pub fn length_to_dlc(length: usize) -> Result<u8, FrameError> {
    for (dlc, size) in DLC_LENGTHS.iter().enumerate() {
        if *size >= length {
            return Ok(dlc as u8);
        }
    }

    Err(FrameError::ImpossibleSize(length))
}

/// Returns the payload length encoded by the given DLC code
pub fn dlc_to_length(dlc: u8) -> Result<usize, FrameError> {
    DLC_LENGTHS
        .get(dlc as usize)
        .copied()
        .ok_or(FrameError::InvalidDlc(dlc))
}

/// Returns the smallest legal frame payload size holding `length` bytes.
/// Identity for classical sizes, next CAN FD step above eight bytes.
pub fn next_frame_length(length: usize) -> Result<usize, FrameError> {
    if length <= MAX_PAYLOAD_CLASSIC {
        return Ok(length);
    }

    for size in DLC_LENGTHS {
        if size >= length {
            return Ok(size);
        }
    }

    Err(FrameError::ImpossibleSize(length))
}

/// A single frame as seen on the bus
#[derive(Debug, Clone)]
pub struct CanFrame {
    /// Reception timestamp in seconds, 0.0 when not set
    pub timestamp: f64,

    /// Arbitration ID, standard (11 bit) or extended (29 bit)
    pub id: Id,

    /// Remote transmission request, carries no data
    pub is_remote_frame: bool,

    /// Error frame as reported by the controller
    pub is_error_frame: bool,

    /// Channel index of the delivering interface, if any
    pub channel: Option<u8>,

    /// Data length code: the payload length for classical frames,
    /// the table index for CAN FD frames (see [DLC_LENGTHS])
    pub dlc: u8,

    /// Payload bytes
    pub data: Bytes,

    /// CAN FD frame
    pub is_fd: bool,

    /// Direction: received from the bus rather than queued for transmit
    pub is_rx: bool,

    /// Data phase used the second bit rate (CAN FD only)
    pub bitrate_switch: bool,

    /// Transmitting node was error passive (CAN FD only)
    pub error_state_indicator: bool,
}

impl Default for CanFrame {
    fn default() -> Self {
        Self {
            timestamp: 0.0,
            id: Id::Standard(embedded_can::StandardId::ZERO),
            is_remote_frame: false,
            is_error_frame: false,
            channel: None,
            dlc: 0,
            data: Bytes::new(),
            is_fd: false,
            is_rx: true,
            bitrate_switch: false,
            error_state_indicator: false,
        }
    }
}

impl CanFrame {
    /// Creates a received data frame with the DLC derived from the payload
    /// length and the FD flag set for payloads beyond eight bytes
    pub fn new(id: impl Into<Id>, data: &[u8]) -> Self {
        Self {
            id: id.into(),
            dlc: data.len() as u8,
            is_fd: data.len() > MAX_PAYLOAD_CLASSIC,
            data: Bytes::copy_from_slice(data),
            ..Self::default()
        }
    }

    /// Raw arbitration ID value
    pub fn raw_id(&self) -> u32 {
        match self.id {
            Id::Standard(id) => id.as_raw() as u32,
            Id::Extended(id) => id.as_raw(),
        }
    }

    /// True for 29 bit arbitration IDs
    pub fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    /// Strict structural validation.
    ///
    /// The ID ranges of the bus are enforced by [embedded_can::Id] already;
    /// this checks the remaining invariants: flag exclusivity, DLC/payload
    /// consistency and a finite, non-negative timestamp.
    pub fn validate(&self) -> Result<(), FrameError> {
        if self.timestamp < 0.0 || self.timestamp.is_infinite() || self.timestamp.is_nan() {
            return Err(FrameError::InvalidTimestamp(self.timestamp));
        }

        if self.is_remote_frame && self.is_error_frame {
            return Err(FrameError::RemoteAndErrorFrame);
        }

        if self.is_remote_frame && !self.data.is_empty() {
            return Err(FrameError::RemoteFrameWithData);
        }

        if !self.is_fd && (self.bitrate_switch || self.error_state_indicator) {
            return Err(FrameError::FdFlagsOnClassicFrame);
        }

        if !self.is_remote_frame {
            if self.is_fd {
                if !DLC_LENGTHS.contains(&self.data.len()) {
                    return Err(FrameError::InvalidFdLength(self.data.len()));
                }
            } else if self.dlc as usize != self.data.len() || self.data.len() > MAX_PAYLOAD_CLASSIC {
                return Err(FrameError::DlcMismatch {
                    dlc: self.dlc,
                    length: self.data.len(),
                });
            }
        }

        Ok(())
    }

    /// Content comparison.
    ///
    /// Timestamps match when they differ by at most `timestamp_delta`;
    /// `None` opts out of timestamp comparison entirely. The direction flag
    /// is only considered with `check_direction`.
    pub fn compare_with(
        &self,
        other: &CanFrame,
        timestamp_delta: Option<f64>,
        check_direction: bool,
    ) -> bool {
        let timestamps_match = match timestamp_delta {
            None => true,
            Some(delta) => {
                let diff = self.timestamp - other.timestamp;
                let diff = if diff < 0.0 { -diff } else { diff };
                diff <= delta
            }
        };

        timestamps_match
            && (self.is_rx == other.is_rx || !check_direction)
            && self.id == other.id
            && self.dlc == other.dlc
            && self.data == other.data
            && self.is_remote_frame == other.is_remote_frame
            && self.is_error_frame == other.is_error_frame
            && self.channel == other.channel
            && self.is_fd == other.is_fd
            && self.bitrate_switch == other.bitrate_switch
            && self.error_state_indicator == other.error_state_indicator
    }
}
