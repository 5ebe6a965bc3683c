//!# Transport layer configuration
//!
//! The [Configuration] struct gathers every tunable of the transport layer:
//! flow control parameters advertised to the peer, local timeouts, padding
//! and frame size settings. Values are plain fields so hosts can fill them
//! from their own configuration layer (the struct derives serde traits for
//! that purpose); [Configuration::validate] enforces the value sets the
//! standard allows and runs again when a [TransportLayer](crate::transport::TransportLayer)
//! is constructed.
//!
//!```
//! use cantp::config::Configuration;
//!
//! let config = Configuration {
//!     block_size: 4,
//!     tx_padding: Some(0xAA),
//!     ..Configuration::default()
//! };
//!
//! assert!(config.validate().is_ok());
//!```
use crate::frame::DLC_LENGTHS;
use serde::{Deserialize, Serialize};

/// Frame payload sizes a sender may be configured to fill
pub const TX_DATA_LENGTHS: [u8; 8] = [8, 12, 16, 20, 24, 32, 48, 64];

/// Padding byte used when padding is requested without an explicit value
pub const DEFAULT_PADDING_BYTE: u8 = 0xCC;

/// Possible errors when validating a [Configuration]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// tx_data_length outside 8, 12, 16, 20, 24, 32, 48, 64
    InvalidTxDataLength(u8),

    /// tx_data_min_length outside 1..=8 and the CAN FD sizes
    InvalidTxDataMinLength(u8),

    /// tx_data_min_length must not exceed tx_data_length
    TxDataMinLengthExceedsTxDataLength {
        min: u8,
        max: u8,
    },
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::InvalidTxDataLength(value) => {
                write!(f, "tx_data_length must be one of 8, 12, 16, 20, 24, 32, 48, 64, got {value}")
            }
            ConfigError::InvalidTxDataMinLength(value) => {
                write!(
                    f,
                    "tx_data_min_length must be one of 1-8, 12, 16, 20, 24, 32, 48, 64, got {value}"
                )
            }
            ConfigError::TxDataMinLengthExceedsTxDataLength { min, max } => {
                write!(f, "tx_data_min_length {min} cannot be greater than tx_data_length {max}")
            }
        }
    }
}

/// Tunables of the transport layer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Minimum separation time advertised in our flow controls, raw STmin byte
    pub st_min: u8,

    /// Block size advertised in our flow controls, 0 = no limit
    pub block_size: u8,

    /// Ignore the separation time requested by the peer and transmit
    /// consecutive frames back to back
    pub squash_st_min_requirement: bool,

    /// How long to wait for a flow control after a first frame or a block
    pub rx_flow_control_timeout_ms: u32,

    /// How long to wait for the next consecutive frame while receiving
    pub rx_consecutive_frame_timeout_ms: u32,

    /// Padding byte for outgoing frames. `None` disables padding on
    /// classical frames; CAN FD frames always pad to a legal size, using
    /// [DEFAULT_PADDING_BYTE] when unset.
    pub tx_padding: Option<u8>,

    /// Flow control Wait frames tolerated per transfer, 0 = Wait unsupported
    pub wft_max: u32,

    /// Payload capacity of outgoing frames, one of [TX_DATA_LENGTHS]
    pub tx_data_length: u8,

    /// Pad every outgoing frame to at least this size
    pub tx_data_min_length: Option<u8>,

    /// Largest message length accepted on reception; longer announcements
    /// are answered with a flow control overflow
    pub max_frame_size: u32,

    /// Emit CAN FD frames
    pub can_fd: bool,

    /// Bound of the transmit queue, `None` = unbounded
    pub tx_queue_capacity: Option<usize>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            st_min: 0,
            block_size: 8,
            squash_st_min_requirement: false,
            rx_flow_control_timeout_ms: 1000,
            rx_consecutive_frame_timeout_ms: 1000,
            tx_padding: None,
            wft_max: 0,
            tx_data_length: 8,
            tx_data_min_length: None,
            max_frame_size: 4095,
            can_fd: false,
            tx_queue_capacity: None,
        }
    }
}

impl Configuration {
    /// Checks every field against the value set the standard allows
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !TX_DATA_LENGTHS.contains(&self.tx_data_length) {
            return Err(ConfigError::InvalidTxDataLength(self.tx_data_length));
        }

        if let Some(min) = self.tx_data_min_length {
            if min == 0 || !DLC_LENGTHS.contains(&(min as usize)) {
                return Err(ConfigError::InvalidTxDataMinLength(min));
            }

            if min > self.tx_data_length {
                return Err(ConfigError::TxDataMinLengthExceedsTxDataLength {
                    min,
                    max: self.tx_data_length,
                });
            }
        }

        Ok(())
    }
}
