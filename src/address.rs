//!# Network addressing information (N_AI)
//!
//! ISO 15765-2 defines seven addressing variants that differ in which
//! identifiers describe an endpoint pair, how transmit arbitration IDs are
//! formed, whether a one byte prefix precedes every PDU and how incoming
//! frames are recognized. [Address] validates the identifier set for its
//! variant once at construction and precomputes everything the transport
//! layer needs per frame afterwards.
//!
//!```
//! use cantp::address::{Address, AddressConfiguration, AddressingMode};
//!
//! let address = Address::new(AddressConfiguration {
//!     addressing_mode: AddressingMode::Normal11Bits,
//!     tx_id: Some(0x7E0),
//!     rx_id: Some(0x7E8),
//!     ..AddressConfiguration::default()
//! }).unwrap();
//!
//! assert_eq!(address.rx_prefix_size(), 0);
//!```
use crate::frame::CanFrame;
use core::fmt;
use embedded_can::{ExtendedId, Id, StandardId};
use log::warn;
use serde::{Deserialize, Serialize};

/// The seven addressing variants of ISO 15765-2
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressingMode {
    Normal11Bits,
    Normal29Bits,
    NormalFixed29Bits,
    Extended11Bits,
    Extended29Bits,
    Mixed11Bits,
    Mixed29Bits,
}

impl Default for AddressingMode {
    fn default() -> Self {
        Self::Normal11Bits
    }
}

/// Target address type: 1-to-1 or 1-to-n communication
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressType {
    Physical,
    Functional,
}

impl Default for AddressType {
    fn default() -> Self {
        Self::Physical
    }
}

/// Identifier set handed to [Address::new]. Which fields are required
/// depends on the addressing mode; unneeded ones stay `None`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressConfiguration {
    pub addressing_mode: AddressingMode,

    /// CAN ID for transmission (Normal, Extended and Mixed 11 bit modes)
    pub tx_id: Option<u32>,

    /// CAN ID for reception (Normal, Extended and Mixed 11 bit modes)
    pub rx_id: Option<u32>,

    /// Target address N_TA (NormalFixed, Extended and Mixed 29 bit modes)
    pub target_address: Option<u8>,

    /// Source address N_SA (NormalFixed and Mixed 29 bit modes; matched
    /// against the prefix byte of incoming frames in Extended modes)
    pub source_address: Option<u8>,

    /// Address extension N_AE (Mixed modes)
    pub address_extension: Option<u8>,
}

/// Possible errors when constructing an [Address]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// A field required by the addressing mode was left unset
    MissingParameter(&'static str),

    /// tx_id and rx_id must differ in Normal and Extended modes
    SameTxAndRxId,

    /// Arbitration ID outside the range of the mode's identifier width
    IdOutOfRange(u32),
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressError::MissingParameter(what) => {
                write!(f, "{what} must be specified for this addressing mode")
            }
            AddressError::SameTxAndRxId => write!(f, "txid and rxid must be different"),
            AddressError::IdOutOfRange(id) => {
                write!(f, "arbitration ID 0x{id:X} is out of range for this addressing mode")
            }
        }
    }
}

/// True for IDs inside the ranges ISO 15765-2 keeps reserved
/// (0x7F4..0x7F6 and 0x7FA..0x7FB, both exclusive)
pub fn overlaps_reserved_range(id: u32) -> bool {
    (0x7F4 < id && id < 0x7F6) || (0x7FA < id && id < 0x7FB)
}

/// Validated addressing information with precomputed arbitration IDs
#[derive(Debug, Clone)]
pub struct Address {
    addressing_mode: AddressingMode,
    tx_id: Option<u32>,
    rx_id: Option<u32>,
    target_address: Option<u8>,
    source_address: Option<u8>,
    address_extension: Option<u8>,
    is_29bits: bool,
    tx_arbitration_id_physical: Id,
    tx_arbitration_id_functional: Id,
    rx_arbitration_id_physical: Id,
    rx_arbitration_id_functional: Id,
    tx_payload_prefix: Option<u8>,
}

impl Address {
    /// Validates the identifier set for the addressing mode and precomputes
    /// the transmit and receive arbitration IDs and the payload prefix.
    ///
    /// IDs overlapping the ranges reserved by ISO 15765-2 are reported with
    /// a warning but accepted.
    pub fn new(config: AddressConfiguration) -> Result<Self, AddressError> {
        let mode = config.addressing_mode;
        let is_29bits = matches!(
            mode,
            AddressingMode::Normal29Bits
                | AddressingMode::NormalFixed29Bits
                | AddressingMode::Extended29Bits
                | AddressingMode::Mixed29Bits
        );

        Self::validate(&config)?;

        for id in [config.tx_id, config.rx_id].into_iter().flatten() {
            if overlaps_reserved_range(id) {
                warn!(
                    "Address ID 0x{id:03X} overlaps the range reserved by ISO 15765-2 \
                     (0x7F4-0x7F6 and 0x7FA-0x7FB)"
                );
            }
        }

        let tx_payload_prefix = match mode {
            AddressingMode::Extended11Bits | AddressingMode::Extended29Bits => config.target_address,
            AddressingMode::Mixed11Bits | AddressingMode::Mixed29Bits => config.address_extension,
            _ => None,
        };

        Ok(Self {
            addressing_mode: mode,
            tx_id: config.tx_id,
            rx_id: config.rx_id,
            target_address: config.target_address,
            source_address: config.source_address,
            address_extension: config.address_extension,
            is_29bits,
            tx_arbitration_id_physical: Self::tx_arbitration_id_for(&config, is_29bits, AddressType::Physical)?,
            tx_arbitration_id_functional: Self::tx_arbitration_id_for(&config, is_29bits, AddressType::Functional)?,
            rx_arbitration_id_physical: Self::rx_arbitration_id_for(&config, is_29bits, AddressType::Physical)?,
            rx_arbitration_id_functional: Self::rx_arbitration_id_for(&config, is_29bits, AddressType::Functional)?,
            tx_payload_prefix,
        })
    }

    fn validate(config: &AddressConfiguration) -> Result<(), AddressError> {
        match config.addressing_mode {
            AddressingMode::Normal11Bits | AddressingMode::Normal29Bits => {
                if config.tx_id.is_none() || config.rx_id.is_none() {
                    return Err(AddressError::MissingParameter("txid and rxid"));
                }

                if config.tx_id == config.rx_id {
                    return Err(AddressError::SameTxAndRxId);
                }
            }
            AddressingMode::NormalFixed29Bits => {
                if config.target_address.is_none() || config.source_address.is_none() {
                    return Err(AddressError::MissingParameter("target_address and source_address"));
                }
            }
            AddressingMode::Extended11Bits | AddressingMode::Extended29Bits => {
                if config.target_address.is_none() || config.tx_id.is_none() || config.rx_id.is_none() {
                    return Err(AddressError::MissingParameter("target_address, rxid and txid"));
                }

                if config.tx_id == config.rx_id {
                    return Err(AddressError::SameTxAndRxId);
                }
            }
            AddressingMode::Mixed11Bits => {
                if config.tx_id.is_none() || config.rx_id.is_none() || config.address_extension.is_none() {
                    return Err(AddressError::MissingParameter("rxid, txid and address_extension"));
                }
            }
            AddressingMode::Mixed29Bits => {
                if config.target_address.is_none()
                    || config.source_address.is_none()
                    || config.address_extension.is_none()
                {
                    return Err(AddressError::MissingParameter(
                        "target_address, source_address and address_extension",
                    ));
                }
            }
        }

        Ok(())
    }

    fn tx_arbitration_id_for(
        config: &AddressConfiguration,
        is_29bits: bool,
        address_type: AddressType,
    ) -> Result<Id, AddressError> {
        let raw = match config.addressing_mode {
            AddressingMode::NormalFixed29Bits => {
                let target_type = match address_type {
                    AddressType::Physical => 0x00DA_0000,
                    AddressType::Functional => 0x00DB_0000,
                };
                Self::fixed_arbitration_id(target_type, config.target_address, config.source_address)?
            }
            AddressingMode::Mixed29Bits => {
                let target_type = match address_type {
                    AddressType::Physical => 0x00CE_0000,
                    AddressType::Functional => 0x00CD_0000,
                };
                Self::fixed_arbitration_id(target_type, config.target_address, config.source_address)?
            }
            _ => config.tx_id.ok_or(AddressError::MissingParameter("txid"))?,
        };

        Self::make_id(raw, is_29bits)
    }

    fn rx_arbitration_id_for(
        config: &AddressConfiguration,
        is_29bits: bool,
        address_type: AddressType,
    ) -> Result<Id, AddressError> {
        let raw = match config.addressing_mode {
            AddressingMode::NormalFixed29Bits => {
                let target_type = match address_type {
                    AddressType::Physical => 0x00DA_0000,
                    AddressType::Functional => 0x00DB_0000,
                };
                Self::fixed_arbitration_id(target_type, config.source_address, config.target_address)?
            }
            AddressingMode::Mixed29Bits => {
                let target_type = match address_type {
                    AddressType::Physical => 0x00CE_0000,
                    AddressType::Functional => 0x00CD_0000,
                };
                Self::fixed_arbitration_id(target_type, config.source_address, config.target_address)?
            }
            _ => config.rx_id.ok_or(AddressError::MissingParameter("rxid"))?,
        };

        Self::make_id(raw, is_29bits)
    }

    /// 29 bit layout of the fixed modes: priority and target type in the
    /// upper bits, then N_TA and N_SA
    fn fixed_arbitration_id(
        target_type: u32,
        target_address: Option<u8>,
        source_address: Option<u8>,
    ) -> Result<u32, AddressError> {
        let target = target_address.ok_or(AddressError::MissingParameter("target_address"))? as u32;
        let source = source_address.ok_or(AddressError::MissingParameter("source_address"))? as u32;

        Ok(0x1800_0000 | target_type | (target << 8) | source)
    }

    fn make_id(raw: u32, is_29bits: bool) -> Result<Id, AddressError> {
        if is_29bits {
            ExtendedId::new(raw)
                .map(Id::Extended)
                .ok_or(AddressError::IdOutOfRange(raw))
        } else {
            if raw > StandardId::MAX.as_raw() as u32 {
                return Err(AddressError::IdOutOfRange(raw));
            }

            StandardId::new(raw as u16)
                .map(Id::Standard)
                .ok_or(AddressError::IdOutOfRange(raw))
        }
    }

    pub fn addressing_mode(&self) -> AddressingMode {
        self.addressing_mode
    }

    /// True for the 29 bit addressing variants
    pub fn is_29bits(&self) -> bool {
        self.is_29bits
    }

    /// Arbitration ID for outgoing frames
    pub fn tx_arbitration_id(&self, address_type: AddressType) -> Id {
        match address_type {
            AddressType::Physical => self.tx_arbitration_id_physical,
            AddressType::Functional => self.tx_arbitration_id_functional,
        }
    }

    /// Arbitration ID expected on incoming frames
    pub fn rx_arbitration_id(&self, address_type: AddressType) -> Id {
        match address_type {
            AddressType::Physical => self.rx_arbitration_id_physical,
            AddressType::Functional => self.rx_arbitration_id_functional,
        }
    }

    /// Byte prepended to every outgoing PDU, if the mode uses one
    pub fn tx_payload_prefix(&self) -> Option<u8> {
        self.tx_payload_prefix
    }

    /// Number of payload bytes preceding the PCI on incoming frames
    pub fn rx_prefix_size(&self) -> usize {
        match self.addressing_mode {
            AddressingMode::Extended11Bits
            | AddressingMode::Extended29Bits
            | AddressingMode::Mixed11Bits
            | AddressingMode::Mixed29Bits => 1,
            _ => 0,
        }
    }

    /// True when the mode carries an extension byte in the payload
    pub fn requires_extension_byte(&self) -> bool {
        self.tx_payload_prefix.is_some()
    }

    /// Decides whether an incoming frame is directed at this endpoint
    pub fn accepts(&self, frame: &CanFrame) -> bool {
        if frame.is_extended() != self.is_29bits {
            return false;
        }

        let arbitration_id = frame.raw_id();

        match self.addressing_mode {
            AddressingMode::Normal11Bits | AddressingMode::Normal29Bits => {
                Some(arbitration_id) == self.rx_id
            }
            AddressingMode::Extended11Bits | AddressingMode::Extended29Bits => {
                Some(arbitration_id) == self.rx_id
                    && self.source_address.is_some()
                    && frame.data.first().copied() == self.source_address
            }
            AddressingMode::NormalFixed29Bits => {
                let target_type = (arbitration_id >> 16) & 0xFF;

                (target_type == 0xDA || target_type == 0xDB)
                    && Some(((arbitration_id >> 8) & 0xFF) as u8) == self.source_address
                    && Some((arbitration_id & 0xFF) as u8) == self.target_address
            }
            AddressingMode::Mixed11Bits => {
                Some(arbitration_id) == self.rx_id
                    && self.address_extension.is_some()
                    && frame.data.first().copied() == self.address_extension
            }
            AddressingMode::Mixed29Bits => {
                let target_type = (arbitration_id >> 16) & 0xFF;

                (target_type == 0xCD || target_type == 0xCE)
                    && Some(((arbitration_id >> 8) & 0xFF) as u8) == self.source_address
                    && Some((arbitration_id & 0xFF) as u8) == self.target_address
                    && frame.data.first().copied() == self.address_extension
            }
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?} -", self.addressing_mode)?;

        if let Some(target) = self.target_address {
            write!(f, " target_address:0x{target:02X}")?;
        }

        if let Some(source) = self.source_address {
            write!(f, " source_address:0x{source:02X}")?;
        }

        if let Some(extension) = self.address_extension {
            write!(f, " address_extension:0x{extension:02X}")?;
        }

        if let Some(tx_id) = self.tx_id {
            if self.is_29bits {
                write!(f, " tx_id:0x{tx_id:08X}")?;
            } else {
                write!(f, " tx_id:0x{tx_id:03X}")?;
            }
        }

        if let Some(rx_id) = self.rx_id {
            if self.is_29bits {
                write!(f, " rx_id:0x{rx_id:08X}")?;
            } else {
                write!(f, " rx_id:0x{rx_id:03X}")?;
            }
        }

        write!(f, "]")
    }
}
