//!# ISO 15765-2 transport layer
//!
//! [TransportLayer] segments application messages into CAN frames on
//! transmission and reassembles incoming frames into messages, driving the
//! block based flow control of ISO 15765-2 in both directions. It owns no
//! thread and never blocks: callers pump it by invoking
//! [TransportLayer::process] periodically ([TransportLayer::sleep_time]
//! suggests a poll interval), with the bus injected as a [CanInterface] and
//! time injected as an [embedded_time::Clock].
//!
//! Protocol anomalies never crash the layer. They are delivered to an
//! optional error handler and the affected state machine resets itself.
//! Errors of the injected interface and clock surface unchanged from
//! [TransportLayer::process].
//!
//!```
//! use bytes::Bytes;
//! use cantp::address::{Address, AddressConfiguration, AddressingMode, AddressType};
//! use cantp::config::Configuration;
//! use cantp::example::{ExampleBus, ExampleClock};
//! use cantp::transport::TransportLayer;
//!
//! let clock = ExampleClock::default();
//! let bus = ExampleBus::default();
//!
//! let address = Address::new(AddressConfiguration {
//!     addressing_mode: AddressingMode::Normal11Bits,
//!     tx_id: Some(0x7E0),
//!     rx_id: Some(0x7E8),
//!     ..AddressConfiguration::default()
//! }).unwrap();
//!
//! let mut layer = TransportLayer::new(bus, address, Configuration::default()).unwrap();
//!
//! layer.send(Bytes::from_static(&[0x3E, 0x00]), AddressType::Physical).unwrap();
//! layer.process(&clock).unwrap();
//! ```
use crate::address::{Address, AddressType};
use crate::config::{ConfigError, Configuration, DEFAULT_PADDING_BYTE};
use crate::frame::{
    length_to_dlc, next_frame_length, CanFrame, FrameError, DLC_LENGTHS, MAX_PAYLOAD_CLASSIC,
};
use crate::pdu::{
    ConsecutiveFrame, DecodeError, FirstFrame, FlowControl, FlowStatus, Pdu, SingleFrame,
    SMALL_FIRST_FRAME_MAX_LENGTH, SMALL_SINGLE_FRAME_MAX_DATA,
};
use crate::timer::Timer;
use alloc::boxed::Box;
use alloc::collections::VecDeque;
use bytes::{Bytes, BytesMut};
use core::fmt;
use embedded_can::Id;
use embedded_time::clock::Error as ClockError;
use embedded_time::duration::{Microseconds, Milliseconds};
use embedded_time::Clock;
use log::{debug, warn};

/// Contract of the underlying CAN bus driver
pub trait CanInterface {
    type Error;

    /// Returns the next pending frame, `None` when nothing is buffered.
    /// Must not block.
    fn receive(&mut self) -> Result<Option<CanFrame>, Self::Error>;

    /// Hands one frame to the bus driver for transmission
    fn transmit(&mut self, frame: &CanFrame) -> Result<(), Self::Error>;
}

/// State of the reception state machine
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RxState {
    Idle,
    WaitConsecutiveFrame,
}

/// State of the transmission state machine
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TxState {
    Idle,
    WaitFlowControl,
    TransmitConsecutiveFrame,
}

/// Protocol anomalies delivered to the error handler.
///
/// None of these is fatal: the layer resets the affected state machine and
/// keeps running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame failed to decode into a PDU
    InvalidCanData(DecodeError),

    /// Type nibble outside the four defined PDU kinds
    UnknownFrameType(u8),

    /// Frame without PDU bytes after the addressing prefix
    EmptyFrame,

    /// Single frame longer than 8 bytes without the escape length form
    MissingEscapeSequence,

    /// Reserved STmin byte in a flow control
    InvalidStMin(u8),

    /// First frame received in a frame size ISO 15765-2 does not define
    InvalidCanFdFirstFrameRxDl(usize),

    /// Consecutive frame while no reception was in progress
    UnexpectedConsecutiveFrame,

    /// Consecutive frame out of order; the reception was abandoned
    WrongSequenceNumber {
        expected: u8,
        received: u8,
    },

    /// Consecutive frame in a different frame size than the transfer began
    /// with; the frame was dropped
    ChangingInvalidRxDl {
        expected: usize,
        received: usize,
    },

    /// A single frame displaced an in-progress reception
    ReceptionInterruptedWithSingleFrame,

    /// A first frame displaced an in-progress reception
    ReceptionInterruptedWithFirstFrame,

    /// No consecutive frame arrived within rx_consecutive_frame_timeout
    ConsecutiveFrameTimeout,

    /// First frame announcing more than max_frame_size bytes; answered with
    /// a flow control overflow
    FrameTooLong {
        length: u32,
        max_frame_size: u32,
    },

    /// Flow control while no transmission was in progress
    UnexpectedFlowControl,

    /// Flow control Wait received with wft_max configured to 0
    UnsupportedWaitFrame,

    /// The peer sent more Wait frames than wft_max tolerates; the
    /// transmission was abandoned
    MaximumWaitFrameReached(u32),

    /// No flow control arrived within rx_flow_control_timeout; the
    /// transmission was abandoned
    FlowControlTimeout,

    /// The peer reported a flow control overflow; the transmission was
    /// abandoned
    Overflow,
}

impl From<DecodeError> for ProtocolError {
    fn from(error: DecodeError) -> Self {
        match error {
            DecodeError::EmptyFrame => ProtocolError::EmptyFrame,
            DecodeError::UnknownFrameType(value) => ProtocolError::UnknownFrameType(value),
            DecodeError::InvalidStMin(value) => ProtocolError::InvalidStMin(value),
            other => ProtocolError::InvalidCanData(other),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidCanData(error) => write!(f, "received invalid CAN frame: {error}"),
            ProtocolError::UnknownFrameType(value) => {
                write!(f, "received message with unknown frame type {value}")
            }
            ProtocolError::EmptyFrame => write!(f, "received an empty CAN frame"),
            ProtocolError::MissingEscapeSequence => {
                write!(
                    f,
                    "single frames conveyed on a CAN message with a data length above 8 must \
                     encode their length on byte #1 with byte #0 set to 0x00"
                )
            }
            ProtocolError::InvalidStMin(value) => {
                write!(f, "invalid STmin value 0x{value:02X} received in flow control")
            }
            ProtocolError::InvalidCanFdFirstFrameRxDl(rx_dl) => {
                write!(
                    f,
                    "received a first frame with an RX_DL value of {rx_dl} which is invalid \
                     according to ISO 15765-2"
                )
            }
            ProtocolError::UnexpectedConsecutiveFrame => {
                write!(f, "received a consecutive frame while reception was idle, ignoring")
            }
            ProtocolError::WrongSequenceNumber { expected, received } => {
                write!(
                    f,
                    "received a consecutive frame with the wrong sequence number, expecting \
                     0x{expected:X}, received 0x{received:X}"
                )
            }
            ProtocolError::ChangingInvalidRxDl { expected, received } => {
                write!(
                    f,
                    "received a consecutive frame with RX_DL={received} while expecting \
                     RX_DL={expected}, ignoring frame"
                )
            }
            ProtocolError::ReceptionInterruptedWithSingleFrame => {
                write!(f, "reception interrupted by a new single frame")
            }
            ProtocolError::ReceptionInterruptedWithFirstFrame => {
                write!(f, "reception interrupted by a new first frame")
            }
            ProtocolError::ConsecutiveFrameTimeout => {
                write!(f, "reception of consecutive frame timed out")
            }
            ProtocolError::FrameTooLong { length, max_frame_size } => {
                write!(
                    f,
                    "received a first frame announcing {length} bytes but max_frame_size is \
                     {max_frame_size} bytes, ignoring"
                )
            }
            ProtocolError::UnexpectedFlowControl => {
                write!(f, "received a flow control while transmission was idle, ignoring")
            }
            ProtocolError::UnsupportedWaitFrame => {
                write!(f, "received a flow control requesting to wait but wft_max is set to 0")
            }
            ProtocolError::MaximumWaitFrameReached(count) => {
                write!(f, "received {count} wait frames, the maximum allowed by wft_max")
            }
            ProtocolError::FlowControlTimeout => {
                write!(f, "reception of flow control timed out, stopping transmission")
            }
            ProtocolError::Overflow => {
                write!(f, "received a flow control indicating an overflow, stopping transmission")
            }
        }
    }
}

/// Possible errors when enqueueing a message for transmission
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransmitError {
    /// The transmit queue reached its configured capacity
    QueueFull,

    /// Functional addressing is 1-to-n and cannot use multi-frame transfers
    FunctionalPayloadTooLarge {
        length: usize,
        limit: usize,
    },

    /// Empty payloads have no wire representation
    EmptyPayload,
}

impl fmt::Display for TransmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransmitError::QueueFull => write!(f, "transmit queue is full"),
            TransmitError::FunctionalPayloadTooLarge { length, limit } => {
                write!(
                    f,
                    "cannot send a multi-frame message with a functional target address \
                     ({length} bytes exceed the {limit} byte limit)"
                )
            }
            TransmitError::EmptyPayload => write!(f, "cannot send an empty payload"),
        }
    }
}

/// Possible errors while pumping the layer
#[derive(Debug)]
pub enum ProcessError<E> {
    /// Error surfaced by the injected CAN interface, passed through unchanged
    Interface(E),

    /// The injected clock failed
    Clock(ClockError),

    /// An outbound frame could not be sized
    Frame(FrameError),
}

impl<E> From<ClockError> for ProcessError<E> {
    fn from(error: ClockError) -> Self {
        ProcessError::Clock(error)
    }
}

impl<E> From<FrameError> for ProcessError<E> {
    fn from(error: FrameError) -> Self {
        ProcessError::Frame(error)
    }
}

/// Callback receiving protocol anomalies
pub type ErrorHandler = Box<dyn FnMut(&ProtocolError)>;

struct PendingMessage {
    data: Bytes,
    target_address_type: AddressType,
}

/// The ISO 15765-2 transport layer engine
pub struct TransportLayer<I: CanInterface, C: Clock> {
    interface: I,
    address: Address,
    config: Configuration,
    error_handler: Option<ErrorHandler>,

    tx_queue: VecDeque<PendingMessage>,
    rx_queue: VecDeque<Bytes>,

    rx_state: RxState,
    tx_state: TxState,

    rx_buffer: BytesMut,
    tx_buffer: Bytes,

    /// Length of the message being received
    rx_frame_length: usize,

    /// Sequence number of the previous consecutive frame
    last_seq_num: u8,

    /// Consecutive frames received since the last flow control
    rx_block_counter: u32,

    /// Frame size the current reception started with
    actual_rx_dl: Option<usize>,

    /// Last flow control received, handed to the transmission side.
    /// Queue of one message depth.
    last_flow_control: Option<FlowControl>,

    /// Flow control requested by the reception side, sent by the next pump
    pending_flow_control: Option<FlowStatus>,

    /// Block size granted by the peer's flow control
    remote_block_size: Option<u8>,

    /// Consecutive frames sent since the last flow control
    tx_block_counter: u32,

    /// Sequence number for the next consecutive frame
    tx_seq_num: u8,

    /// Wait frames received during the current transmission
    wft_counter: u32,

    timer_tx_st_min: Timer<C>,
    timer_rx_fc: Timer<C>,
    timer_rx_cf: Timer<C>,
}

impl<I: CanInterface, C: Clock> core::fmt::Debug for TransportLayer<I, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TransportLayer").finish_non_exhaustive()
    }
}

impl<I: CanInterface, C: Clock> TransportLayer<I, C> {
    /// Creates a layer over the given interface and addressing information.
    /// Fails when the configuration holds out-of-set values.
    pub fn new(interface: I, address: Address, config: Configuration) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            interface,
            address,
            error_handler: None,
            tx_queue: VecDeque::new(),
            rx_queue: VecDeque::new(),
            rx_state: RxState::Idle,
            tx_state: TxState::Idle,
            rx_buffer: BytesMut::new(),
            tx_buffer: Bytes::new(),
            rx_frame_length: 0,
            last_seq_num: 0,
            rx_block_counter: 0,
            actual_rx_dl: None,
            last_flow_control: None,
            pending_flow_control: None,
            remote_block_size: None,
            tx_block_counter: 0,
            tx_seq_num: 0,
            wft_counter: 0,
            timer_tx_st_min: Timer::new(Microseconds(0)),
            timer_rx_fc: Timer::new(Microseconds(config.rx_flow_control_timeout_ms.saturating_mul(1_000))),
            timer_rx_cf: Timer::new(Microseconds(
                config.rx_consecutive_frame_timeout_ms.saturating_mul(1_000),
            )),
            config,
        })
    }

    /// Installs a callback receiving every protocol anomaly
    pub fn with_error_handler(mut self, handler: impl FnMut(&ProtocolError) + 'static) -> Self {
        self.error_handler = Some(Box::new(handler));
        self
    }

    /// Enqueues a message for transmission.
    ///
    /// Functional target addressing is 1-to-n and therefore restricted to
    /// payloads fitting a single frame.
    pub fn send(&mut self, data: Bytes, target_address_type: AddressType) -> Result<(), TransmitError> {
        if data.is_empty() {
            return Err(TransmitError::EmptyPayload);
        }

        if let Some(capacity) = self.config.tx_queue_capacity {
            if self.tx_queue.len() >= capacity {
                return Err(TransmitError::QueueFull);
            }
        }

        if target_address_type == AddressType::Functional {
            let length_bytes = if self.config.tx_data_length as usize == MAX_PAYLOAD_CLASSIC {
                1
            } else {
                2
            };
            let limit = self.config.tx_data_length as usize - length_bytes - self.tx_prefix_size();

            if data.len() > limit {
                return Err(TransmitError::FunctionalPayloadTooLarge {
                    length: data.len(),
                    limit,
                });
            }
        }

        self.tx_queue.push_back(PendingMessage {
            data,
            target_address_type,
        });

        Ok(())
    }

    /// Dequeues the next fully reassembled message, if any
    pub fn receive(&mut self) -> Option<Bytes> {
        self.rx_queue.pop_front()
    }

    /// True when a reassembled message is waiting in the reception queue
    pub fn is_available(&self) -> bool {
        !self.rx_queue.is_empty()
    }

    /// True while a message is queued or being transmitted
    pub fn is_transmitting(&self) -> bool {
        !self.tx_queue.is_empty() || self.tx_state != TxState::Idle
    }

    pub fn rx_state(&self) -> RxState {
        self.rx_state
    }

    pub fn tx_state(&self) -> TxState {
        self.tx_state
    }

    /// Pumps the protocol forward without blocking: drains every frame the
    /// interface has buffered, checks the reception timeout and emits as
    /// many frames as the state machines allow.
    pub fn process(&mut self, clock: &C) -> Result<(), ProcessError<I::Error>> {
        while let Some(frame) = self.interface.receive().map_err(ProcessError::Interface)? {
            debug!(
                "Receiving <{:03X}> ({}) {:02X?}",
                frame.raw_id(),
                frame.data.len(),
                &frame.data[..]
            );
            self.process_rx(&frame, clock)?;
        }

        // A reception also times out with the bus gone silent, not only
        // between two received frames
        if self.timer_rx_cf.is_timed_out(clock)? {
            self.report(ProtocolError::ConsecutiveFrameTimeout);
            self.stop_receiving();
        }

        while let Some(frame) = self.process_tx(clock)? {
            debug!(
                "Sending <{:03X}> ({}) {:02X?}",
                frame.raw_id(),
                frame.data.len(),
                &frame.data[..]
            );
            self.interface.transmit(&frame).map_err(ProcessError::Interface)?;
        }

        Ok(())
    }

    /// Clears queues, buffers, counters and timers and idles both state
    /// machines. Idempotent.
    pub fn reset(&mut self) {
        self.tx_queue.clear();
        self.rx_queue.clear();
        self.stop_sending();
        self.stop_receiving();
    }

    /// Suggested poll interval for busy-wait callers, shorter while a
    /// transfer is active
    pub fn sleep_time(&self) -> Milliseconds<u32> {
        match (self.rx_state, self.tx_state) {
            (RxState::Idle, TxState::Idle) => Milliseconds(50),
            (RxState::Idle, TxState::WaitFlowControl) => Milliseconds(10),
            _ => Milliseconds(1),
        }
    }

    fn process_rx(&mut self, frame: &CanFrame, clock: &C) -> Result<(), ProcessError<I::Error>> {
        if !self.address.accepts(frame) {
            return Ok(());
        }

        let pdu = match Pdu::decode(&frame.data, self.address.rx_prefix_size()) {
            Ok(pdu) => pdu,
            Err(error) => {
                self.report(ProtocolError::from(error));
                self.stop_receiving();
                return Ok(());
            }
        };

        if self.timer_rx_cf.is_timed_out(clock)? {
            self.report(ProtocolError::ConsecutiveFrameTimeout);
            self.stop_receiving();
        }

        // Flow control steers the transmission side; one frame deep buffer
        let pdu = match pdu {
            Pdu::FlowControl(flow_control) => {
                let restart_cf_timer = self.rx_state == RxState::WaitConsecutiveFrame
                    && matches!(
                        flow_control.flow_status,
                        FlowStatus::Wait | FlowStatus::ContinueToSend
                    );

                self.last_flow_control = Some(flow_control);

                if restart_cf_timer {
                    self.timer_rx_cf.start(clock)?;
                }

                return Ok(());
            }
            pdu => pdu,
        };

        let can_dl = frame.data.len();
        let rx_dl = can_dl.max(MAX_PAYLOAD_CLASSIC);

        if let Pdu::Single(single) = &pdu {
            if can_dl > MAX_PAYLOAD_CLASSIC && !single.escape_sequence {
                self.report(ProtocolError::MissingEscapeSequence);
                return Ok(());
            }
        }

        match self.rx_state {
            RxState::Idle => {
                self.rx_frame_length = 0;
                self.timer_rx_cf.stop();

                match pdu {
                    Pdu::Single(single) => self.rx_queue.push_back(single.data),
                    Pdu::First(first) => self.start_reception(first, rx_dl, clock)?,
                    Pdu::Consecutive(_) => self.report(ProtocolError::UnexpectedConsecutiveFrame),
                    Pdu::FlowControl(_) => {}
                }
            }
            RxState::WaitConsecutiveFrame => match pdu {
                Pdu::Single(single) => {
                    self.rx_queue.push_back(single.data);
                    self.rx_state = RxState::Idle;
                    self.report(ProtocolError::ReceptionInterruptedWithSingleFrame);
                }
                Pdu::First(first) => {
                    self.start_reception(first, rx_dl, clock)?;
                    self.report(ProtocolError::ReceptionInterruptedWithFirstFrame);
                }
                Pdu::Consecutive(consecutive) => {
                    self.process_consecutive(consecutive, rx_dl, clock)?
                }
                Pdu::FlowControl(_) => {}
            },
        }

        Ok(())
    }

    /// Validates a first frame and opens a multi-frame reception
    fn start_reception(
        &mut self,
        first: FirstFrame,
        rx_dl: usize,
        clock: &C,
    ) -> Result<(), ProcessError<I::Error>> {
        self.rx_buffer.clear();

        if !DLC_LENGTHS.contains(&rx_dl) {
            self.report(ProtocolError::InvalidCanFdFirstFrameRxDl(rx_dl));
            self.stop_receiving();
            return Ok(());
        }

        self.actual_rx_dl = Some(rx_dl);

        if first.length > self.config.max_frame_size {
            self.report(ProtocolError::FrameTooLong {
                length: first.length,
                max_frame_size: self.config.max_frame_size,
            });
            self.request_flow_control(FlowStatus::Overflow);
            self.rx_state = RxState::Idle;
        } else {
            self.rx_state = RxState::WaitConsecutiveFrame;
            self.rx_frame_length = first.length as usize;
            self.rx_buffer.extend_from_slice(&first.data);
            self.request_flow_control(FlowStatus::ContinueToSend);
        }

        self.timer_rx_cf.start(clock)?;
        self.last_seq_num = 0;
        self.rx_block_counter = 0;

        Ok(())
    }

    fn process_consecutive(
        &mut self,
        consecutive: ConsecutiveFrame,
        rx_dl: usize,
        clock: &C,
    ) -> Result<(), ProcessError<I::Error>> {
        let expected = (self.last_seq_num + 1) & 0xF;

        if expected != consecutive.seq_num {
            self.stop_receiving();
            self.report(ProtocolError::WrongSequenceNumber {
                expected,
                received: consecutive.seq_num,
            });
            return Ok(());
        }

        let remaining = self.rx_frame_length - self.rx_buffer.len();

        if let Some(expected_dl) = self.actual_rx_dl {
            if rx_dl != expected_dl && rx_dl < remaining {
                self.report(ProtocolError::ChangingInvalidRxDl {
                    expected: expected_dl,
                    received: rx_dl,
                });
                return Ok(());
            }
        }

        self.timer_rx_cf.start(clock)?;
        self.last_seq_num = consecutive.seq_num;

        // Anything beyond the announced message length is ignored
        let take = remaining.min(consecutive.data.len());
        self.rx_buffer.extend_from_slice(&consecutive.data[..take]);

        if self.rx_buffer.len() >= self.rx_frame_length {
            let message = self.rx_buffer.split().freeze();
            self.rx_queue.push_back(message);
            self.stop_receiving();
        } else {
            self.rx_block_counter += 1;

            if self.config.block_size > 0
                && self.rx_block_counter % self.config.block_size as u32 == 0
            {
                self.request_flow_control(FlowStatus::ContinueToSend);
                // Timer stays off while the peer awaits our flow control,
                // re-armed by the next consecutive frame
                self.timer_rx_cf.stop();
            }
        }

        Ok(())
    }

    fn process_tx(&mut self, clock: &C) -> Result<Option<CanFrame>, ProcessError<I::Error>> {
        // Flow control requested by the reception side bypasses every state
        // gate and timer
        if let Some(flow_status) = self.pending_flow_control.take() {
            return Ok(Some(self.make_flow_control(flow_status)?));
        }

        if let Some(flow_control) = self.last_flow_control.take() {
            if flow_control.flow_status == FlowStatus::Overflow {
                self.stop_sending();
                self.report(ProtocolError::Overflow);
                return Ok(None);
            }

            if self.tx_state == TxState::Idle {
                self.report(ProtocolError::UnexpectedFlowControl);
            } else if flow_control.flow_status == FlowStatus::Wait {
                if self.config.wft_max == 0 {
                    self.report(ProtocolError::UnsupportedWaitFrame);
                } else if self.wft_counter >= self.config.wft_max {
                    self.report(ProtocolError::MaximumWaitFrameReached(self.wft_counter));
                    self.stop_sending();
                } else {
                    self.wft_counter += 1;
                    self.tx_state = TxState::WaitFlowControl;
                    self.timer_rx_fc.start(clock)?;
                }
            } else if flow_control.flow_status == FlowStatus::ContinueToSend
                && !self.timer_rx_fc.is_timed_out(clock)?
            {
                self.wft_counter = 0;
                self.timer_rx_fc.stop();
                self.timer_tx_st_min.set_timeout(flow_control.separation_time);
                self.remote_block_size = Some(flow_control.block_size);

                if self.tx_state == TxState::WaitFlowControl {
                    self.tx_block_counter = 0;
                    self.timer_tx_st_min.start(clock)?;
                }

                self.tx_state = TxState::TransmitConsecutiveFrame;
            }
        }

        if self.timer_rx_fc.is_timed_out(clock)? {
            self.report(ProtocolError::FlowControlTimeout);
            self.stop_sending();
        }

        // Transfer completed by an earlier pump
        if self.tx_state != TxState::Idle && self.tx_buffer.is_empty() {
            self.stop_sending();
        }

        let mut output = None;

        match self.tx_state {
            TxState::Idle => {
                if let Some(message) = self.tx_queue.pop_front() {
                    self.tx_buffer = message.data;

                    let length = self.tx_buffer.len();
                    let size_offset = if length <= SMALL_SINGLE_FRAME_MAX_DATA { 1 } else { 2 };
                    let prefix_size = self.tx_prefix_size();

                    if length <= self.config.tx_data_length as usize - size_offset - prefix_size {
                        let payload =
                            SingleFrame::encode(self.address.tx_payload_prefix(), &self.tx_buffer);
                        let id = self.address.tx_arbitration_id(message.target_address_type);
                        output = Some(self.make_tx_msg(id, payload)?);
                        self.tx_buffer = Bytes::new();
                    } else {
                        let chunk_size = if length <= SMALL_FIRST_FRAME_MAX_LENGTH {
                            self.config.tx_data_length as usize - 2 - prefix_size
                        } else {
                            self.config.tx_data_length as usize - 6 - prefix_size
                        };
                        let chunk = self.tx_buffer.split_to(chunk_size.min(self.tx_buffer.len()));
                        let payload =
                            FirstFrame::encode(self.address.tx_payload_prefix(), length, &chunk);
                        let id = self.address.tx_arbitration_id(AddressType::Physical);
                        output = Some(self.make_tx_msg(id, payload)?);
                        self.tx_state = TxState::WaitFlowControl;
                        self.tx_seq_num = 1;
                        self.timer_rx_fc.start(clock)?;
                    }
                }
            }
            TxState::WaitFlowControl => {
                // Nothing to emit, the next flow control or the timeout
                // moves the state machine
            }
            TxState::TransmitConsecutiveFrame => {
                if self.timer_tx_st_min.is_timed_out(clock)? || self.config.squash_st_min_requirement {
                    let chunk_size =
                        self.config.tx_data_length as usize - 1 - self.tx_prefix_size();
                    let chunk = self.tx_buffer.split_to(chunk_size.min(self.tx_buffer.len()));
                    let payload = ConsecutiveFrame::encode(
                        self.address.tx_payload_prefix(),
                        self.tx_seq_num,
                        &chunk,
                    );
                    let id = self.address.tx_arbitration_id(AddressType::Physical);
                    output = Some(self.make_tx_msg(id, payload)?);
                    self.tx_seq_num = (self.tx_seq_num + 1) & 0xF;
                    self.timer_tx_st_min.start(clock)?;
                    self.tx_block_counter += 1;
                }

                if self.tx_buffer.is_empty() {
                    self.stop_sending();
                } else if self.remote_block_size.map_or(false, |block_size| {
                    block_size != 0 && self.tx_block_counter >= block_size as u32
                }) {
                    self.tx_state = TxState::WaitFlowControl;
                    self.timer_rx_fc.start(clock)?;
                }
            }
        }

        Ok(output)
    }

    /// Pads the final outbound payload in place, then derives the DLC
    fn make_tx_msg(&self, id: Id, mut payload: BytesMut) -> Result<CanFrame, FrameError> {
        self.pad_message_data(&mut payload)?;

        Ok(CanFrame {
            id,
            dlc: self.outbound_dlc(&payload)?,
            data: payload.freeze(),
            is_fd: self.config.can_fd,
            is_rx: false,
            ..CanFrame::default()
        })
    }

    fn make_flow_control(&self, flow_status: FlowStatus) -> Result<CanFrame, FrameError> {
        let payload = FlowControl::encode(
            self.address.tx_payload_prefix(),
            flow_status,
            self.config.block_size,
            self.config.st_min,
        );

        self.make_tx_msg(self.address.tx_arbitration_id(AddressType::Physical), payload)
    }

    fn pad_message_data(&self, payload: &mut BytesMut) -> Result<(), FrameError> {
        let padding_byte = self.config.tx_padding.unwrap_or(DEFAULT_PADDING_BYTE);

        let target_length = if self.config.tx_data_length as usize == MAX_PAYLOAD_CLASSIC {
            match self.config.tx_data_min_length {
                // ISO 15765-2:2016, 10.4.2.1: classical frames only pad when
                // a padding byte was configured
                None => self.config.tx_padding.map(|_| MAX_PAYLOAD_CLASSIC),
                Some(min) => Some(min as usize),
            }
        } else {
            // ISO 15765-2:2016, 10.4.2.3: FD frames always pad up to the
            // next legal size
            let frame_size = next_frame_length(payload.len())?;

            Some(match self.config.tx_data_min_length {
                None => frame_size,
                Some(min) => frame_size.max(min as usize),
            })
        };

        if let Some(target_length) = target_length {
            if payload.len() < target_length {
                payload.resize(target_length, padding_byte);
            }
        }

        Ok(())
    }

    fn outbound_dlc(&self, payload: &BytesMut) -> Result<u8, FrameError> {
        let length = payload.len();

        if self.config.tx_data_length as usize == MAX_PAYLOAD_CLASSIC
            && (length < 2 || length > MAX_PAYLOAD_CLASSIC)
        {
            return Err(FrameError::ImpossibleSize(length));
        }

        length_to_dlc(length)
    }

    fn tx_prefix_size(&self) -> usize {
        usize::from(self.address.tx_payload_prefix().is_some())
    }

    fn request_flow_control(&mut self, flow_status: FlowStatus) {
        self.pending_flow_control = Some(flow_status);
    }

    fn stop_sending(&mut self) {
        self.tx_buffer = Bytes::new();
        self.tx_state = TxState::Idle;
        self.timer_rx_fc.stop();
        self.timer_tx_st_min.stop();
        self.remote_block_size = None;
        self.tx_block_counter = 0;
        self.tx_seq_num = 0;
        self.wft_counter = 0;
    }

    fn stop_receiving(&mut self) {
        self.actual_rx_dl = None;
        self.rx_state = RxState::Idle;
        self.rx_buffer.clear();
        self.pending_flow_control = None;
        self.last_flow_control = None;
        self.timer_rx_cf.stop();
    }

    fn report(&mut self, error: ProtocolError) {
        warn!("{error}");

        if let Some(handler) = self.error_handler.as_mut() {
            handler(&error);
        }
    }
}
