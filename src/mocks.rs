use crate::frame::CanFrame;
use crate::transport::CanInterface;
use alloc::collections::VecDeque;
use alloc::rc::Rc;
use core::cell::RefCell;
use core::convert::Infallible;
use embedded_time::clock::Error as ClockError;
use embedded_time::duration::Duration;
use embedded_time::fixed_point::FixedPoint;
use embedded_time::fraction::Fraction;
use embedded_time::timer::param::{Armed, OneShot};
use embedded_time::{Clock, Instant, Timer};
use mockall::mock;

/// Microsecond clock under full test control, advanced explicitly
#[derive(Debug, Default)]
pub struct TestClock {
    now: RefCell<u64>,
}

impl TestClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward by the given number of microseconds
    pub fn advance(&self, micros: u64) {
        *self.now.borrow_mut() += micros;
    }
}

impl Clock for TestClock {
    type T = u64;
    const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000_000);

    fn try_now(&self) -> Result<Instant<Self>, ClockError> {
        Ok(Instant::new(*self.now.borrow()))
    }

    fn new_timer<Dur: Duration + FixedPoint>(&self, duration: Dur) -> Timer<OneShot, Armed, Self, Dur> {
        Timer::new(self, duration)
    }
}

pub type FrameQueue = Rc<RefCell<VecDeque<CanFrame>>>;

/// Scripted bus double built on shared frame queues, letting tests inspect
/// the wire and link two layers back to back
pub struct TestBus {
    pub rx: FrameQueue,
    pub tx: FrameQueue,
}

impl TestBus {
    pub fn new() -> Self {
        Self {
            rx: Rc::new(RefCell::new(VecDeque::new())),
            tx: Rc::new(RefCell::new(VecDeque::new())),
        }
    }

    /// Two buses wired so that everything one transmits the other receives
    pub fn linked_pair() -> (Self, Self) {
        let a_to_b: FrameQueue = Rc::new(RefCell::new(VecDeque::new()));
        let b_to_a: FrameQueue = Rc::new(RefCell::new(VecDeque::new()));

        (
            Self {
                rx: b_to_a.clone(),
                tx: a_to_b.clone(),
            },
            Self {
                rx: a_to_b,
                tx: b_to_a,
            },
        )
    }
}

impl CanInterface for TestBus {
    type Error = Infallible;

    fn receive(&mut self) -> Result<Option<CanFrame>, Self::Error> {
        Ok(self.rx.borrow_mut().pop_front())
    }

    fn transmit(&mut self, frame: &CanFrame) -> Result<(), Self::Error> {
        self.tx.borrow_mut().push_back(frame.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusFault {
    Offline,
}

mock! {
    pub Bus {}

    impl CanInterface for Bus {
        type Error = BusFault;

        fn receive(&mut self) -> Result<Option<CanFrame>, BusFault>;
        fn transmit(&mut self, frame: &CanFrame) -> Result<(), BusFault>;
    }
}
