//! # In-memory doubles for doc examples
//!
//! Stand-ins for the injected clock and bus used by the examples in the
//! module documentation. Real deployments inject their own clock source and
//! bus driver instead.
use crate::frame::CanFrame;
use crate::transport::CanInterface;
use alloc::collections::VecDeque;
use core::cell::RefCell;
use core::convert::Infallible;
use embedded_time::clock::Error;
use embedded_time::duration::Duration;
use embedded_time::fixed_point::FixedPoint;
use embedded_time::fraction::Fraction;
use embedded_time::timer::param::{Armed, OneShot};
use embedded_time::{Clock, Instant, Timer};

/// Microsecond clock advancing 100 µs on every reading
#[derive(Debug, Default)]
pub struct ExampleClock {
    now: RefCell<u64>,
}

impl Clock for ExampleClock {
    type T = u64;
    const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000_000);

    fn try_now(&self) -> Result<Instant<Self>, Error> {
        let mut now = self.now.borrow_mut();
        *now += 100;

        Ok(Instant::new(*now))
    }

    fn new_timer<Dur: Duration + FixedPoint>(&self, duration: Dur) -> Timer<OneShot, Armed, Self, Dur> {
        Timer::new(self, duration)
    }
}

/// Bus double backed by two frame queues. Frames pushed to `rx_queue` are
/// handed to the layer, frames the layer emits accumulate in `tx_queue`.
#[derive(Debug, Default)]
pub struct ExampleBus {
    pub rx_queue: VecDeque<CanFrame>,
    pub tx_queue: VecDeque<CanFrame>,
}

impl CanInterface for ExampleBus {
    type Error = Infallible;

    fn receive(&mut self) -> Result<Option<CanFrame>, Self::Error> {
        Ok(self.rx_queue.pop_front())
    }

    fn transmit(&mut self, frame: &CanFrame) -> Result<(), Self::Error> {
        self.tx_queue.push_back(frame.clone());
        Ok(())
    }
}
