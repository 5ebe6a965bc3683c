//!# Elapsed-time gate
//!
//! [Timer] measures the time since its last start against a configurable
//! timeout. It owns no clock: every query reads a monotonic instant from an
//! injected [embedded_time::Clock], so tests drive it with a scripted clock
//! and targets supply whatever hardware clock they have.
//!
//! A stopped timer never reports a timeout and has no elapsed time. A
//! *started* timer with a timeout of zero is always timed out; the transport
//! layer uses this as a zero-wait gate for minimum separation times of zero.
use embedded_time::clock::Error as ClockError;
use embedded_time::duration::{Generic, Microseconds};
use embedded_time::{Clock, Instant};

/// Monotonic elapsed-time gate with start/stop and a timeout query
pub struct Timer<C: Clock> {
    timeout: Microseconds<u32>,
    started_at: Option<Instant<C>>,
    deadline: Option<Instant<C>>,
}

impl<C: Clock> Timer<C> {
    /// Creates a stopped timer with the given timeout
    pub fn new(timeout: Microseconds<u32>) -> Self {
        Self {
            timeout,
            started_at: None,
            deadline: None,
        }
    }

    /// Replaces the timeout. A running timer keeps its origin, the deadline
    /// moves with the new timeout.
    pub fn set_timeout(&mut self, timeout: Microseconds<u32>) {
        self.timeout = timeout;

        if let Some(started_at) = self.started_at {
            self.deadline = started_at.checked_add(timeout);
        }
    }

    /// Records the current instant as the new measurement origin
    pub fn start(&mut self, clock: &C) -> Result<(), ClockError> {
        let now = clock.try_now()?;

        self.deadline = now.checked_add(self.timeout);
        self.started_at = Some(now);

        Ok(())
    }

    /// Clears the measurement origin
    pub fn stop(&mut self) {
        self.started_at = None;
        self.deadline = None;
    }

    pub fn is_stopped(&self) -> bool {
        self.started_at.is_none()
    }

    /// Time since the last start, `None` while stopped
    pub fn elapsed(&self, clock: &C) -> Result<Option<Generic<C::T>>, ClockError> {
        let started_at = match &self.started_at {
            None => return Ok(None),
            Some(instant) => instant,
        };

        Ok(clock.try_now()?.checked_duration_since(started_at))
    }

    /// True once the elapsed time exceeds the timeout. A timeout of zero
    /// fires immediately after start; a stopped timer never fires.
    pub fn is_timed_out(&self, clock: &C) -> Result<bool, ClockError> {
        if self.is_stopped() {
            return Ok(false);
        }

        if self.timeout == Microseconds(0u32) {
            return Ok(true);
        }

        match &self.deadline {
            None => Ok(false),
            Some(deadline) => Ok(clock.try_now()? > *deadline),
        }
    }
}
