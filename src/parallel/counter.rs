//! Blocking counters used to coordinate readers, workers and the driver

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::error::Cancelled;

#[derive(Debug, Default)]
struct CounterState {
    value: usize,
    cancelled: bool,
}

/// Non-negative counter with a blocking wait for zero.
#[derive(Debug, Default)]
pub struct SynchronizingCounter {
    state: Mutex<CounterState>,
    changed: Condvar,
}

impl SynchronizingCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.add(1);
    }

    pub fn add(&self, amount: usize) {
        let mut state = self.state.lock();
        state.value += amount;
    }

    /// Decrement, waking waiters when the counter reaches zero. Decrementing
    /// at zero is a bookkeeping bug; it is logged and ignored.
    pub fn decrement(&self) {
        let mut state = self.state.lock();
        match state.value.checked_sub(1) {
            Some(value) => {
                state.value = value;
                if value == 0 {
                    self.changed.notify_all();
                }
            }
            None => warn!("Counter decremented below zero, ignoring"),
        }
    }

    pub fn get(&self) -> usize {
        self.state.lock().value
    }

    /// Block until the counter is zero, or the counter is cancelled.
    pub fn await_zero(&self) -> Result<(), Cancelled> {
        let mut state = self.state.lock();
        loop {
            if state.cancelled {
                return Err(Cancelled);
            }
            if state.value == 0 {
                return Ok(());
            }
            self.changed.wait(&mut state);
        }
    }

    /// Release every current and future waiter with [`Cancelled`]. The value
    /// itself stays untouched.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        state.cancelled = true;
        self.changed.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }
}
