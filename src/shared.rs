//! ==============================================================================
//! shared.rs - the one piece of cross-task state, plus the stop signal
//! ==============================================================================
//!
//! purpose:
//!     exactly one value crosses the task boundary: the latest smoothed
//!     frequency. it lives behind a single mutex whose critical section is
//!     one float assignment or one float read, which bounds the sampling
//!     task's worst-case stall to the duration of a single store.
//!
//! discipline:
//!     - SamplingTask writes every tick, unconditionally
//!     - ReportingTask reads on its own cadence and tolerates missed
//!       intermediate values (it only ever needs the latest)
//!     - no I/O or blocking call is ever made while holding the lock
//!
//! the stop signal is the explicit cancellation token replacing a polled
//! global boolean: set once by the reporting task on fatal failure, checked
//! once per sampling iteration.
//!
//! ==============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// latest smoothed reading, shared between the two tasks
#[derive(Clone, Default)]
pub struct SharedReading {
    value: Arc<Mutex<f64>>,
}

impl SharedReading {
    pub fn new() -> Self {
        Self::default()
    }

    /// overwrite with the newest smoothed value (producer side)
    pub fn store(&self, value: f64) {
        let mut guard = self
            .value
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = value;
    }

    /// atomic snapshot of the latest committed value (consumer side)
    pub fn load(&self) -> f64 {
        *self
            .value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// cooperative one-shot cancellation token
#[derive(Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
