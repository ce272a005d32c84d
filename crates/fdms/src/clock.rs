//! The injectable clock.
//!
//! All timestamps the service records come from here; the codec hashes
//! the clock value recorded on the receipt, never a second read.

use std::sync::Mutex;

use chrono::{Local, NaiveDateTime};

/// Source of local wall-clock time, second precision.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// The OS clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local().with_nanosecond_zeroed()
    }
}

/// A settable clock for tests.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Move the clock.
    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap()
    }
}

trait NanosecondZeroed {
    fn with_nanosecond_zeroed(self) -> NaiveDateTime;
}

impl NanosecondZeroed for NaiveDateTime {
    fn with_nanosecond_zeroed(self) -> NaiveDateTime {
        use chrono::Timelike;
        self.with_nanosecond(0).unwrap_or(self)
    }
}
