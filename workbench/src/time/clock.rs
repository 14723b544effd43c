use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::util::lock;

/// A source of monotonic timestamps.
///
/// A clock can be associated to a workbench prior to construction by calling
/// [`WorkbenchBuilder::set_clock()`](crate::workbench::WorkbenchBuilder::set_clock).
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Instant;
}

/// A [`Clock`] based on the system's monotonic clock.
#[derive(Copy, Clone, Debug, Default)]
pub struct SystemClock {}

impl SystemClock {
    /// Constructs a new `SystemClock`.
    pub fn new() -> Self {
        Self {}
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A [`Clock`] that only advances when told to.
///
/// Clones share the same time, so a test can keep a handle and advance the
/// clock of the component under test.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use workbench::time::{Clock, ManualClock};
///
/// let clock = ManualClock::new();
/// let t0 = clock.now();
/// clock.advance(Duration::from_millis(250));
///
/// assert_eq!(clock.now() - t0, Duration::from_millis(250));
/// ```
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    /// Constructs a clock frozen at the current system time.
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, duration: Duration) {
        *lock(&self.now) += duration;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *lock(&self.now)
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock")
            .field("now", &*lock(&self.now))
            .finish()
    }
}
