use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::Clock;

/// A value waiting for its quiet window to elapse.
struct Pending<T> {
    value: T,
    deadline: Instant,
}

/// A timer-gated coalescing queue.
///
/// Successive calls within the debounce window collapse to the argument of the
/// last call, which becomes deliverable once no new call was made for a full
/// window. The pending deadline is owned by the debouncer: cancelling or
/// dropping the debouncer discards the pending value.
///
/// A zero window makes every call immediately deliverable.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use workbench::time::{Debouncer, ManualClock};
///
/// let clock = ManualClock::new();
/// let mut debouncer = Debouncer::new(Duration::from_millis(100), Arc::new(clock.clone()));
///
/// debouncer.call(1);
/// clock.advance(Duration::from_millis(60));
/// debouncer.call(2);
/// clock.advance(Duration::from_millis(60));
/// assert_eq!(debouncer.poll(), None);
///
/// clock.advance(Duration::from_millis(40));
/// assert_eq!(debouncer.poll(), Some(2));
/// ```
pub struct Debouncer<T> {
    window: Duration,
    clock: Arc<dyn Clock>,
    pending: Option<Pending<T>>,
}

impl<T> Debouncer<T> {
    /// Creates a debouncer with the specified quiet window.
    pub fn new(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            window,
            clock,
            pending: None,
        }
    }

    /// Returns the debounce window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Submits a value, replacing any pending value and restarting the
    /// window.
    pub fn call(&mut self, value: T) {
        self.pending = Some(Pending {
            value,
            deadline: self.clock.now() + self.window,
        });
    }

    /// Takes the pending value if its window has elapsed.
    pub fn poll(&mut self) -> Option<T> {
        match &self.pending {
            Some(pending) if pending.deadline <= self.clock.now() => self.flush(),
            _ => None,
        }
    }

    /// Takes the pending value immediately, regardless of its deadline.
    pub fn flush(&mut self) -> Option<T> {
        self.pending.take().map(|pending| pending.value)
    }

    /// Discards the pending value.
    ///
    /// Returns `true` if a value was pending.
    pub fn cancel(&mut self) -> bool {
        self.pending.take().is_some()
    }

    /// Returns `true` if a value is waiting for delivery.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Returns the deadline of the pending value, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|pending| pending.deadline)
    }
}

impl<T> fmt::Debug for Debouncer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debouncer")
            .field("window", &self.window)
            .field("deadline", &self.deadline())
            .finish_non_exhaustive()
    }
}
