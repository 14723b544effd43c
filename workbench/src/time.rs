//! Clocks and timer-gated coalescing.
//!
//! This module provides:
//!
//! * [`Clock`]: a trait for time sources, implemented by [`SystemClock`] and
//!   by the manually driven [`ManualClock`],
//! * [`Debouncer`]: a coalescing queue that only delivers the last value
//!   submitted within a quiet window.
//!
//! The workbench never spawns timers on its own. Pending deadlines are owned by
//! the component that created them and are checked when the host event loop
//! calls e.g. [`Workbench::process_pending_timers()`][process].
//!
//! [process]: crate::workbench::Workbench::process_pending_timers

mod clock;
mod debounce;

pub use clock::{Clock, ManualClock, SystemClock};
pub use debounce::Debouncer;
