//! Internal helpers.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a mutex, recovering the guard if the mutex was poisoned.
///
/// Subscriber callbacks never run while one of the crate's internal locks is
/// held, so a poisoned lock can only result from a panic inside the crate's
/// own bookkeeping, after which the guarded state is still consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
