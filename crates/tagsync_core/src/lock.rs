//! Lock acquisition with an optional deadline.

use parking_lot::{Mutex, MutexGuard};
use std::time::Duration;

/// Locks `mutex`, waiting at most `timeout` when one is given.
///
/// Returns `None` only when the timeout elapsed. Without a timeout this
/// blocks until the lock is free.
pub fn acquire<T>(mutex: &Mutex<T>, timeout: Option<Duration>) -> Option<MutexGuard<'_, T>> {
    match timeout {
        Some(timeout) => mutex.try_lock_for(timeout),
        None => Some(mutex.lock()),
    }
}
