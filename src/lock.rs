//! Poison-tolerant access to the std locks guarding cache tables.
//!
//! A panic inside a loader's `destroy` or a caller's thread must not take
//! the whole cache down with it, so poisoned locks are recovered and logged.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    cache: &str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    lock.read().unwrap_or_else(|poisoned| {
        warn!(cache, op, lock_kind = "rwlock.read", "recovered from poisoned lock");
        poisoned.into_inner()
    })
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    cache: &str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    lock.write().unwrap_or_else(|poisoned| {
        warn!(cache, op, lock_kind = "rwlock.write", "recovered from poisoned lock");
        poisoned.into_inner()
    })
}

pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    cache: &str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        warn!(cache, op, lock_kind = "mutex.lock", "recovered from poisoned lock");
        poisoned.into_inner()
    })
}
