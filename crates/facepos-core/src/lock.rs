//! Timed exclusive acquisition for the shared on-disk resources.
//!
//! Every guard is scoped: dropping it (including on `?` early return)
//! releases the resource.

use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::DbError;

fn conflict(resource: &str, waited: Duration) -> DbError {
    tracing::warn!(resource, ?waited, "lock acquisition timed out");
    DbError::ConcurrentWriteConflict {
        resource: resource.to_string(),
        waited,
    }
}

pub(crate) fn lock<'a, T>(
    m: &'a Mutex<T>,
    resource: &str,
    timeout: Duration,
) -> Result<MutexGuard<'a, T>, DbError> {
    m.try_lock_for(timeout).ok_or_else(|| conflict(resource, timeout))
}

pub(crate) fn read<'a, T>(
    l: &'a RwLock<T>,
    resource: &str,
    timeout: Duration,
) -> Result<RwLockReadGuard<'a, T>, DbError> {
    l.try_read_for(timeout).ok_or_else(|| conflict(resource, timeout))
}

pub(crate) fn write<'a, T>(
    l: &'a RwLock<T>,
    resource: &str,
    timeout: Duration,
) -> Result<RwLockWriteGuard<'a, T>, DbError> {
    l.try_write_for(timeout).ok_or_else(|| conflict(resource, timeout))
}

/// One mutex per key, created on first use.
///
/// An entry whose only reference is the table's own is idle (nobody can be
/// holding or waiting on it), so it is dropped the next time a handle is taken.
#[derive(Default)]
pub(crate) struct KeyedLocks {
    table: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    /// Handle to the lock for `key`. Lock it with [`lock`].
    pub(crate) fn handle(&self, key: &str) -> Arc<Mutex<()>> {
        let mut table = self.table.lock();
        table.retain(|_, l| Arc::strong_count(l) > 1);
        table.entry(key.to_string()).or_default().clone()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.table.lock().len()
    }
}
