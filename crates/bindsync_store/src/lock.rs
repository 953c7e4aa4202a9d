//! Non-blocking row locks.

use crate::error::{StoreError, StoreResult};
use crate::types::BindingId;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// The set of binding rows currently locked.
///
/// Locks are exclusive and never wait: [`RowLocks::try_lock`] either returns
/// a guard immediately or fails with [`StoreError::LockUnavailable`]. The
/// lock is released when the guard is dropped.
#[derive(Debug, Default, Clone)]
pub struct RowLocks {
    held: Arc<Mutex<HashSet<BindingId>>>,
}

impl RowLocks {
    /// Creates an empty lock set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tries to lock a row without waiting.
    pub fn try_lock(&self, binding_id: BindingId) -> StoreResult<RowLockGuard> {
        let mut held = self.held.lock();
        if !held.insert(binding_id) {
            return Err(StoreError::LockUnavailable { binding_id });
        }
        Ok(RowLockGuard {
            binding_id,
            held: Arc::clone(&self.held),
        })
    }

    /// Returns true if the row is currently locked.
    #[must_use]
    pub fn is_locked(&self, binding_id: BindingId) -> bool {
        self.held.lock().contains(&binding_id)
    }
}

/// Holds a row lock until dropped.
#[derive(Debug)]
#[must_use = "the row is unlocked as soon as the guard is dropped"]
pub struct RowLockGuard {
    binding_id: BindingId,
    held: Arc<Mutex<HashSet<BindingId>>>,
}

impl RowLockGuard {
    /// The locked row.
    #[must_use]
    pub fn binding_id(&self) -> BindingId {
        self.binding_id
    }
}

impl Drop for RowLockGuard {
    fn drop(&mut self) {
        self.held.lock().remove(&self.binding_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lock_fails_fast() {
        let locks = RowLocks::new();
        let guard = locks.try_lock(BindingId(1)).unwrap();
        assert!(locks.is_locked(BindingId(1)));

        let err = locks.try_lock(BindingId(1)).unwrap_err();
        assert!(err.is_lock_unavailable());

        // other rows are independent
        let _other = locks.try_lock(BindingId(2)).unwrap();

        drop(guard);
        assert!(!locks.is_locked(BindingId(1)));
        assert!(locks.try_lock(BindingId(1)).is_ok());
    }

    #[test]
    fn clones_share_state() {
        let locks = RowLocks::new();
        let clone = locks.clone();
        let _guard = locks.try_lock(BindingId(5)).unwrap();
        assert!(clone.try_lock(BindingId(5)).is_err());
    }
}
