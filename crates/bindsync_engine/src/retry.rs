//! Conversion of store-level contention into retryable errors.

use crate::error::{SyncError, SyncResult};
use bindsync_store::{BindingId, BindingStore, RowLockGuard, StoreError, StoreResult};
use std::time::Duration;

/// Runs `op`, turning a uniqueness violation into [`SyncError::Retryable`].
///
/// Two workers creating the same binding at once is expected under load.
/// The loser retries after `delay` and then finds the winner's row. Every
/// other store error propagates unchanged.
pub fn retry_unique_violation<T>(
    delay: Duration,
    op: impl FnOnce() -> StoreResult<T>,
) -> SyncResult<T> {
    match op() {
        Ok(value) => Ok(value),
        Err(err @ StoreError::UniqueViolation { .. }) => {
            tracing::warn!(error = %err, "binding created concurrently, will retry");
            Err(SyncError::retryable(
                format!("A database error caused the failure of the job: {err}. Likely due to 2 concurrent jobs wanting to create the same record. The job will be retried later."),
                delay,
            ))
        }
        Err(err) => Err(err.into()),
    }
}

/// Takes the row lock of a binding without waiting.
///
/// A held lock becomes [`SyncError::Retryable`] with `delay`.
pub fn lock_or_retry(
    store: &dyn BindingStore,
    id: BindingId,
    delay: Duration,
) -> SyncResult<RowLockGuard> {
    match store.try_lock(id) {
        Ok(guard) => Ok(guard),
        Err(StoreError::LockUnavailable { .. }) => {
            tracing::warn!(binding = %id, "binding already locked, will retry");
            Err(SyncError::retryable(
                format!("A concurrent job is already exporting the same record (binding {id}). The job will be retried later."),
                delay,
            ))
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindsync_store::{BackendId, LocalId, MemoryBindingStore, Model, NewBinding};

    #[test]
    fn unique_violation_becomes_retryable() {
        let store = MemoryBindingStore::new();
        let new = NewBinding::placeholder(BackendId(1), Model::new("uom.uom"), LocalId(1));
        store.insert(new.clone()).unwrap();

        let err = retry_unique_violation(Duration::from_secs(5), || store.insert(new)).unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));
        assert!(err.to_string().contains("concurrent jobs"));
    }

    #[test]
    fn other_errors_pass_through() {
        let err = retry_unique_violation(Duration::from_secs(5), || -> StoreResult<()> {
            Err(StoreError::NotFound(BindingId(3)))
        })
        .unwrap_err();
        assert!(matches!(err, SyncError::Store(StoreError::NotFound(_))));
        assert!(!err.is_retryable());
    }

    #[test]
    fn held_lock_becomes_retryable() {
        let store = MemoryBindingStore::new();
        let binding = store
            .insert(NewBinding::placeholder(BackendId(1), Model::new("uom.uom"), LocalId(1)))
            .unwrap();
        let _guard = lock_or_retry(&store, binding.id, Duration::from_secs(5)).unwrap();

        let err = lock_or_retry(&store, binding.id, Duration::from_secs(5)).unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));
    }
}
