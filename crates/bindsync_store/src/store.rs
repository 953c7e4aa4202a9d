//! Binding store trait definition.

use crate::binding::{Binding, BindingFilter, NewBinding};
use crate::error::StoreResult;
use crate::lock::RowLockGuard;
use crate::types::{BackendId, BindingId, ExternalId, LocalId, Model};

/// Persistent storage for bindings.
///
/// # Invariants
///
/// - At most one row per `(backend_id, model, local_id)` and at most one per
///   `(backend_id, model, external_id)`. Inactive rows count.
/// - `insert` and `update` report collisions as
///   [`crate::StoreError::UniqueViolation`] and leave the table unchanged.
/// - Every successful mutation is durable before the call returns.
/// - `try_lock` never blocks.
///
/// # Implementors
///
/// - [`crate::MemoryBindingStore`] - For testing
/// - [`crate::FileBindingStore`] - For persistent storage
pub trait BindingStore: Send + Sync {
    /// Gets a binding by row id.
    fn get(&self, id: BindingId) -> StoreResult<Option<Binding>>;

    /// Finds the binding of a local record.
    ///
    /// Inactive rows are only returned when `include_inactive` is set.
    fn find_by_local(
        &self,
        backend_id: BackendId,
        model: &Model,
        local_id: LocalId,
        include_inactive: bool,
    ) -> StoreResult<Option<Binding>>;

    /// Finds the binding of a remote record, active or not.
    fn find_by_external(
        &self,
        backend_id: BackendId,
        model: &Model,
        external_id: ExternalId,
    ) -> StoreResult<Option<Binding>>;

    /// Lists bindings matching a filter, ordered by row id.
    fn list(&self, filter: &BindingFilter) -> StoreResult<Vec<Binding>>;

    /// Inserts a new binding and returns the stored row.
    fn insert(&self, binding: NewBinding) -> StoreResult<Binding>;

    /// Replaces an existing binding row.
    fn update(&self, binding: &Binding) -> StoreResult<()>;

    /// Locks a binding row exclusively, failing immediately if it is held.
    fn try_lock(&self, id: BindingId) -> StoreResult<RowLockGuard>;
}
