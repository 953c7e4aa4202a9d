//! In-memory binding store for testing.

use crate::binding::{Binding, BindingFilter, NewBinding};
use crate::error::{StoreError, StoreResult};
use crate::lock::{RowLockGuard, RowLocks};
use crate::store::BindingStore;
use crate::table::BindingTable;
use crate::types::{BackendId, BindingId, ExternalId, LocalId, Model};
use parking_lot::RwLock;

/// An in-memory binding store.
///
/// Suitable for unit tests, integration tests and deployments that rebuild
/// their bindings on start. Thread-safe; share it behind an `Arc`.
///
/// # Example
///
/// ```rust
/// use bindsync_store::{BackendId, BindingStore, LocalId, MemoryBindingStore, Model, NewBinding};
///
/// let store = MemoryBindingStore::new();
/// let model = Model::new("uom.uom");
/// store.insert(NewBinding::placeholder(BackendId(1), model.clone(), LocalId(3))).unwrap();
/// let found = store.find_by_local(BackendId(1), &model, LocalId(3), false).unwrap();
/// assert!(found.is_some());
/// ```
#[derive(Debug, Default)]
pub struct MemoryBindingStore {
    table: RwLock<BindingTable>,
    locks: RowLocks,
}

impl MemoryBindingStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated from a table.
    ///
    /// Useful for testing recovery scenarios.
    #[must_use]
    pub fn with_table(table: BindingTable) -> Self {
        Self {
            table: RwLock::new(table),
            locks: RowLocks::new(),
        }
    }

    /// Returns a copy of the whole table.
    #[must_use]
    pub fn table(&self) -> BindingTable {
        self.table.read().clone()
    }

    /// Number of rows, including inactive ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    /// Returns true if the store has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }
}

impl BindingStore for MemoryBindingStore {
    fn get(&self, id: BindingId) -> StoreResult<Option<Binding>> {
        Ok(self.table.read().get(id).cloned())
    }

    fn find_by_local(
        &self,
        backend_id: BackendId,
        model: &Model,
        local_id: LocalId,
        include_inactive: bool,
    ) -> StoreResult<Option<Binding>> {
        Ok(self
            .table
            .read()
            .find_by_local(backend_id, model, local_id)
            .filter(|b| include_inactive || b.active)
            .cloned())
    }

    fn find_by_external(
        &self,
        backend_id: BackendId,
        model: &Model,
        external_id: ExternalId,
    ) -> StoreResult<Option<Binding>> {
        Ok(self
            .table
            .read()
            .find_by_external(backend_id, model, external_id)
            .cloned())
    }

    fn list(&self, filter: &BindingFilter) -> StoreResult<Vec<Binding>> {
        Ok(self.table.read().list(filter))
    }

    fn insert(&self, binding: NewBinding) -> StoreResult<Binding> {
        self.table.write().insert(binding)
    }

    fn update(&self, binding: &Binding) -> StoreResult<()> {
        self.table.write().update(binding)
    }

    fn try_lock(&self, id: BindingId) -> StoreResult<RowLockGuard> {
        if self.table.read().get(id).is_none() {
            return Err(StoreError::NotFound(id));
        }
        self.locks.try_lock(id)
    }
}
