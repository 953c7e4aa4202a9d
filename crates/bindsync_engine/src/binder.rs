//! Translation between local and external ids.

use crate::clock::Clock;
use crate::error::{SyncError, SyncResult};
use crate::retry::retry_unique_violation;
use bindsync_store::{
    BackendId, Binding, BindingStore, ExternalId, LocalId, Model, NewBinding,
};
use std::sync::Arc;
use std::time::Duration;

/// Looks up and updates the bindings of one model on one backend.
///
/// The binder is the only component that writes `external_id` and
/// `sync_timestamp`. It is cheap to build; the connector hands out a fresh
/// one per model on demand.
#[derive(Clone)]
pub struct Binder {
    store: Arc<dyn BindingStore>,
    clock: Arc<dyn Clock>,
    backend_id: BackendId,
    model: Model,
    conflict_retry_delay: Duration,
}

impl std::fmt::Debug for Binder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binder")
            .field("backend_id", &self.backend_id)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl Binder {
    /// Creates a binder.
    pub fn new(
        store: Arc<dyn BindingStore>,
        clock: Arc<dyn Clock>,
        backend_id: BackendId,
        model: Model,
    ) -> Self {
        Self {
            store,
            clock,
            backend_id,
            model,
            conflict_retry_delay: Duration::from_secs(5),
        }
    }

    /// Sets the delay requested when a binding insert loses a race.
    pub fn with_conflict_retry_delay(mut self, delay: Duration) -> Self {
        self.conflict_retry_delay = delay;
        self
    }

    /// The model this binder works on.
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// The backend this binder works on.
    pub fn backend_id(&self) -> BackendId {
        self.backend_id
    }

    /// Returns the binding of a remote record, active or not.
    pub fn to_internal(&self, external_id: ExternalId) -> SyncResult<Option<Binding>> {
        Ok(self
            .store
            .find_by_external(self.backend_id, &self.model, external_id)?)
    }

    /// Returns the local record id bound to a remote record.
    pub fn to_internal_local(&self, external_id: ExternalId) -> SyncResult<Option<LocalId>> {
        Ok(self.to_internal(external_id)?.map(|b| b.local_id))
    }

    /// Returns the current remote id of a binding.
    ///
    /// Reads the row again so a stale copy held by the caller does not hide
    /// an id bound in the meantime.
    pub fn to_external(&self, binding: &Binding) -> SyncResult<Option<ExternalId>> {
        let current = self
            .store
            .get(binding.id)?
            .ok_or(SyncError::BindingNotFound(binding.id))?;
        Ok(current.external_id)
    }

    /// Returns the remote id bound to a local record.
    pub fn to_external_local(&self, local_id: LocalId) -> SyncResult<Option<ExternalId>> {
        Ok(self
            .store
            .find_by_local(self.backend_id, &self.model, local_id, true)?
            .and_then(|b| b.external_id))
    }

    /// Binds a binding row to a remote id and refreshes its timestamp.
    ///
    /// Binding the same id twice only moves the timestamp forward.
    pub fn bind(&self, external_id: ExternalId, binding: &Binding) -> SyncResult<Binding> {
        let mut row = self
            .store
            .get(binding.id)?
            .ok_or(SyncError::BindingNotFound(binding.id))?;
        row.external_id = Some(external_id);
        row.sync_timestamp = Some(self.clock.now());

        retry_unique_violation(self.conflict_retry_delay, || self.store.update(&row))?;
        tracing::debug!(model = %self.model, binding = %row.id, external_id = %external_id, "bound");
        Ok(row)
    }

    /// Binds a local record to a remote id, creating its binding if needed.
    pub fn bind_local(&self, external_id: ExternalId, local_id: LocalId) -> SyncResult<Binding> {
        match self
            .store
            .find_by_local(self.backend_id, &self.model, local_id, true)?
        {
            Some(binding) => self.bind(external_id, &binding),
            None => {
                let new = NewBinding::placeholder(self.backend_id, self.model.clone(), local_id)
                    .with_external_id(external_id)
                    .with_sync_timestamp(self.clock.now());
                let binding =
                    retry_unique_violation(self.conflict_retry_delay, || self.store.insert(new))?;
                tracing::debug!(model = %self.model, binding = %binding.id, external_id = %external_id, "bound new binding");
                Ok(binding)
            }
        }
    }

    /// Returns the binding of a local record, creating a placeholder if none
    /// exists.
    ///
    /// The placeholder has no remote id and no timestamp. It is committed
    /// before this returns, independently of whatever the caller does next.
    pub fn ensure_binding(&self, local_id: LocalId, include_inactive: bool) -> SyncResult<Binding> {
        if let Some(binding) =
            self.store
                .find_by_local(self.backend_id, &self.model, local_id, include_inactive)?
        {
            return Ok(binding);
        }

        let new = NewBinding::placeholder(self.backend_id, self.model.clone(), local_id);
        let binding = retry_unique_violation(self.conflict_retry_delay, || self.store.insert(new))?;
        tracing::debug!(model = %self.model, binding = %binding.id, local_id = %local_id, "created placeholder binding");
        Ok(binding)
    }
}
