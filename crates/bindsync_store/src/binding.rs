//! The binding row and query filters.

use crate::types::{BackendId, BindingId, ExternalId, LocalId, Model, Timestamp};
use serde::{Deserialize, Serialize};

/// A persistent link between a local record and its remote counterpart.
///
/// The binding references the local business record by id only. Any data
/// about the record itself is read through the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    /// Row id.
    pub id: BindingId,
    /// Remote system this binding belongs to.
    pub backend_id: BackendId,
    /// Entity kind.
    pub model: Model,
    /// Local record id.
    pub local_id: LocalId,
    /// Remote record id, `None` until the record exists remotely.
    pub external_id: Option<ExternalId>,
    /// Last confirmed synchronization, `None` until the first transfer.
    pub sync_timestamp: Option<Timestamp>,
    /// Soft-delete flag.
    pub active: bool,
}

impl Binding {
    /// Returns true if the record already exists on the remote side.
    #[must_use]
    pub fn is_exported(&self) -> bool {
        self.external_id.is_some()
    }

    /// Returns true if the remote record changed after the last sync.
    ///
    /// A missing timestamp on either side counts as changed.
    #[must_use]
    pub fn is_stale(&self, remote_write_date: Option<Timestamp>) -> bool {
        match (self.sync_timestamp, remote_write_date) {
            (Some(synced), Some(remote)) => synced < remote,
            _ => true,
        }
    }
}

/// Values for a binding row that does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBinding {
    /// Remote system.
    pub backend_id: BackendId,
    /// Entity kind.
    pub model: Model,
    /// Local record id.
    pub local_id: LocalId,
    /// Remote record id, if already known.
    pub external_id: Option<ExternalId>,
    /// Initial synchronization timestamp.
    pub sync_timestamp: Option<Timestamp>,
}

impl NewBinding {
    /// A placeholder binding: known locally, not yet created remotely.
    #[must_use]
    pub fn placeholder(backend_id: BackendId, model: Model, local_id: LocalId) -> Self {
        Self {
            backend_id,
            model,
            local_id,
            external_id: None,
            sync_timestamp: None,
        }
    }

    /// Sets the remote id.
    #[must_use]
    pub fn with_external_id(mut self, external_id: ExternalId) -> Self {
        self.external_id = Some(external_id);
        self
    }

    /// Sets the synchronization timestamp.
    #[must_use]
    pub fn with_sync_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.sync_timestamp = Some(timestamp);
        self
    }
}

/// Filter for listing bindings.
///
/// Unset fields match everything. Inactive rows are excluded unless
/// `include_inactive` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingFilter {
    /// Restrict to one backend.
    pub backend_id: Option<BackendId>,
    /// Restrict to one model.
    pub model: Option<Model>,
    /// Restrict to one local record.
    pub local_id: Option<LocalId>,
    /// Restrict to one remote record.
    pub external_id: Option<ExternalId>,
    /// Only bindings that have no remote id yet.
    pub unexported_only: bool,
    /// Also return soft-deleted rows.
    pub include_inactive: bool,
}

impl BindingFilter {
    /// A filter matching every active binding.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to a backend.
    #[must_use]
    pub fn backend(mut self, backend_id: BackendId) -> Self {
        self.backend_id = Some(backend_id);
        self
    }

    /// Restricts to a model.
    #[must_use]
    pub fn model(mut self, model: Model) -> Self {
        self.model = Some(model);
        self
    }

    /// Restricts to a local record.
    #[must_use]
    pub fn local_id(mut self, local_id: LocalId) -> Self {
        self.local_id = Some(local_id);
        self
    }

    /// Restricts to a remote record.
    #[must_use]
    pub fn external_id(mut self, external_id: ExternalId) -> Self {
        self.external_id = Some(external_id);
        self
    }

    /// Only bindings without a remote id.
    #[must_use]
    pub fn unexported_only(mut self) -> Self {
        self.unexported_only = true;
        self
    }

    /// Includes soft-deleted rows.
    #[must_use]
    pub fn include_inactive(mut self) -> Self {
        self.include_inactive = true;
        self
    }

    /// Returns true if `binding` satisfies every set criterion.
    #[must_use]
    pub fn matches(&self, binding: &Binding) -> bool {
        if !self.include_inactive && !binding.active {
            return false;
        }
        if self.unexported_only && binding.external_id.is_some() {
            return false;
        }
        self.backend_id.map_or(true, |b| b == binding.backend_id)
            && self.model.as_ref().map_or(true, |m| *m == binding.model)
            && self.local_id.map_or(true, |l| l == binding.local_id)
            && self
                .external_id
                .map_or(true, |e| Some(e) == binding.external_id)
    }
}
