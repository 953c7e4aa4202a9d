//! Per-model extension points of the state machines.
//!
//! Every method has a default that lets the transfer proceed unchanged, so
//! an implementation only overrides what its model needs.

use crate::connector::Connector;
use crate::error::SyncResult;
use crate::outcome::Phase;
use crate::record::{reference_id, LocalRecord, Payload, RemoteRecord};
use bindsync_store::{Binding, ExternalId, LocalId, Model};

/// A local record that must be exported before the current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportDependency {
    /// Model of the dependency.
    pub model: Model,
    /// Local id of the dependency.
    pub local_id: LocalId,
    /// Export even if the dependency already has a remote id.
    pub always: bool,
}

impl ExportDependency {
    /// A dependency that is exported on every run.
    pub fn new(model: impl Into<Model>, local_id: LocalId) -> Self {
        Self {
            model: model.into(),
            local_id,
            always: true,
        }
    }

    /// Only export the dependency while it has no remote id.
    pub fn only_if_unbound(mut self) -> Self {
        self.always = false;
        self
    }
}

/// A remote record that must be imported before the current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDependency {
    /// Model of the dependency.
    pub model: Model,
    /// Remote id of the dependency.
    pub external_id: ExternalId,
    /// Import even if already bound, bypassing the staleness check.
    pub force: bool,
}

impl ImportDependency {
    /// A dependency imported only while it is not bound yet.
    pub fn new(model: impl Into<Model>, external_id: ExternalId) -> Self {
        Self {
            model: model.into(),
            external_id,
            force: false,
        }
    }

    /// Always import, even when already bound.
    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

/// Hooks of the export state machine.
pub trait ExportHooks: Send + Sync {
    /// Decides whether to skip the record before anything is sent.
    fn must_skip(
        &self,
        _conn: &Connector,
        _binding: &Binding,
        _record: &LocalRecord,
    ) -> SyncResult<Phase> {
        Ok(Phase::Proceed)
    }

    /// Runs before dependencies are exported.
    fn before_export(
        &self,
        _conn: &Connector,
        _binding: &Binding,
        _record: &LocalRecord,
    ) -> SyncResult<()> {
        Ok(())
    }

    /// Declares records that must exist remotely first.
    fn export_dependencies(
        &self,
        _conn: &Connector,
        _record: &LocalRecord,
    ) -> SyncResult<Vec<ExportDependency>> {
        Ok(Vec::new())
    }

    /// Matches an unbound record to an existing remote one, e.g. by a
    /// unique code, so it is updated instead of created twice.
    fn external_id_with_data(
        &self,
        _conn: &Connector,
        _binding: &Binding,
        _record: &LocalRecord,
    ) -> SyncResult<Option<ExternalId>> {
        Ok(None)
    }

    /// Runs after the record is bound.
    fn after_export(
        &self,
        _conn: &Connector,
        _binding: &Binding,
        _record: &LocalRecord,
    ) -> SyncResult<()> {
        Ok(())
    }
}

/// Hooks of the import state machine.
pub trait ImportHooks: Send + Sync {
    /// Vetoes the import before the remote record is read.
    fn init_import(
        &self,
        _conn: &Connector,
        _binding: Option<&Binding>,
        _external_id: ExternalId,
    ) -> SyncResult<Phase> {
        Ok(Phase::Proceed)
    }

    /// Finds an existing binding from the remote data when none is bound to
    /// the external id, e.g. for records re-created remotely.
    fn binding_with_data(
        &self,
        _conn: &Connector,
        _record: &RemoteRecord,
    ) -> SyncResult<Option<Binding>> {
        Ok(None)
    }

    /// Decides whether to skip once the remote data is known.
    fn must_skip(
        &self,
        _conn: &Connector,
        _binding: Option<&Binding>,
        _record: &RemoteRecord,
    ) -> SyncResult<Phase> {
        Ok(Phase::Proceed)
    }

    /// Runs before dependencies are imported.
    fn before_import(&self, _conn: &Connector, _record: &RemoteRecord) -> SyncResult<()> {
        Ok(())
    }

    /// Declares remote records that must exist locally first.
    fn import_dependencies(
        &self,
        _conn: &Connector,
        _record: &RemoteRecord,
    ) -> SyncResult<Vec<ImportDependency>> {
        Ok(Vec::new())
    }

    /// Rejects a mapped payload with a data error.
    fn validate_data(&self, _conn: &Connector, _payload: &Payload) -> SyncResult<()> {
        Ok(())
    }

    /// Runs after the record is bound.
    fn after_import(
        &self,
        _conn: &Connector,
        _binding: &Binding,
        _record: &RemoteRecord,
    ) -> SyncResult<()> {
        Ok(())
    }

    /// Queue priority for this record when a batch import delays it.
    fn batch_priority(&self, _external_id: ExternalId) -> Option<u8> {
        None
    }
}

/// Hooks that accept every default.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl ExportHooks for DefaultHooks {}
impl ImportHooks for DefaultHooks {}

/// Declares dependencies from reference fields.
///
/// Each registered field holds the id of a record of another model, either
/// bare or as an `[id, name]` pair. On export the value is a local id; on
/// import it is a remote id.
#[derive(Debug, Default, Clone)]
pub struct ReferenceDependencies {
    references: Vec<(String, Model)>,
}

impl ReferenceDependencies {
    /// No references.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a reference field pointing at `model`.
    pub fn reference(mut self, field: impl Into<String>, model: impl Into<Model>) -> Self {
        self.references.push((field.into(), model.into()));
        self
    }
}

impl ExportHooks for ReferenceDependencies {
    fn export_dependencies(
        &self,
        _conn: &Connector,
        record: &LocalRecord,
    ) -> SyncResult<Vec<ExportDependency>> {
        Ok(self
            .references
            .iter()
            .filter_map(|(field, model)| {
                let id = record.get(field).and_then(reference_id)?;
                Some(ExportDependency::new(model.clone(), LocalId(id)))
            })
            .collect())
    }
}

impl ImportHooks for ReferenceDependencies {
    fn import_dependencies(
        &self,
        _conn: &Connector,
        record: &RemoteRecord,
    ) -> SyncResult<Vec<ImportDependency>> {
        Ok(self
            .references
            .iter()
            .filter_map(|(field, model)| {
                let id = record.get(field).and_then(reference_id)?;
                Some(ImportDependency::new(model.clone(), ExternalId::new(id)?))
            })
            .collect())
    }
}
