//! Single-record export state machine.

use crate::binder::Binder;
use crate::connector::Connector;
use crate::error::{SyncError, SyncResult};
use crate::hooks::ExportDependency;
use crate::mapper::MapContext;
use crate::outcome::{Outcome, Phase, SkipReason};
use crate::record::reference_id;
use crate::registry::ModelComponents;
use crate::retry::lock_or_retry;
use bindsync_store::{Binding, ExternalId, Model};

/// Payload key a mapper sets to bind to an existing remote record instead of
/// creating one.
pub const EXTERNAL_ID_KEY: &str = "external_id";

/// Pushes one local record to the backend.
///
/// A run walks these states, leaving early with a skip or an error:
///
/// 1. no-export gate
/// 2. resolve the remote id
/// 3. `must_skip` gate
/// 4. staleness check, scheduling an import when the remote side is newer
/// 5. export dependencies
/// 6. lock the binding row
/// 7. map, then create or update remotely
/// 8. bind, release the lock, `after_export`
pub struct Exporter<'a> {
    conn: &'a Connector,
    model: Model,
    components: &'a ModelComponents,
    binder: Binder,
    depth: usize,
}

impl<'a> Exporter<'a> {
    /// Creates an exporter for `model`.
    pub fn new(conn: &'a Connector, model: &Model) -> SyncResult<Self> {
        Self::at_depth(conn, model, 0)
    }

    fn at_depth(conn: &'a Connector, model: &Model, depth: usize) -> SyncResult<Self> {
        if depth > conn.config().max_dependency_depth {
            return Err(SyncError::DependencyTooDeep {
                model: model.clone(),
                depth,
            });
        }
        Ok(Self {
            conn,
            model: model.clone(),
            components: conn.components(model)?,
            binder: conn.binder(model),
            depth,
        })
    }

    /// Exports the record behind `binding`.
    ///
    /// `fields` restricts an update to the given local fields. It is ignored
    /// when the record has to be created.
    pub fn run(&self, binding: &Binding, fields: Option<&[String]>) -> SyncResult<Outcome> {
        let result = self.run_inner(binding, fields);
        match &result {
            Ok(Outcome::Skipped(reason)) => {
                tracing::info!(model = %self.model, binding = %binding.id, %reason, "export skipped");
            }
            Ok(outcome) => {
                tracing::info!(model = %self.model, binding = %binding.id, %outcome, "export done");
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(model = %self.model, binding = %binding.id, error = %e, "export postponed");
            }
            Err(e) => {
                tracing::error!(model = %self.model, binding = %binding.id, error = %e, "export failed");
            }
        }
        result
    }

    fn run_inner(&self, binding: &Binding, fields: Option<&[String]>) -> SyncResult<Outcome> {
        let config = self.conn.config();
        if config.no_export {
            return Ok(Outcome::Skipped(SkipReason::NoExport));
        }

        let adapter = self.components.adapter()?;
        let mapper = self.components.export_mapper()?;
        let hooks = self.components.export_hooks();

        let binding = self
            .conn
            .store()
            .get(binding.id)?
            .ok_or(SyncError::BindingNotFound(binding.id))?;
        if binding.model != self.model {
            return Err(SyncError::data(format!(
                "binding {} belongs to {}, not {}",
                binding.id, binding.model, self.model
            )));
        }
        let mut external_id = self.binder.to_external(&binding)?;
        let mut fields = fields;
        if external_id.is_none() {
            fields = None;
        }
        let mut vanished = None;

        let record = self
            .conn
            .local()
            .read(&self.model, binding.local_id)?
            .ok_or_else(|| {
                SyncError::local(format!(
                    "{} record {} does not exist",
                    self.model, binding.local_id
                ))
            })?;

        if let Phase::Skip(reason) = hooks.must_skip(self.conn, &binding, &record)? {
            return Ok(Outcome::Skipped(reason));
        }

        if let Some(ext) = external_id {
            match adapter.read(ext) {
                Ok(remote) => {
                    if binding.is_stale(remote.write_date) {
                        tracing::debug!(model = %self.model, external_id = %ext, "remote side is newer, scheduling import");
                        self.conn.delay_import_record(&self.model, ext, false)?;
                    }
                }
                Err(e) if e.is_not_found() => {
                    tracing::debug!(model = %self.model, external_id = %ext, "remote record vanished, exporting as new");
                    external_id = None;
                    fields = None;
                    vanished = Some(ext);
                }
                Err(e) => return Err(e.into()),
            }
        }

        hooks.before_export(self.conn, &binding, &record)?;

        for dependency in hooks.export_dependencies(self.conn, &record)? {
            self.export_dependency(&dependency)?;
        }

        let guard = lock_or_retry(self.conn.store(), binding.id, config.lock_retry_delay)?;

        // another worker may have bound the row since it was resolved; an id
        // equal to the one that vanished still means the record is gone
        if external_id.is_none() {
            let current = self.binder.to_external(&binding)?;
            if current != vanished {
                external_id = current;
                fields = None;
            }
        }
        if external_id.is_none() {
            external_id = hooks.external_id_with_data(self.conn, &binding, &record)?;
        }

        let ctx = MapContext::new(self.conn, &self.model);
        let (bound_id, created) = match external_id {
            Some(ext) => {
                let payload = mapper.to_export_payload(&ctx, &record, false, fields)?;
                if payload.is_empty() {
                    return Ok(Outcome::Skipped(SkipReason::NothingToExport));
                }
                adapter.write(ext, &payload)?;
                (ext, false)
            }
            None => {
                let payload = mapper.to_export_payload(&ctx, &record, true, None)?;
                if payload.is_empty() {
                    return Ok(Outcome::Skipped(SkipReason::NothingToExport));
                }
                let matched = payload
                    .get(EXTERNAL_ID_KEY)
                    .and_then(reference_id)
                    .and_then(ExternalId::new);
                match matched {
                    Some(ext) => (ext, false),
                    None => (adapter.create(&payload)?, true),
                }
            }
        };

        let bound = self.binder.bind(bound_id, &binding)?;
        drop(guard);

        hooks.after_export(self.conn, &bound, &record)?;
        Ok(Outcome::Exported {
            external_id: bound_id,
            created,
        })
    }

    /// Makes sure a dependency exists remotely.
    ///
    /// The dependency binding is created (or reused from an inactive
    /// row) and committed before its exporter runs, so a later failure of
    /// the dependent record cannot lose it.
    fn export_dependency(&self, dependency: &ExportDependency) -> SyncResult<()> {
        let binder = self.conn.binder(&dependency.model);
        let binding = binder.ensure_binding(dependency.local_id, true)?;
        if binding.external_id.is_some() && !dependency.always {
            return Ok(());
        }

        tracing::debug!(
            model = %self.model,
            dependency = %dependency.model,
            local_id = %dependency.local_id,
            "exporting dependency"
        );
        let exporter = Exporter::at_depth(self.conn, &dependency.model, self.depth + 1)?;
        exporter.run(&binding, None)?;
        Ok(())
    }
}
