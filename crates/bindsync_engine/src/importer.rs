//! Single-record import state machine.

use crate::advisory::acquire_or_retry;
use crate::binder::Binder;
use crate::connector::Connector;
use crate::context::RequestContext;
use crate::error::{SyncError, SyncResult};
use crate::hooks::ImportDependency;
use crate::mapper::MapContext;
use crate::outcome::{Outcome, Phase, SkipReason};
use crate::record::{Payload, RemoteRecord};
use crate::registry::ModelComponents;
use bindsync_store::{ExternalId, Model};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Current,
    Legacy,
}

/// Pulls one remote record into the local store.
///
/// A run walks these states, leaving early with a skip or an error:
///
/// 1. look up the binding, `init_import` gate
/// 2. read the remote record
/// 3. `binding_with_data`, `must_skip` gate
/// 4. staleness check unless forced
/// 5. advisory lock on `import(<backend>, <model>, <external id>)`
/// 6. `before_import`, import dependencies
/// 7. map, validate, create or update locally
/// 8. bind, `after_import`
pub struct Importer<'a> {
    conn: &'a Connector,
    model: Model,
    components: &'a ModelComponents,
    binder: Binder,
    depth: usize,
}

impl<'a> Importer<'a> {
    /// Creates an importer for `model`.
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

    /// Imports the remote record `external_id`.
    ///
    /// With `force` the record is imported even when the local copy is
    /// already up to date.
    pub fn run(&self, external_id: ExternalId, force: bool) -> SyncResult<Outcome> {
        self.run_logged(external_id, force, Source::Current)
    }

    /// Imports through the legacy adapter, with the same states as
    /// [`Importer::run`].
    pub fn run_legacy(&self, external_id: ExternalId, force: bool) -> SyncResult<Outcome> {
        self.run_logged(external_id, force, Source::Legacy)
    }

    fn run_logged(&self, external_id: ExternalId, force: bool, source: Source) -> SyncResult<Outcome> {
        let result = self.run_inner(external_id, force, source);
        match &result {
            Ok(Outcome::Skipped(reason)) => {
                tracing::info!(model = %self.model, %external_id, %reason, "import skipped");
            }
            Ok(outcome) => {
                tracing::info!(model = %self.model, %external_id, %outcome, "import done");
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(model = %self.model, %external_id, error = %e, "import postponed");
            }
            Err(e) => {
                tracing::error!(model = %self.model, %external_id, error = %e, "import failed");
            }
        }
        result
    }

    fn run_inner(&self, external_id: ExternalId, force: bool, source: Source) -> SyncResult<Outcome> {
        let config = self.conn.config();
        let hooks = self.components.import_hooks();
        let mapper = self.components.import_mapper()?;

        let mut binding = self.binder.to_internal(external_id)?;

        if let Phase::Skip(reason) = hooks.init_import(self.conn, binding.as_ref(), external_id)? {
            return Ok(Outcome::Skipped(reason));
        }

        let Some(record) = self.read_remote(external_id, source)? else {
            return Ok(Outcome::Skipped(SkipReason::RemoteMissing));
        };

        if binding.is_none() {
            binding = hooks.binding_with_data(self.conn, &record)?;
        }

        if let Phase::Skip(reason) = hooks.must_skip(self.conn, binding.as_ref(), &record)? {
            return Ok(Outcome::Skipped(reason));
        }

        if !force {
            if let Some(existing) = &binding {
                if !existing.is_stale(record.write_date) {
                    return Ok(Outcome::Skipped(SkipReason::UpToDate));
                }
            }
        }

        let lock_name = format!("import({}, {}, {})", config.backend_id, self.model, external_id);
        let _lock = acquire_or_retry(
            self.conn.advisory_locks(),
            &lock_name,
            &config.advisory_retry,
            config.advisory_retry_delay,
        )?;

        // another worker may have imported the record while we waited
        if binding.is_none() {
            binding = self.binder.to_internal(external_id)?;
        }

        hooks.before_import(self.conn, &record)?;

        for dependency in hooks.import_dependencies(self.conn, &record)? {
            self.import_dependency(&dependency)?;
        }

        let ctx = MapContext::new(self.conn, &self.model);
        let payload = mapper.to_import_payload(&ctx, &record, binding.is_none())?;
        hooks.validate_data(self.conn, &payload)?;

        let request = RequestContext::new()
            .with_lang(config.default_lang.clone())
            .with_no_export(true);
        let local = self.conn.local();

        let (bound, created) = match binding {
            Some(existing) => {
                local.write(&self.model, existing.local_id, &payload, &request)?;
                (self.binder.bind(external_id, &existing)?, false)
            }
            None => {
                let local_id = local.create(&self.model, &payload, &request)?;
                (self.binder.bind_local(external_id, local_id)?, true)
            }
        };

        hooks.after_import(self.conn, &bound, &record)?;
        Ok(Outcome::Imported {
            local_id: bound.local_id,
            created,
        })
    }

    fn read_remote(&self, external_id: ExternalId, source: Source) -> SyncResult<Option<RemoteRecord>> {
        match source {
            Source::Current => match self.components.adapter()?.read(external_id) {
                Ok(record) => Ok(Some(record)),
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(e.into()),
            },
            Source::Legacy => {
                let adapter = self.components.legacy_adapter()?;
                let mut records = adapter.read(&self.model, &[external_id], &Payload::new())?;
                if records.len() != 1 {
                    tracing::debug!(model = %self.model, %external_id, found = records.len(), "legacy read did not return exactly one record");
                    return Ok(None);
                }
                Ok(records.pop())
            }
        }
    }

    /// Makes sure a remote dependency exists locally.
    ///
    /// A dependency that ends up skipped is not an error for the caller.
    fn import_dependency(&self, dependency: &ImportDependency) -> SyncResult<()> {
        let binder = self.conn.binder(&dependency.model);
        if !dependency.force && binder.to_internal(dependency.external_id)?.is_some() {
            return Ok(());
        }

        tracing::debug!(
            model = %self.model,
            dependency = %dependency.model,
            external_id = %dependency.external_id,
            "importing dependency"
        );
        let importer = Importer::at_depth(self.conn, &dependency.model, self.depth + 1)?;
        let outcome = if importer.components.is_legacy() {
            importer.run_legacy(dependency.external_id, dependency.force)?
        } else {
            importer.run(dependency.external_id, dependency.force)?
        };
        if let Outcome::Skipped(reason) = outcome {
            tracing::info!(
                model = %self.model,
                dependency = %dependency.model,
                external_id = %dependency.external_id,
                %reason,
                "dependency not imported, continuing"
            );
        }
        Ok(())
    }
}
