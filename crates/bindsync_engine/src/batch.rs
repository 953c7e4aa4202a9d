//! Batch drivers and the strategies that dispatch each record.

use crate::connector::Connector;
use crate::error::{SyncError, SyncResult};
use crate::job::JobId;
use crate::outcome::Outcome;
use crate::record::RecordFilter;
use crate::registry::ModelComponents;
use bindsync_store::{BindingId, ExternalId, Model};
use std::fmt;

/// What a strategy did with one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// The state machine ran synchronously.
    Ran(Outcome),
    /// A job was enqueued.
    Queued(JobId),
}

/// Decides whether a record is transferred now or later.
///
/// Both strategies end in the same single-record runner, so the resulting
/// binding state does not depend on the choice.
pub trait DispatchStrategy: Send + Sync {
    /// Imports one remote record.
    fn import_record(
        &self,
        conn: &Connector,
        model: &Model,
        external_id: ExternalId,
        force: bool,
        priority: Option<u8>,
    ) -> SyncResult<Dispatched>;

    /// Exports one binding.
    fn export_record(
        &self,
        conn: &Connector,
        model: &Model,
        binding_id: BindingId,
        fields: Option<&[String]>,
    ) -> SyncResult<Dispatched>;
}

/// Runs every record synchronously in the caller's thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct Direct;

impl DispatchStrategy for Direct {
    fn import_record(
        &self,
        conn: &Connector,
        model: &Model,
        external_id: ExternalId,
        force: bool,
        _priority: Option<u8>,
    ) -> SyncResult<Dispatched> {
        let outcome = if conn.components(model)?.is_legacy() {
            conn.import_record_legacy(model, external_id, force)?
        } else {
            conn.import_record(model, external_id, force)?
        };
        Ok(Dispatched::Ran(outcome))
    }

    fn export_record(
        &self,
        conn: &Connector,
        model: &Model,
        binding_id: BindingId,
        fields: Option<&[String]>,
    ) -> SyncResult<Dispatched> {
        Ok(Dispatched::Ran(conn.export_record(model, binding_id, fields)?))
    }
}

/// Enqueues one job per record on the connector's dispatcher.
#[derive(Debug, Default, Clone, Copy)]
pub struct Delayed;

impl DispatchStrategy for Delayed {
    fn import_record(
        &self,
        conn: &Connector,
        model: &Model,
        external_id: ExternalId,
        force: bool,
        priority: Option<u8>,
    ) -> SyncResult<Dispatched> {
        Ok(Dispatched::Queued(
            conn.enqueue_import(model, external_id, force, priority)?,
        ))
    }

    fn export_record(
        &self,
        conn: &Connector,
        model: &Model,
        binding_id: BindingId,
        fields: Option<&[String]>,
    ) -> SyncResult<Dispatched> {
        let fields = fields.map(<[String]>::to_vec);
        Ok(Dispatched::Queued(
            conn.delay_export_record(model, binding_id, fields)?,
        ))
    }
}

/// A record the batch could not dispatch.
#[derive(Debug)]
pub struct BatchFailure {
    /// The remote id or binding id of the record.
    pub key: String,
    /// Why it failed.
    pub error: SyncError,
}

/// Result of one batch run.
///
/// A failing record does not stop the batch; failures are collected.
#[derive(Debug, Default)]
pub struct BatchSummary {
    /// Outcomes of records run synchronously.
    pub ran: Vec<Outcome>,
    /// Jobs enqueued.
    pub queued: Vec<JobId>,
    /// Records that failed.
    pub failures: Vec<BatchFailure>,
}

impl BatchSummary {
    fn record(&mut self, key: String, result: SyncResult<Dispatched>) {
        match result {
            Ok(Dispatched::Ran(outcome)) => self.ran.push(outcome),
            Ok(Dispatched::Queued(id)) => self.queued.push(id),
            Err(error) => self.failures.push(BatchFailure { key, error }),
        }
    }

    /// Number of records handled, failed ones included.
    pub fn len(&self) -> usize {
        self.ran.len() + self.queued.len() + self.failures.len()
    }

    /// Returns true if the batch found nothing to do.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Turns the summary into an error if any record failed.
    ///
    /// The first failure is returned; the others are only logged.
    pub fn into_result(mut self) -> SyncResult<Self> {
        if self.failures.is_empty() {
            return Ok(self);
        }
        let first = self.failures.remove(0);
        for other in &self.failures {
            tracing::warn!(key = %other.key, error = %other.error, "batch record failed");
        }
        Err(first.error)
    }

    /// Result of a batch job.
    ///
    /// Records that were run or queued keep their effect, so the job only
    /// fails when nothing got through. Rerunning it would dispatch the
    /// successful records a second time.
    pub fn into_job_result(self) -> SyncResult<String> {
        if self.ran.is_empty() && self.queued.is_empty() {
            return self.into_result().map(|summary| summary.to_string());
        }
        for failure in &self.failures {
            tracing::warn!(key = %failure.key, error = %failure.error, "batch record failed");
        }
        Ok(self.to_string())
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} run, {} queued, {} failed",
            self.ran.len(),
            self.queued.len(),
            self.failures.len()
        )
    }
}

/// Imports every remote record matching a filter.
#[derive(Debug)]
pub struct BatchImporter<'a> {
    conn: &'a Connector,
    model: Model,
    components: &'a ModelComponents,
}

impl<'a> BatchImporter<'a> {
    /// Creates a batch importer for `model`.
    pub fn new(conn: &'a Connector, model: &Model) -> SyncResult<Self> {
        Ok(Self {
            conn,
            model: model.clone(),
            components: conn.components(model)?,
        })
    }

    /// Searches the backend and dispatches one import per match.
    ///
    /// A failing search fails the whole batch.
    pub fn run(
        &self,
        strategy: &dyn DispatchStrategy,
        filter: &RecordFilter,
        force: bool,
    ) -> SyncResult<BatchSummary> {
        let external_ids = self.components.adapter()?.search(filter)?;
        tracing::debug!(model = %self.model, count = external_ids.len(), "batch import candidates");

        let hooks = self.components.import_hooks();
        let mut summary = BatchSummary::default();
        for external_id in external_ids {
            let priority = hooks.batch_priority(external_id);
            let result = strategy.import_record(self.conn, &self.model, external_id, force, priority);
            summary.record(external_id.to_string(), result);
        }
        tracing::info!(model = %self.model, %summary, "batch import dispatched");
        Ok(summary)
    }
}

/// Exports every local record matching a filter.
#[derive(Debug)]
pub struct BatchExporter<'a> {
    conn: &'a Connector,
    model: Model,
}

impl<'a> BatchExporter<'a> {
    /// Creates a batch exporter for `model`.
    pub fn new(conn: &'a Connector, model: &Model) -> SyncResult<Self> {
        conn.components(model)?;
        Ok(Self {
            conn,
            model: model.clone(),
        })
    }

    /// Binds every matching local record, then dispatches one export per
    /// active binding.
    ///
    /// Records without a binding get a placeholder first. Soft-deleted
    /// bindings are left alone.
    pub fn run(
        &self,
        strategy: &dyn DispatchStrategy,
        filter: &RecordFilter,
        fields: Option<&[String]>,
    ) -> SyncResult<BatchSummary> {
        let local_ids = self.conn.local().search(&self.model, filter)?;
        tracing::debug!(model = %self.model, count = local_ids.len(), "batch export candidates");

        let binder = self.conn.binder(&self.model);
        let mut summary = BatchSummary::default();
        let mut to_export = Vec::with_capacity(local_ids.len());
        for local_id in local_ids {
            match binder.ensure_binding(local_id, true) {
                Ok(binding) if binding.active => to_export.push(binding.id),
                Ok(binding) => {
                    tracing::debug!(model = %self.model, binding = %binding.id, "binding inactive, not exported");
                }
                Err(error) => summary.failures.push(BatchFailure {
                    key: format!("local {local_id}"),
                    error,
                }),
            }
        }

        for binding_id in to_export {
            let result = strategy.export_record(self.conn, &self.model, binding_id, fields);
            summary.record(format!("binding {binding_id}"), result);
        }
        tracing::info!(model = %self.model, %summary, "batch export dispatched");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterError, CallKind, MemoryAdapter};
    use crate::clock::ManualClock;
    use crate::config::BackendConfig;
    use crate::hooks::ImportHooks;
    use crate::job::{Job, MemoryJobQueue};
    use crate::local::MemoryLocalStore;
    use crate::mapper::FieldMapper;
    use crate::record::Payload;
    use crate::registry::Registry;
    use bindsync_store::{BackendId, BindingStore, MemoryBindingStore};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    struct Setup {
        conn: Connector,
        queue: Arc<MemoryJobQueue>,
        store: Arc<MemoryBindingStore>,
        local: Arc<MemoryLocalStore>,
        adapter: Arc<MemoryAdapter>,
    }

    fn model() -> Model {
        Model::new("res.partner")
    }

    struct VipFirst;

    impl ImportHooks for VipFirst {
        fn batch_priority(&self, external_id: ExternalId) -> Option<u8> {
            (external_id.get() == 2).then_some(1)
        }
    }

    fn setup() -> Setup {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryBindingStore::new());
        let local = Arc::new(MemoryLocalStore::new());
        let adapter = Arc::new(MemoryAdapter::new(model()).with_clock(clock.clone()));
        let registry = Registry::builder()
            .register(
                ModelComponents::new(model())
                    .with_adapter(adapter.clone())
                    .with_mapper(Arc::new(FieldMapper::new().direct("name", "name")))
                    .with_import_hooks(Arc::new(VipFirst)),
            )
            .build()
            .unwrap();
        let queue = Arc::new(MemoryJobQueue::new(clock.clone()));
        let conn = Connector::new(BackendConfig::default(), store.clone(), local.clone(), registry)
            .with_clock(clock)
            .with_dispatcher(queue.clone());
        Setup {
            conn,
            queue,
            store,
            local,
            adapter,
        }
    }

    fn named(name: &str) -> Payload {
        let mut p = Payload::new();
        p.insert("name".into(), json!(name));
        p
    }

    #[test]
    fn delayed_import_enqueues_with_hook_priority() {
        let s = setup();
        s.adapter.insert(named("a"), None);
        s.adapter.insert(named("b"), None);

        let summary = BatchImporter::new(&s.conn, &model())
            .unwrap()
            .run(&Delayed, &RecordFilter::all(), false)
            .unwrap();
        assert_eq!(summary.queued.len(), 2);
        assert!(summary.ran.is_empty());

        let priorities: Vec<_> = s.queue.jobs().iter().map(|r| r.options.priority).collect();
        assert_eq!(priorities, vec![10, 1]);
        assert_eq!(s.local.count(&model()), 0);
    }

    #[test]
    fn direct_import_runs_each_record() {
        let s = setup();
        s.adapter.insert(named("a"), None);
        s.adapter.insert(named("b"), None);

        let summary = BatchImporter::new(&s.conn, &model())
            .unwrap()
            .run(&Direct, &RecordFilter::all().eq("name", "b"), false)
            .unwrap();
        assert_eq!(summary.ran.len(), 1);
        assert_eq!(s.local.count(&model()), 1);
        assert!(s.queue.jobs().is_empty());
    }

    #[test]
    fn failed_search_fails_the_batch() {
        let s = setup();
        s.adapter
            .fail_next(CallKind::Search, AdapterError::transport_retryable("timeout"));
        let err = BatchImporter::new(&s.conn, &model())
            .unwrap()
            .run(&Delayed, &RecordFilter::all(), false)
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn export_binds_placeholders_then_dispatches() {
        let s = setup();
        let a = s.local.insert(&model(), named("a"));
        let b = s.local.insert(&model(), named("b"));

        let summary = BatchExporter::new(&s.conn, &model())
            .unwrap()
            .run(&Delayed, &RecordFilter::all(), None)
            .unwrap();
        assert_eq!(summary.queued.len(), 2);
        assert_eq!(s.store.len(), 2);

        for local_id in [a, b] {
            let binding = s
                .store
                .find_by_local(BackendId(1), &model(), local_id, false)
                .unwrap()
                .unwrap();
            assert!(binding.external_id.is_none());
            assert!(s.queue.jobs().iter().any(|r| r.job
                == Job::ExportRecord {
                    model: model(),
                    binding_id: binding.id,
                    fields: None
                }));
        }
    }

    #[test]
    fn inactive_bindings_are_not_exported() {
        let s = setup();
        let id = s.local.insert(&model(), named("a"));
        let mut binding = s.conn.binder(&model()).ensure_binding(id, true).unwrap();
        binding.active = false;
        s.store.update(&binding).unwrap();

        let summary = BatchExporter::new(&s.conn, &model())
            .unwrap()
            .run(&Direct, &RecordFilter::all(), None)
            .unwrap();
        assert!(summary.is_empty());
        assert_eq!(s.store.len(), 1);
    }

    #[test]
    fn direct_export_creates_remote_records() {
        let s = setup();
        s.local.insert(&model(), named("a"));
        let summary = BatchExporter::new(&s.conn, &model())
            .unwrap()
            .run(&Direct, &RecordFilter::all(), None)
            .unwrap();
        assert!(matches!(
            summary.ran[0],
            Outcome::Exported { created: true, .. }
        ));
        assert_eq!(s.adapter.len(), 1);
    }

    #[test]
    fn into_result_surfaces_first_failure() {
        let mut summary = BatchSummary::default();
        summary.record("1".into(), Err(SyncError::data("bad")));
        summary.record("2".into(), Err(SyncError::data("worse")));
        assert_eq!(summary.to_string(), "0 run, 0 queued, 2 failed");
        match summary.into_result() {
            Err(SyncError::Data(message)) => assert_eq!(message, "bad"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(BatchSummary::default().into_result().is_ok());
    }

    #[test]
    fn job_result_fails_only_when_nothing_got_through() {
        let mut partial = BatchSummary::default();
        partial.record("1".into(), Ok(Dispatched::Queued(JobId::new())));
        partial.record("2".into(), Err(SyncError::data("bad")));
        assert_eq!(partial.into_job_result().unwrap(), "0 run, 1 queued, 1 failed");

        let mut none = BatchSummary::default();
        none.record("1".into(), Err(SyncError::retryable("locked", Duration::from_secs(5))));
        assert!(none.into_job_result().unwrap_err().is_retryable());

        assert_eq!(
            BatchSummary::default().into_job_result().unwrap(),
            "0 run, 0 queued, 0 failed"
        );
    }
}
