//! The per-backend entry point tying stores, registry and queue together.

use crate::advisory::{AdvisoryLocks, MemoryAdvisoryLocks};
use crate::batch::{BatchExporter, BatchImporter, Delayed};
use crate::binder::Binder;
use crate::clock::{Clock, SystemClock};
use crate::config::{BackendConfig, MainRecord};
use crate::error::{SyncError, SyncResult};
use crate::exporter::Exporter;
use crate::importer::Importer;
use crate::job::{Job, JobDispatcher, JobId, JobOptions, MemoryJobQueue};
use crate::local::LocalStore;
use crate::outcome::Outcome;
use crate::registry::{ModelComponents, Registry};
use bindsync_store::{Binding, BindingId, BindingStore, ExternalId, Model};
use std::fmt;
use std::sync::Arc;

/// Everything needed to synchronize with one backend.
///
/// Cloning is cheap; all parts are shared.
#[derive(Clone)]
pub struct Connector {
    config: Arc<BackendConfig>,
    store: Arc<dyn BindingStore>,
    local: Arc<dyn LocalStore>,
    registry: Arc<Registry>,
    clock: Arc<dyn Clock>,
    advisory: Arc<dyn AdvisoryLocks>,
    dispatcher: Arc<dyn JobDispatcher>,
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("backend_id", &self.config.backend_id)
            .field("name", &self.config.name)
            .field("models", &self.registry.models())
            .finish_non_exhaustive()
    }
}

impl Connector {
    /// Creates a connector with the system clock, in-process advisory locks
    /// and an in-process job queue.
    pub fn new(
        config: BackendConfig,
        store: Arc<dyn BindingStore>,
        local: Arc<dyn LocalStore>,
        registry: Registry,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            config: Arc::new(config),
            store,
            local,
            registry: Arc::new(registry),
            dispatcher: Arc::new(MemoryJobQueue::new(clock.clone())),
            clock,
            advisory: Arc::new(MemoryAdvisoryLocks::new()),
        }
    }

    /// Sets the clock used for sync timestamps.
    ///
    /// A dispatcher set earlier keeps its own clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the advisory lock provider used by imports.
    pub fn with_advisory_locks(mut self, locks: Arc<dyn AdvisoryLocks>) -> Self {
        self.advisory = locks;
        self
    }

    /// Sets where delayed work is enqueued.
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn JobDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Backend configuration.
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// The binding store.
    pub fn store(&self) -> &dyn BindingStore {
        self.store.as_ref()
    }

    /// The local system of record.
    pub fn local(&self) -> &dyn LocalStore {
        self.local.as_ref()
    }

    /// The model registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The clock.
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// The advisory lock provider.
    pub fn advisory_locks(&self) -> &dyn AdvisoryLocks {
        self.advisory.as_ref()
    }

    /// The job dispatcher.
    pub fn dispatcher(&self) -> &dyn JobDispatcher {
        self.dispatcher.as_ref()
    }

    /// Registered components of a model.
    pub fn components(&self, model: &Model) -> SyncResult<&ModelComponents> {
        self.registry.get(model)
    }

    /// A binder for `model` on this backend.
    pub fn binder(&self, model: &Model) -> Binder {
        Binder::new(
            self.store.clone(),
            self.clock.clone(),
            self.config.backend_id,
            model.clone(),
        )
        .with_conflict_retry_delay(self.config.conflict_retry_delay)
    }

    /// Imports one remote record now.
    pub fn import_record(
        &self,
        model: &Model,
        external_id: ExternalId,
        force: bool,
    ) -> SyncResult<Outcome> {
        Importer::new(self, model)?.run(external_id, force)
    }

    /// Imports one remote record now, through the legacy adapter.
    pub fn import_record_legacy(
        &self,
        model: &Model,
        external_id: ExternalId,
        force: bool,
    ) -> SyncResult<Outcome> {
        Importer::new(self, model)?.run_legacy(external_id, force)
    }

    /// Exports one binding now.
    pub fn export_record(
        &self,
        model: &Model,
        binding_id: BindingId,
        fields: Option<&[String]>,
    ) -> SyncResult<Outcome> {
        let binding = self
            .store
            .get(binding_id)?
            .ok_or(SyncError::BindingNotFound(binding_id))?;
        Exporter::new(self, model)?.run(&binding, fields)
    }

    /// Queue options for jobs of `model`.
    pub fn job_options(&self, model: &Model) -> SyncResult<JobOptions> {
        let components = self.components(model)?;
        Ok(JobOptions::new()
            .with_priority(components.priority())
            .with_channel(components.channel()))
    }

    /// Enqueues the import of one remote record.
    pub fn delay_import_record(
        &self,
        model: &Model,
        external_id: ExternalId,
        force: bool,
    ) -> SyncResult<JobId> {
        self.enqueue_import(model, external_id, force, None)
    }

    /// Enqueues an import, routing legacy models to the legacy job.
    pub(crate) fn enqueue_import(
        &self,
        model: &Model,
        external_id: ExternalId,
        force: bool,
        priority: Option<u8>,
    ) -> SyncResult<JobId> {
        let job = if self.components(model)?.is_legacy() {
            Job::ImportRecordLegacy {
                model: model.clone(),
                external_id,
                force,
            }
        } else {
            Job::ImportRecord {
                model: model.clone(),
                external_id,
                force,
            }
        };
        let mut options = self.job_options(model)?;
        if let Some(priority) = priority {
            options = options.with_priority(priority);
        }
        self.dispatcher.enqueue(job, options)
    }

    /// Enqueues the export of one binding.
    pub fn delay_export_record(
        &self,
        model: &Model,
        binding_id: BindingId,
        fields: Option<Vec<String>>,
    ) -> SyncResult<JobId> {
        let options = self.job_options(model)?;
        self.dispatcher.enqueue(
            Job::ExportRecord {
                model: model.clone(),
                binding_id,
                fields,
            },
            options,
        )
    }

    /// Schedules a full transfer of a binding from its main side.
    ///
    /// When the backend is the main record this is a forced import, which
    /// needs a remote id. Otherwise the local record is exported.
    pub fn resync(&self, model: &Model, binding: &Binding) -> SyncResult<JobId> {
        match self.config.main_record {
            MainRecord::Remote => {
                let external_id = binding.external_id.ok_or_else(|| {
                    SyncError::data(format!(
                        "binding {} of {model} has no remote id to resync from",
                        binding.id
                    ))
                })?;
                self.delay_import_record(model, external_id, true)
            }
            MainRecord::Local => self.delay_export_record(model, binding.id, None),
        }
    }

    /// Runs a job and returns its result message.
    pub fn perform(&self, job: &Job) -> SyncResult<String> {
        match job {
            Job::ImportRecord {
                model,
                external_id,
                force,
            } => Ok(self.import_record(model, *external_id, *force)?.to_string()),
            Job::ImportRecordLegacy {
                model,
                external_id,
                force,
            } => Ok(self
                .import_record_legacy(model, *external_id, *force)?
                .to_string()),
            Job::ExportRecord {
                model,
                binding_id,
                fields,
            } => Ok(self
                .export_record(model, *binding_id, fields.as_deref())?
                .to_string()),
            Job::ImportBatch {
                model,
                filter,
                force,
            } => {
                let summary = BatchImporter::new(self, model)?.run(&Delayed, filter, *force)?;
                summary.into_job_result()
            }
            Job::ExportBatch {
                model,
                filter,
                fields,
            } => {
                let summary =
                    BatchExporter::new(self, model)?.run(&Delayed, filter, fields.as_deref())?;
                summary.into_job_result()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;
    use crate::clock::ManualClock;
    use crate::local::MemoryLocalStore;
    use crate::mapper::FieldMapper;
    use crate::outcome::SkipReason;
    use crate::record::Payload;
    use crate::record::RecordFilter;
    use bindsync_store::{BackendId, LocalId, MemoryBindingStore, NewBinding};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Setup {
        conn: Connector,
        queue: Arc<MemoryJobQueue>,
        store: Arc<MemoryBindingStore>,
        adapter: Arc<MemoryAdapter>,
    }

    fn model() -> Model {
        Model::new("res.partner")
    }

    fn setup(config: BackendConfig, legacy: bool) -> Setup {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryBindingStore::new());
        let adapter = Arc::new(MemoryAdapter::new(model()).with_clock(clock.clone()));
        let mut components = ModelComponents::new(model())
            .with_adapter(adapter.clone())
            .with_legacy_adapter(adapter.clone())
            .with_mapper(Arc::new(FieldMapper::new().direct("name", "name")))
            .with_priority(7)
            .with_channel("root.partners");
        if legacy {
            components = components.legacy();
        }
        let registry = Registry::builder().register(components).build().unwrap();
        let queue = Arc::new(MemoryJobQueue::new(clock.clone()));
        let conn = Connector::new(
            config,
            store.clone(),
            Arc::new(MemoryLocalStore::new()),
            registry,
        )
        .with_clock(clock)
        .with_dispatcher(queue.clone());
        Setup {
            conn,
            queue,
            store,
            adapter,
        }
    }

    fn bound(s: &Setup, external_id: Option<u64>) -> Binding {
        let mut new = NewBinding::placeholder(BackendId(1), model(), LocalId(4));
        if let Some(ext) = external_id.and_then(ExternalId::new) {
            new = new.with_external_id(ext);
        }
        s.store.insert(new).unwrap()
    }

    #[test]
    fn delayed_import_uses_model_queue_options() {
        let s = setup(BackendConfig::default(), false);
        let ext = ExternalId::new(77).unwrap();
        s.conn.delay_import_record(&model(), ext, false).unwrap();

        let jobs = s.queue.jobs();
        assert_eq!(jobs[0].options.priority, 7);
        assert_eq!(jobs[0].options.channel, "root.partners");
        assert!(matches!(jobs[0].job, Job::ImportRecord { .. }));
    }

    #[test]
    fn legacy_models_get_legacy_jobs() {
        let s = setup(BackendConfig::default(), true);
        s.conn
            .delay_import_record(&model(), ExternalId::new(77).unwrap(), false)
            .unwrap();
        assert!(matches!(
            s.queue.jobs()[0].job,
            Job::ImportRecordLegacy { .. }
        ));
    }

    #[test]
    fn resync_follows_main_record() {
        let s = setup(BackendConfig::default(), false);
        let binding = bound(&s, Some(77));
        s.conn.resync(&model(), &binding).unwrap();
        assert!(matches!(
            s.queue.jobs()[0].job,
            Job::ExportRecord { binding_id, .. } if binding_id == binding.id
        ));

        let s = setup(
            BackendConfig::default().with_main_record(MainRecord::Remote),
            false,
        );
        let binding = bound(&s, Some(77));
        s.conn.resync(&model(), &binding).unwrap();
        assert_eq!(
            s.queue.jobs()[0].job,
            Job::ImportRecord {
                model: model(),
                external_id: ExternalId::new(77).unwrap(),
                force: true
            }
        );
    }

    #[test]
    fn resync_from_remote_needs_remote_id() {
        let s = setup(
            BackendConfig::default().with_main_record(MainRecord::Remote),
            false,
        );
        let binding = bound(&s, None);
        let err = s.conn.resync(&model(), &binding).unwrap_err();
        assert!(matches!(err, SyncError::Data(_)));
        assert!(s.queue.jobs().is_empty());
    }

    #[test]
    fn perform_runs_single_record_jobs() {
        let s = setup(BackendConfig::default(), false);
        let mut fields = Payload::new();
        fields.insert("name".into(), json!("Alice"));
        let ext = s.adapter.insert(fields, None);

        let message = s
            .conn
            .perform(&Job::ImportRecord {
                model: model(),
                external_id: ext,
                force: false,
            })
            .unwrap();
        assert!(message.starts_with("Record created locally with ID"));

        let missing = s
            .conn
            .perform(&Job::ImportRecord {
                model: model(),
                external_id: ExternalId::new(999).unwrap(),
                force: false,
            })
            .unwrap();
        assert_eq!(missing, SkipReason::RemoteMissing.to_string());
    }

    /// Refuses the first job it is handed.
    #[derive(Debug)]
    struct RefusesFirst {
        queue: Arc<MemoryJobQueue>,
        refused: AtomicBool,
    }

    impl JobDispatcher for RefusesFirst {
        fn enqueue(&self, job: Job, options: JobOptions) -> SyncResult<JobId> {
            if !self.refused.swap(true, Ordering::SeqCst) {
                return Err(SyncError::Queue("queue full".into()));
            }
            self.queue.enqueue(job, options)
        }
    }

    #[test]
    fn batch_job_with_a_failed_record_still_completes() {
        let s = setup(BackendConfig::default(), false);
        for name in ["Alice", "Bob"] {
            let mut fields = Payload::new();
            fields.insert("name".into(), json!(name));
            s.adapter.insert(fields, None);
        }
        let conn = s.conn.clone().with_dispatcher(Arc::new(RefusesFirst {
            queue: s.queue.clone(),
            refused: AtomicBool::new(false),
        }));

        let message = conn
            .perform(&Job::ImportBatch {
                model: model(),
                filter: RecordFilter::all(),
                force: false,
            })
            .unwrap();
        assert_eq!(message, "0 run, 1 queued, 1 failed");
        assert_eq!(s.queue.jobs().len(), 1);
    }

    #[test]
    fn batch_job_fails_when_no_record_got_through() {
        let s = setup(BackendConfig::default(), false);
        let mut fields = Payload::new();
        fields.insert("name".into(), json!("Alice"));
        s.adapter.insert(fields, None);
        let conn = s.conn.clone().with_dispatcher(Arc::new(RefusesFirst {
            queue: s.queue.clone(),
            refused: AtomicBool::new(false),
        }));

        let err = conn
            .perform(&Job::ImportBatch {
                model: model(),
                filter: RecordFilter::all(),
                force: false,
            })
            .unwrap_err();
        assert!(matches!(err, SyncError::Queue(_)));
        assert!(s.queue.jobs().is_empty());
    }

    #[test]
    fn export_of_unknown_binding_fails() {
        let s = setup(BackendConfig::default(), false);
        let err = s
            .conn
            .export_record(&model(), BindingId(42), None)
            .unwrap_err();
        assert!(matches!(err, SyncError::BindingNotFound(BindingId(42))));
    }
}
