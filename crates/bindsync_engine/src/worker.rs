//! Runs queued jobs against a connector.

use crate::clock::Clock;
use crate::connector::Connector;
use crate::error::SyncResult;
use crate::job::{JobId, JobState, MemoryJobQueue};
use std::sync::Arc;
use std::time::Duration;

/// Worker settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Delay before retrying a retryable failure that carries none.
    pub default_retry_delay: Duration,
    /// Stop [`Worker::drain`] after this many jobs.
    pub max_jobs: Option<usize>,
    /// How long finished jobs stay in the queue after a drain.
    pub retain_finished: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            default_retry_delay: Duration::from_secs(10),
            max_jobs: None,
            retain_finished: Some(Duration::from_secs(24 * 3600)),
        }
    }
}

impl WorkerConfig {
    /// Creates the default config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the fallback retry delay.
    pub fn with_default_retry_delay(mut self, delay: Duration) -> Self {
        self.default_retry_delay = delay;
        self
    }

    /// Limits the number of jobs per drain.
    pub fn with_max_jobs(mut self, max_jobs: usize) -> Self {
        self.max_jobs = Some(max_jobs);
        self
    }

    /// Sets how long finished jobs are kept, `None` to keep them forever.
    pub fn with_retention(mut self, retain: Option<Duration>) -> Self {
        self.retain_finished = retain;
        self
    }
}

/// What happened to one job run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    /// The job.
    pub id: JobId,
    /// State after the run.
    pub state: JobState,
    /// Result or error message.
    pub message: String,
}

/// Takes due jobs from a queue and performs them.
///
/// Retryable failures go back to the queue after their delay until the job
/// runs out of retries. Any other failure marks the job failed.
#[derive(Debug)]
pub struct Worker {
    conn: Connector,
    queue: Arc<MemoryJobQueue>,
    config: WorkerConfig,
}

impl Worker {
    /// Creates a worker.
    pub fn new(conn: Connector, queue: Arc<MemoryJobQueue>) -> Self {
        Self {
            conn,
            queue,
            config: WorkerConfig::default(),
        }
    }

    /// Sets the worker config.
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs the next due job, if any.
    pub fn run_once(&self) -> SyncResult<Option<JobReport>> {
        let Some(record) = self.queue.take_next() else {
            return Ok(None);
        };
        let id = record.id;
        tracing::debug!(job = %id, attempt = record.attempts, description = %record.job.description(), "job started");

        let (state, message) = match self.conn.perform(&record.job) {
            Ok(message) => {
                self.queue.complete(id, message.clone())?;
                (JobState::Done, message)
            }
            Err(e) if e.is_retryable() => {
                let delay = e.retry_after().unwrap_or(self.config.default_retry_delay);
                let message = e.to_string();
                let state = self.queue.retry(id, delay, message.clone())?;
                if state == JobState::Failed {
                    tracing::error!(job = %id, error = %e, "job out of retries");
                } else {
                    tracing::warn!(job = %id, error = %e, delay_ms = delay.as_millis() as u64, "job rescheduled");
                }
                (state, message)
            }
            Err(e) => {
                let message = e.to_string();
                self.queue.fail(id, message.clone())?;
                tracing::error!(job = %id, error = %e, "job failed");
                (JobState::Failed, message)
            }
        };
        Ok(Some(JobReport { id, state, message }))
    }

    /// Runs jobs until none is due or the configured limit is reached, then
    /// drops finished jobs older than the retention.
    pub fn drain(&self) -> SyncResult<Vec<JobReport>> {
        let mut reports = Vec::new();
        while self.config.max_jobs.map_or(true, |max| reports.len() < max) {
            match self.run_once()? {
                Some(report) => reports.push(report),
                None => break,
            }
        }
        if let Some(retain) = self.config.retain_finished {
            self.queue
                .purge_finished(self.conn.clock().now().before(retain));
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterError, CallKind, MemoryAdapter};
    use crate::clock::ManualClock;
    use crate::config::BackendConfig;
    use crate::job::{Job, JobDispatcher, JobOptions};
    use crate::local::MemoryLocalStore;
    use crate::mapper::FieldMapper;
    use crate::record::Payload;
    use crate::registry::{ModelComponents, Registry};
    use bindsync_store::{ExternalId, MemoryBindingStore, Model};
    use serde_json::json;

    struct Setup {
        worker: Worker,
        queue: Arc<MemoryJobQueue>,
        adapter: Arc<MemoryAdapter>,
        local: Arc<MemoryLocalStore>,
        clock: Arc<ManualClock>,
    }

    fn model() -> Model {
        Model::new("res.partner")
    }

    fn setup() -> Setup {
        let clock = Arc::new(ManualClock::default());
        let local = Arc::new(MemoryLocalStore::new());
        let adapter = Arc::new(MemoryAdapter::new(model()).with_clock(clock.clone()));
        let registry = Registry::builder()
            .register(
                ModelComponents::new(model())
                    .with_adapter(adapter.clone())
                    .with_mapper(Arc::new(FieldMapper::new().direct("name", "name"))),
            )
            .build()
            .unwrap();
        let queue = Arc::new(MemoryJobQueue::new(clock.clone()));
        let conn = Connector::new(
            BackendConfig::default(),
            Arc::new(MemoryBindingStore::new()),
            local.clone(),
            registry,
        )
        .with_clock(clock.clone())
        .with_dispatcher(queue.clone());
        Setup {
            worker: Worker::new(conn, queue.clone()),
            queue,
            adapter,
            local,
            clock,
        }
    }

    fn import_job(external_id: ExternalId) -> Job {
        Job::ImportRecord {
            model: model(),
            external_id,
            force: false,
        }
    }

    fn named(name: &str) -> Payload {
        let mut p = Payload::new();
        p.insert("name".into(), json!(name));
        p
    }

    #[test]
    fn runs_due_jobs() {
        let s = setup();
        let ext = s.adapter.insert(named("Alice"), None);
        s.queue.enqueue(import_job(ext), JobOptions::new()).unwrap();

        let reports = s.worker.drain().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].state, JobState::Done);
        assert_eq!(s.local.count(&model()), 1);
    }

    #[test]
    fn retryable_failure_is_rescheduled() {
        let s = setup();
        let ext = s.adapter.insert(named("Alice"), None);
        s.adapter
            .fail_next(CallKind::Read, AdapterError::transport_retryable("reset"));
        let id = s.queue.enqueue(import_job(ext), JobOptions::new()).unwrap();

        let report = s.worker.run_once().unwrap().unwrap();
        assert_eq!(report.state, JobState::Pending);
        assert!(s.worker.run_once().unwrap().is_none());

        s.clock.advance(Duration::from_secs(10));
        let report = s.worker.run_once().unwrap().unwrap();
        assert_eq!(report.state, JobState::Done);
        assert_eq!(s.queue.get(id).unwrap().attempts, 2);
    }

    #[test]
    fn retries_are_bounded() {
        let s = setup();
        let ext = s.adapter.insert(named("Alice"), None);
        s.adapter
            .fail_next(CallKind::Read, AdapterError::transport_retryable("reset"));
        s.adapter
            .fail_next(CallKind::Read, AdapterError::transport_retryable("reset"));
        s.queue
            .enqueue(import_job(ext), JobOptions::new().with_max_retries(1))
            .unwrap();

        s.worker.run_once().unwrap();
        s.clock.advance(Duration::from_secs(10));
        let report = s.worker.run_once().unwrap().unwrap();
        assert_eq!(report.state, JobState::Failed);
        assert_eq!(s.local.count(&model()), 0);
    }

    #[test]
    fn data_errors_fail_without_retry() {
        let s = setup();
        s.queue
            .enqueue(
                Job::ImportRecord {
                    model: Model::new("unknown.model"),
                    external_id: ExternalId::new(1).unwrap(),
                    force: false,
                },
                JobOptions::new(),
            )
            .unwrap();
        let report = s.worker.run_once().unwrap().unwrap();
        assert_eq!(report.state, JobState::Failed);
        assert!(report.message.contains("unknown.model"));
        assert_eq!(s.queue.pending(), 0);
    }

    #[test]
    fn drain_respects_max_jobs() {
        let s = setup();
        for name in ["a", "b", "c"] {
            let ext = s.adapter.insert(named(name), None);
            s.queue.enqueue(import_job(ext), JobOptions::new()).unwrap();
        }
        let worker = Worker::new(s.worker.conn.clone(), s.queue.clone())
            .with_config(WorkerConfig::new().with_max_jobs(2));
        assert_eq!(worker.drain().unwrap().len(), 2);
        assert_eq!(s.queue.pending(), 1);
    }

    #[test]
    fn drain_purges_jobs_past_retention() {
        let s = setup();
        let worker = Worker::new(s.worker.conn.clone(), s.queue.clone())
            .with_config(WorkerConfig::new().with_retention(Some(Duration::from_secs(60))));
        for name in ["a", "b"] {
            let ext = s.adapter.insert(named(name), None);
            s.queue.enqueue(import_job(ext), JobOptions::new()).unwrap();
        }
        worker.drain().unwrap();
        assert_eq!(s.queue.jobs().len(), 2);

        s.clock.advance(Duration::from_secs(61));
        let ext = s.adapter.insert(named("c"), None);
        s.queue.enqueue(import_job(ext), JobOptions::new()).unwrap();
        worker.drain().unwrap();

        let jobs = s.queue.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].state, JobState::Done);
        assert_eq!(s.local.count(&model()), 3);
    }

    #[test]
    fn batch_job_fans_out() {
        let s = setup();
        s.adapter.insert(named("a"), None);
        s.adapter.insert(named("b"), None);
        s.queue
            .enqueue(
                Job::ImportBatch {
                    model: model(),
                    filter: crate::record::RecordFilter::all(),
                    force: false,
                },
                JobOptions::new(),
            )
            .unwrap();

        let reports = s.worker.drain().unwrap();
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].message, "0 run, 2 queued, 0 failed");
        assert_eq!(s.local.count(&model()), 2);
    }
}
