//! Units of deferred work and an in-memory queue to hold them.

use crate::clock::Clock;
use crate::error::{SyncError, SyncResult};
use crate::record::RecordFilter;
use crate::registry::DEFAULT_PRIORITY;
use bindsync_store::{Binding, BindingId, ExternalId, Model, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Identifier of an enqueued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generates a new random job id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Work a worker can run later.
///
/// A job names the record it touches so [`MemoryJobQueue::sync_status`] can
/// link pending work to a binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    /// Import one remote record.
    ImportRecord {
        /// Model of the record.
        model: Model,
        /// Remote id.
        external_id: ExternalId,
        /// Bypass the staleness check.
        force: bool,
    },
    /// Import one remote record through the legacy adapter.
    ImportRecordLegacy {
        /// Model of the record.
        model: Model,
        /// Remote id.
        external_id: ExternalId,
        /// Bypass the staleness check.
        force: bool,
    },
    /// Export one binding.
    ExportRecord {
        /// Model of the record.
        model: Model,
        /// Binding to export.
        binding_id: BindingId,
        /// Restrict an update to these local fields.
        fields: Option<Vec<String>>,
    },
    /// Enqueue imports for every remote record matching a filter.
    ImportBatch {
        /// Model to import.
        model: Model,
        /// Remote search filter.
        filter: RecordFilter,
        /// Bypass the staleness check.
        force: bool,
    },
    /// Enqueue exports for every local record matching a filter.
    ExportBatch {
        /// Model to export.
        model: Model,
        /// Local search filter.
        filter: RecordFilter,
        /// Restrict updates to these local fields.
        fields: Option<Vec<String>>,
    },
}

impl Job {
    /// The model the job works on.
    pub fn model(&self) -> &Model {
        match self {
            Job::ImportRecord { model, .. }
            | Job::ImportRecordLegacy { model, .. }
            | Job::ExportRecord { model, .. }
            | Job::ImportBatch { model, .. }
            | Job::ExportBatch { model, .. } => model,
        }
    }

    /// Returns true if the job transfers the record behind `binding`.
    pub fn touches(&self, model: &Model, binding: &Binding) -> bool {
        if self.model() != model {
            return false;
        }
        match self {
            Job::ImportRecord { external_id, .. } | Job::ImportRecordLegacy { external_id, .. } => {
                binding.external_id == Some(*external_id)
            }
            Job::ExportRecord { binding_id, .. } => *binding_id == binding.id,
            Job::ImportBatch { .. } | Job::ExportBatch { .. } => false,
        }
    }

    /// A human-readable summary.
    pub fn description(&self) -> String {
        match self {
            Job::ImportRecord {
                model, external_id, ..
            } => format!("Import a {model} record with ID {external_id}"),
            Job::ImportRecordLegacy {
                model, external_id, ..
            } => format!("Import a {model} record with ID {external_id} (legacy)"),
            Job::ExportRecord {
                model, binding_id, ..
            } => format!("Export a {model} record of binding {binding_id}"),
            Job::ImportBatch { model, .. } => format!("Prepare a batch import of {model}"),
            Job::ExportBatch { model, .. } => format!("Prepare a batch export of {model}"),
        }
    }
}

/// How a job is scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOptions {
    /// Lower runs first.
    pub priority: u8,
    /// Queue channel.
    pub channel: String,
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Do not run before this time.
    pub eta: Option<Timestamp>,
    /// Overrides the job's own description.
    pub description: Option<String>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            channel: "root".to_string(),
            max_retries: 5,
            eta: None,
            description: None,
        }
    }
}

impl JobOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the channel.
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// Sets the number of retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delays the first run.
    pub fn with_eta(mut self, eta: Timestamp) -> Self {
        self.eta = Some(eta);
        self
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Accepts jobs for later execution.
///
/// Delivery is at least once: a job may run again after a crash, so every
/// job must be safe to repeat.
pub trait JobDispatcher: Send + Sync + fmt::Debug {
    /// Enqueues a job.
    fn enqueue(&self, job: Job, options: JobOptions) -> SyncResult<JobId>;
}

/// Lifecycle of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Waiting to run.
    Pending,
    /// Taken by a worker.
    Started,
    /// Finished successfully.
    Done,
    /// Gave up.
    Failed,
}

impl JobState {
    /// Returns true if the job still has to run.
    pub fn is_open(&self) -> bool {
        matches!(self, JobState::Pending | JobState::Started)
    }
}

/// A job and its bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    /// Job id.
    pub id: JobId,
    /// The work.
    pub job: Job,
    /// Scheduling options.
    pub options: JobOptions,
    /// Current state.
    pub state: JobState,
    /// Times the job was started.
    pub attempts: u32,
    /// Earliest time of the next run.
    pub eta: Timestamp,
    /// Enqueue order.
    pub seq: u64,
    /// Result or failure message of the last run.
    pub result: Option<String>,
    /// When the job reached [`JobState::Done`] or [`JobState::Failed`].
    pub finished_at: Option<Timestamp>,
}

/// Aggregated job state of one binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Some job touching the binding has not finished.
    Waiting,
    /// The last finished job touching the binding failed.
    Error,
    /// Nothing pending and no failure.
    Done,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStatus::Waiting => "waiting",
            SyncStatus::Error => "error",
            SyncStatus::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    records: Vec<JobRecord>,
    next_seq: u64,
}

impl QueueInner {
    fn find_mut(&mut self, id: JobId) -> SyncResult<&mut JobRecord> {
        self.records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| SyncError::Queue(format!("unknown job {id}")))
    }
}

/// An in-process job queue.
///
/// Jobs are handed out by priority, then eta, then enqueue order. Finished
/// jobs are kept so their state can be inspected until
/// [`MemoryJobQueue::purge_finished`] drops them.
#[derive(Debug)]
pub struct MemoryJobQueue {
    clock: Arc<dyn Clock>,
    inner: Mutex<QueueInner>,
}

impl MemoryJobQueue {
    /// Creates an empty queue using `clock` for etas.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: Mutex::new(QueueInner::default()),
        }
    }

    /// Takes the next due job and marks it started.
    pub fn take_next(&self) -> Option<JobRecord> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let record = inner
            .records
            .iter_mut()
            .filter(|r| r.state == JobState::Pending && r.eta <= now)
            .min_by_key(|r| (r.options.priority, r.eta, r.seq))?;
        record.state = JobState::Started;
        record.attempts += 1;
        Some(record.clone())
    }

    /// Marks a job done.
    pub fn complete(&self, id: JobId, result: impl Into<String>) -> SyncResult<()> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let record = inner.find_mut(id)?;
        record.state = JobState::Done;
        record.result = Some(result.into());
        record.finished_at = Some(now);
        Ok(())
    }

    /// Puts a job back after a retryable failure.
    ///
    /// Returns [`JobState::Failed`] once the job has used up its retries.
    pub fn retry(&self, id: JobId, delay: Duration, reason: impl Into<String>) -> SyncResult<JobState> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let record = inner.find_mut(id)?;
        record.result = Some(reason.into());
        if record.attempts > record.options.max_retries {
            record.state = JobState::Failed;
            record.finished_at = Some(now);
        } else {
            record.state = JobState::Pending;
            record.eta = now.after(delay);
        }
        Ok(record.state)
    }

    /// Marks a job failed.
    pub fn fail(&self, id: JobId, reason: impl Into<String>) -> SyncResult<()> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let record = inner.find_mut(id)?;
        record.state = JobState::Failed;
        record.result = Some(reason.into());
        record.finished_at = Some(now);
        Ok(())
    }

    /// Drops jobs that finished before `cutoff` and returns how many.
    ///
    /// Open jobs are never dropped. A purged failure no longer shows up in
    /// [`MemoryJobQueue::sync_status`].
    pub fn purge_finished(&self, cutoff: Timestamp) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.records.len();
        inner
            .records
            .retain(|r| r.finished_at.map_or(true, |at| at >= cutoff));
        let purged = before - inner.records.len();
        if purged > 0 {
            tracing::debug!(purged, %cutoff, "finished jobs purged");
        }
        purged
    }

    /// Returns a job.
    pub fn get(&self, id: JobId) -> Option<JobRecord> {
        self.inner.lock().records.iter().find(|r| r.id == id).cloned()
    }

    /// All jobs in enqueue order.
    pub fn jobs(&self) -> Vec<JobRecord> {
        self.inner.lock().records.clone()
    }

    /// Number of jobs still waiting to run.
    pub fn pending(&self) -> usize {
        self.inner
            .lock()
            .records
            .iter()
            .filter(|r| r.state == JobState::Pending)
            .count()
    }

    /// Job-derived status of a binding.
    pub fn sync_status(&self, model: &Model, binding: &Binding) -> SyncStatus {
        let inner = self.inner.lock();
        let mut touching = inner
            .records
            .iter()
            .filter(|r| r.job.touches(model, binding))
            .peekable();
        if touching.peek().is_none() {
            return SyncStatus::Done;
        }

        let mut last_finished: Option<&JobRecord> = None;
        for record in touching {
            if record.state.is_open() {
                return SyncStatus::Waiting;
            }
            if last_finished.map_or(true, |last| last.seq < record.seq) {
                last_finished = Some(record);
            }
        }
        match last_finished {
            Some(record) if record.state == JobState::Failed => SyncStatus::Error,
            _ => SyncStatus::Done,
        }
    }
}

impl JobDispatcher for MemoryJobQueue {
    fn enqueue(&self, job: Job, options: JobOptions) -> SyncResult<JobId> {
        let id = JobId::new();
        let eta = options.eta.unwrap_or_else(|| self.clock.now());
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        tracing::debug!(job = %id, model = %job.model(), priority = options.priority, channel = %options.channel, "job enqueued");
        inner.records.push(JobRecord {
            id,
            job,
            options,
            state: JobState::Pending,
            attempts: 0,
            eta,
            seq,
            result: None,
            finished_at: None,
        });
        Ok(id)
    }
}
