//! Backend adapter abstraction for remote operations.

use crate::clock::{Clock, SystemClock};
use crate::record::{Payload, RecordFilter, RemoteRecord};
use bindsync_store::{ExternalId, Model, Timestamp};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::num::NonZeroU64;
use std::sync::Arc;
use thiserror::Error;

/// Result type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Errors reported by a backend adapter.
///
/// "Not found" is kept apart from transport failures: the state machines
/// treat a vanished record as a normal outcome.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    /// The remote record does not exist (any more).
    #[error("{model} record {external_id} does not exist in the backend")]
    NotFound {
        /// Model of the record.
        model: Model,
        /// Remote id that was requested.
        external_id: ExternalId,
    },

    /// Network or protocol failure.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the call can be retried.
        retryable: bool,
    },

    /// The backend refused the payload.
    #[error("rejected by backend: {0}")]
    Rejected(String),
}

impl AdapterError {
    /// Creates a not-found error.
    pub fn not_found(model: &Model, external_id: ExternalId) -> Self {
        Self::NotFound {
            model: model.clone(),
            external_id,
        }
    }

    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the record is missing remotely.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AdapterError::NotFound { .. })
    }

    /// Returns true if the call can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdapterError::Transport { retryable: true, .. })
    }
}

/// Remote operations for one model.
///
/// Timeouts and transport-level retries are the adapter's business; the
/// engine only sees the final result.
pub trait BackendAdapter: Send + Sync {
    /// Reads one record.
    fn read(&self, external_id: ExternalId) -> AdapterResult<RemoteRecord>;

    /// Returns the ids of all records matching `filter`.
    fn search(&self, filter: &RecordFilter) -> AdapterResult<Vec<ExternalId>>;

    /// Creates a record and returns its new id.
    fn create(&self, payload: &Payload) -> AdapterResult<ExternalId>;

    /// Updates a record.
    fn write(&self, external_id: ExternalId, payload: &Payload) -> AdapterResult<()>;
}

/// Read access to backends that only expose the older multi-record API.
pub trait LegacyAdapter: Send + Sync {
    /// Reads records by id. Missing ids are silently left out of the result.
    fn read(
        &self,
        model: &Model,
        ids: &[ExternalId],
        options: &Payload,
    ) -> AdapterResult<Vec<RemoteRecord>>;
}

/// Kind of adapter call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// `read`
    Read,
    /// `search`
    Search,
    /// `create`
    Create,
    /// `write`
    Write,
}

/// One recorded adapter call.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterCall {
    /// Model of the adapter.
    pub model: Model,
    /// Operation.
    pub kind: CallKind,
    /// Target record, or the id assigned by a create.
    pub external_id: Option<ExternalId>,
    /// Payload sent with a create or write.
    pub payload: Option<Payload>,
}

/// An ordered log of adapter calls, shareable between adapters.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<AdapterCall>>>,
}

impl CallLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, call: AdapterCall) {
        self.calls.lock().push(call);
    }

    /// Returns all calls so far.
    pub fn calls(&self) -> Vec<AdapterCall> {
        self.calls.lock().clone()
    }

    /// Returns the calls of one kind.
    pub fn of_kind(&self, kind: CallKind) -> Vec<AdapterCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.kind == kind)
            .cloned()
            .collect()
    }

    /// Returns the number of calls made.
    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns true if no call was made.
    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }

    /// Forgets all calls.
    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

/// An in-memory backend for testing.
///
/// Records every call in a [`CallLog`] and can be told to fail the next
/// call of a given kind.
#[derive(Debug)]
pub struct MemoryAdapter {
    model: Model,
    records: RwLock<BTreeMap<ExternalId, RemoteRecord>>,
    next_id: Mutex<NonZeroU64>,
    clock: Arc<dyn Clock>,
    log: CallLog,
    failures: Mutex<Vec<(CallKind, AdapterError)>>,
}

impl MemoryAdapter {
    /// Creates an empty backend for `model`; ids start at 1.
    pub fn new(model: impl Into<Model>) -> Self {
        Self {
            model: model.into(),
            records: RwLock::new(BTreeMap::new()),
            next_id: Mutex::new(NonZeroU64::MIN),
            clock: Arc::new(SystemClock),
            log: CallLog::new(),
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Sets the first id handed out by `create`.
    pub fn with_start_id(self, id: u64) -> Self {
        *self.next_id.lock() = NonZeroU64::new(id).unwrap_or(NonZeroU64::MIN);
        self
    }

    /// Sets the clock used for `write_date`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Records calls into a shared log.
    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    /// Returns the call log.
    pub fn log(&self) -> &CallLog {
        &self.log
    }

    /// Seeds a record without logging a call.
    pub fn put(&self, record: RemoteRecord) {
        if let Some(after) = NonZeroU64::new(record.external_id.get().saturating_add(1)) {
            let mut next = self.next_id.lock();
            *next = (*next).max(after);
        }
        self.records.write().insert(record.external_id, record);
    }

    /// Seeds a record with the next free id.
    pub fn insert(&self, fields: Payload, write_date: Option<Timestamp>) -> ExternalId {
        let id = self.allocate();
        self.records
            .write()
            .insert(id, RemoteRecord::new(id, write_date, fields));
        id
    }

    /// Deletes a record, as if removed on the remote side.
    pub fn remove(&self, external_id: ExternalId) -> Option<RemoteRecord> {
        self.records.write().remove(&external_id)
    }

    /// Sets the modification time of a record.
    pub fn touch(&self, external_id: ExternalId, write_date: Option<Timestamp>) {
        if let Some(record) = self.records.write().get_mut(&external_id) {
            record.write_date = write_date;
        }
    }

    /// Returns a record without logging a call.
    pub fn get(&self, external_id: ExternalId) -> Option<RemoteRecord> {
        self.records.read().get(&external_id).cloned()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if no record is stored.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Makes the next call of `kind` fail with `error`.
    pub fn fail_next(&self, kind: CallKind, error: AdapterError) {
        self.failures.lock().push((kind, error));
    }

    fn allocate(&self) -> ExternalId {
        let mut next = self.next_id.lock();
        let id = *next;
        *next = id.saturating_add(1);
        ExternalId::from(id)
    }

    fn injected(&self, kind: CallKind) -> AdapterResult<()> {
        let mut failures = self.failures.lock();
        if let Some(pos) = failures.iter().position(|(k, _)| *k == kind) {
            let (_, error) = failures.remove(pos);
            return Err(error);
        }
        Ok(())
    }

    fn record_call(&self, kind: CallKind, external_id: Option<ExternalId>, payload: Option<&Payload>) {
        self.log.push(AdapterCall {
            model: self.model.clone(),
            kind,
            external_id,
            payload: payload.cloned(),
        });
    }
}

impl BackendAdapter for MemoryAdapter {
    fn read(&self, external_id: ExternalId) -> AdapterResult<RemoteRecord> {
        self.record_call(CallKind::Read, Some(external_id), None);
        self.injected(CallKind::Read)?;
        self.get(external_id)
            .ok_or_else(|| AdapterError::not_found(&self.model, external_id))
    }

    fn search(&self, filter: &RecordFilter) -> AdapterResult<Vec<ExternalId>> {
        self.record_call(CallKind::Search, None, None);
        self.injected(CallKind::Search)?;
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| filter.matches(&r.fields, r.write_date))
            .map(|r| r.external_id)
            .collect())
    }

    fn create(&self, payload: &Payload) -> AdapterResult<ExternalId> {
        self.injected(CallKind::Create)?;
        let id = self.allocate();
        let record = RemoteRecord::new(id, Some(self.clock.now()), payload.clone());
        self.records.write().insert(id, record);
        self.record_call(CallKind::Create, Some(id), Some(payload));
        Ok(id)
    }

    fn write(&self, external_id: ExternalId, payload: &Payload) -> AdapterResult<()> {
        self.record_call(CallKind::Write, Some(external_id), Some(payload));
        self.injected(CallKind::Write)?;
        let now = self.clock.now();
        let mut records = self.records.write();
        let record = records
            .get_mut(&external_id)
            .ok_or_else(|| AdapterError::not_found(&self.model, external_id))?;
        for (field, value) in payload {
            record.fields.insert(field.clone(), value.clone());
        }
        record.write_date = Some(now);
        Ok(())
    }
}

impl LegacyAdapter for MemoryAdapter {
    fn read(
        &self,
        model: &Model,
        ids: &[ExternalId],
        _options: &Payload,
    ) -> AdapterResult<Vec<RemoteRecord>> {
        if *model != self.model {
            return Err(AdapterError::Rejected(format!(
                "legacy read of {model} sent to {} backend",
                self.model
            )));
        }
        for id in ids {
            self.record_call(CallKind::Read, Some(*id), None);
        }
        self.injected(CallKind::Read)?;
        let records = self.records.read();
        Ok(ids.iter().filter_map(|id| records.get(id).cloned()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(name: &str) -> Payload {
        let mut p = Payload::new();
        p.insert("name".into(), json!(name));
        p
    }

    #[test]
    fn create_read_write() {
        let adapter = MemoryAdapter::new("product.category").with_start_id(501);
        let id = adapter.create(&fields("Saleable")).unwrap();
        assert_eq!(id.get(), 501);

        let record = BackendAdapter::read(&adapter, id).unwrap();
        assert_eq!(record.get("name"), Some(&json!("Saleable")));
        assert!(record.write_date.is_some());

        adapter.write(id, &fields("All")).unwrap();
        assert_eq!(adapter.get(id).unwrap().get("name"), Some(&json!("All")));
        assert_eq!(adapter.log().len(), 3);
    }

    #[test]
    fn missing_record_is_not_found() {
        let adapter = MemoryAdapter::new("res.partner");
        let err = BackendAdapter::read(&adapter, ExternalId::new(9).unwrap()).unwrap_err();
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }

    #[test]
    fn injected_failure_applies_once() {
        let adapter = MemoryAdapter::new("res.partner");
        adapter.fail_next(
            CallKind::Create,
            AdapterError::transport_retryable("connection reset"),
        );
        let err = adapter.create(&fields("x")).unwrap_err();
        assert!(err.is_retryable());
        assert!(adapter.create(&fields("x")).is_ok());
    }

    #[test]
    fn search_and_legacy_read() {
        let adapter = MemoryAdapter::new("uom.uom");
        let a = adapter.insert(fields("Unit"), None);
        adapter.insert(fields("Dozen"), None);

        let found = adapter
            .search(&RecordFilter::all().eq("name", "Unit"))
            .unwrap();
        assert_eq!(found, vec![a]);

        let model = Model::new("uom.uom");
        let missing = ExternalId::new(99).unwrap();
        let records = LegacyAdapter::read(&adapter, &model, &[a, missing], &Payload::new()).unwrap();
        assert_eq!(records.len(), 1);

        let wrong = Model::new("res.partner");
        assert!(LegacyAdapter::read(&adapter, &wrong, &[a], &Payload::new()).is_err());
    }

    #[test]
    fn shared_log_keeps_global_order() {
        let log = CallLog::new();
        let a = MemoryAdapter::new("a").with_log(log.clone());
        let b = MemoryAdapter::new("b").with_log(log.clone());
        a.create(&fields("1")).unwrap();
        b.create(&fields("2")).unwrap();
        let models: Vec<_> = log.calls().into_iter().map(|c| c.model).collect();
        assert_eq!(models, vec![Model::new("a"), Model::new("b")]);
    }
}
