//! The local system of record.

use crate::context::RequestContext;
use crate::error::{SyncError, SyncResult};
use crate::record::{LocalRecord, Payload, RecordFilter};
use bindsync_store::{LocalId, Model};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};

/// Access to the business records the engine synchronizes.
///
/// Bindings only hold a [`LocalId`]; every read of record data goes through
/// this trait.
pub trait LocalStore: Send + Sync {
    /// Reads a record, `None` if it does not exist.
    fn read(&self, model: &Model, id: LocalId) -> SyncResult<Option<LocalRecord>>;

    /// Returns the ids of records matching `filter`.
    fn search(&self, model: &Model, filter: &RecordFilter) -> SyncResult<Vec<LocalId>>;

    /// Creates a record.
    fn create(&self, model: &Model, payload: &Payload, ctx: &RequestContext)
        -> SyncResult<LocalId>;

    /// Updates a record.
    fn write(
        &self,
        model: &Model,
        id: LocalId,
        payload: &Payload,
        ctx: &RequestContext,
    ) -> SyncResult<()>;
}

/// A write made to a [`MemoryLocalStore`], kept for assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalWrite {
    /// Model written.
    pub model: Model,
    /// Record written.
    pub id: LocalId,
    /// True for a create, false for an update.
    pub created: bool,
    /// Context passed with the write.
    pub context: RequestContext,
}

/// An in-memory local store for testing.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    tables: RwLock<HashMap<Model, BTreeMap<LocalId, Payload>>>,
    next_id: Mutex<u64>,
    writes: Mutex<Vec<LocalWrite>>,
}

impl MemoryLocalStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a record without recording a write.
    pub fn insert(&self, model: &Model, fields: Payload) -> LocalId {
        let id = self.allocate();
        self.tables
            .write()
            .entry(model.clone())
            .or_default()
            .insert(id, fields);
        id
    }

    /// Returns a record's fields.
    pub fn get(&self, model: &Model, id: LocalId) -> Option<Payload> {
        self.tables
            .read()
            .get(model)
            .and_then(|table| table.get(&id))
            .cloned()
    }

    /// Number of records of a model.
    pub fn count(&self, model: &Model) -> usize {
        self.tables.read().get(model).map_or(0, BTreeMap::len)
    }

    /// Writes made through [`LocalStore`] so far.
    pub fn writes(&self) -> Vec<LocalWrite> {
        self.writes.lock().clone()
    }

    fn allocate(&self) -> LocalId {
        let mut next = self.next_id.lock();
        *next += 1;
        LocalId(*next)
    }
}

impl LocalStore for MemoryLocalStore {
    fn read(&self, model: &Model, id: LocalId) -> SyncResult<Option<LocalRecord>> {
        Ok(self.get(model, id).map(|fields| LocalRecord::new(id, fields)))
    }

    fn search(&self, model: &Model, filter: &RecordFilter) -> SyncResult<Vec<LocalId>> {
        Ok(self
            .tables
            .read()
            .get(model)
            .map(|table| {
                table
                    .iter()
                    .filter(|(_, fields)| filter.matches(fields, None))
                    .map(|(id, _)| *id)
                    .collect()
            })
            .unwrap_or_default())
    }

    fn create(
        &self,
        model: &Model,
        payload: &Payload,
        ctx: &RequestContext,
    ) -> SyncResult<LocalId> {
        let id = self.insert(model, payload.clone());
        self.writes.lock().push(LocalWrite {
            model: model.clone(),
            id,
            created: true,
            context: ctx.clone(),
        });
        Ok(id)
    }

    fn write(
        &self,
        model: &Model,
        id: LocalId,
        payload: &Payload,
        ctx: &RequestContext,
    ) -> SyncResult<()> {
        {
            let mut tables = self.tables.write();
            let record = tables
                .get_mut(model)
                .and_then(|table| table.get_mut(&id))
                .ok_or_else(|| SyncError::local(format!("{model} record {id} does not exist")))?;
            for (field, value) in payload {
                record.insert(field.clone(), value.clone());
            }
        }
        self.writes.lock().push(LocalWrite {
            model: model.clone(),
            id,
            created: false,
            context: ctx.clone(),
        });
        Ok(())
    }
}
