//! File-backed binding store.
//!
//! Layout of a store directory:
//!
//! ```text
//! <store_path>/
//! ├─ BINDINGS          # Snapshot of the binding table
//! └─ LOCK              # Advisory lock for single-process access
//! ```
//!
//! Every mutation rewrites the snapshot with the write-then-rename pattern,
//! so a crash leaves either the old or the new table on disk, never a mix.

use crate::binding::{Binding, BindingFilter, NewBinding};
use crate::error::{StoreError, StoreResult};
use crate::lock::{RowLockGuard, RowLocks};
use crate::store::BindingStore;
use crate::table::{BindingTable, TableSnapshot};
use crate::types::{BackendId, BindingId, ExternalId, LocalId, Model};
use fs2::FileExt;
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const SNAPSHOT_FILE: &str = "BINDINGS";
const SNAPSHOT_TEMP: &str = "BINDINGS.tmp";
const LOCK_FILE: &str = "LOCK";

/// Magic bytes at the start of every snapshot.
const MAGIC: &[u8; 4] = b"BSNP";

/// A binding store persisted to a directory.
///
/// Holds an exclusive lock on the directory for its lifetime; a second open
/// of the same directory fails with [`StoreError::StoreLocked`].
#[derive(Debug)]
pub struct FileBindingStore {
    path: PathBuf,
    table: RwLock<BindingTable>,
    locks: RowLocks,
    _lock_file: File,
}

impl FileBindingStore {
    /// Opens or creates a store directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `StoreLocked`)
    /// - The snapshot cannot be decoded
    pub fn open(path: &Path, create_if_missing: bool) -> StoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(StoreError::Corrupted(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(StoreError::Corrupted(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::StoreLocked);
        }

        let table = match load_snapshot(&path.join(SNAPSHOT_FILE))? {
            Some(snapshot) => BindingTable::from_snapshot(snapshot)?,
            None => BindingTable::new(),
        };

        tracing::debug!(path = %path.display(), rows = table.len(), "opened binding store");

        Ok(Self {
            path: path.to_path_buf(),
            table: RwLock::new(table),
            locks: RowLocks::new(),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns a copy of the whole table.
    #[must_use]
    pub fn table(&self) -> BindingTable {
        self.table.read().clone()
    }

    /// Reads the snapshot of a store directory without opening the store.
    ///
    /// Takes no lock and checks only the file header, not the rows. Returns
    /// `None` for a store that was never written.
    pub fn read_snapshot(path: &Path) -> StoreResult<Option<TableSnapshot>> {
        load_snapshot(&path.join(SNAPSHOT_FILE))
    }

    /// Applies `op` to a copy of the table and persists the result.
    ///
    /// The in-memory table is only replaced once the snapshot is durable.
    fn mutate<T>(&self, op: impl FnOnce(&mut BindingTable) -> StoreResult<T>) -> StoreResult<T> {
        let mut table = self.table.write();
        let mut next = table.clone();
        let value = op(&mut next)?;
        self.save_snapshot(&next.snapshot())?;
        *table = next;
        Ok(value)
    }

    fn save_snapshot(&self, snapshot: &TableSnapshot) -> StoreResult<()> {
        let mut data = Vec::with_capacity(64 + snapshot.rows.len() * 48);
        data.extend_from_slice(MAGIC);
        data.extend_from_slice(&snapshot.version.to_le_bytes());
        ciborium::into_writer(snapshot, &mut data).map_err(StoreError::codec)?;

        let temp_path = self.path.join(SNAPSHOT_TEMP);
        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.path.join(SNAPSHOT_FILE))?;
        self.sync_directory()
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> StoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Reads and decodes a snapshot file, `None` if it does not exist.
fn load_snapshot(path: &Path) -> StoreResult<Option<TableSnapshot>> {
    if !path.exists() {
        return Ok(None);
    }

    let mut data = Vec::new();
    File::open(path)?.read_to_end(&mut data)?;
    if data.is_empty() {
        return Ok(None);
    }

    if data.len() < MAGIC.len() + 2 || &data[..MAGIC.len()] != MAGIC {
        return Err(StoreError::Corrupted("bad snapshot header".into()));
    }
    let header_version = u16::from_le_bytes([data[4], data[5]]);

    let snapshot: TableSnapshot =
        ciborium::from_reader(&data[MAGIC.len() + 2..]).map_err(StoreError::codec)?;
    if snapshot.version != header_version {
        return Err(StoreError::Corrupted(format!(
            "snapshot version mismatch: header {header_version}, body {}",
            snapshot.version
        )));
    }
    Ok(Some(snapshot))
}

impl BindingStore for FileBindingStore {
    fn get(&self, id: BindingId) -> StoreResult<Option<Binding>> {
        Ok(self.table.read().get(id).cloned())
    }

    fn find_by_local(
        &self,
        backend_id: BackendId,
        model: &Model,
        local_id: LocalId,
        include_inactive: bool,
    ) -> StoreResult<Option<Binding>> {
        Ok(self
            .table
            .read()
            .find_by_local(backend_id, model, local_id)
            .filter(|b| include_inactive || b.active)
            .cloned())
    }

    fn find_by_external(
        &self,
        backend_id: BackendId,
        model: &Model,
        external_id: ExternalId,
    ) -> StoreResult<Option<Binding>> {
        Ok(self
            .table
            .read()
            .find_by_external(backend_id, model, external_id)
            .cloned())
    }

    fn list(&self, filter: &BindingFilter) -> StoreResult<Vec<Binding>> {
        Ok(self.table.read().list(filter))
    }

    fn insert(&self, binding: NewBinding) -> StoreResult<Binding> {
        self.mutate(|table| table.insert(binding))
    }

    fn update(&self, binding: &Binding) -> StoreResult<()> {
        self.mutate(|table| table.update(binding))
    }

    fn try_lock(&self, id: BindingId) -> StoreResult<RowLockGuard> {
        if self.table.read().get(id).is_none() {
            return Err(StoreError::NotFound(id));
        }
        self.locks.try_lock(id)
    }
}
