//! In-memory binding table with unique indexes.

use crate::binding::{Binding, BindingFilter, NewBinding};
use crate::error::{Constraint, StoreError, StoreResult};
use crate::types::{BackendId, BindingId, ExternalId, LocalId, Model};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u16 = 1;

type LocalKey = (BackendId, Model, LocalId);
type ExternalKey = (BackendId, Model, ExternalId);

/// The binding table and its two unique indexes.
///
/// Both store implementations keep one of these behind a lock. The indexes
/// are derived state and are rebuilt when a snapshot is loaded.
#[derive(Debug, Clone)]
pub struct BindingTable {
    next_id: u64,
    rows: BTreeMap<BindingId, Binding>,
    by_local: HashMap<LocalKey, BindingId>,
    by_external: HashMap<ExternalKey, BindingId>,
}

/// Serialized form of a [`BindingTable`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSnapshot {
    /// Snapshot format version.
    pub version: u16,
    /// Next row id to assign.
    pub next_id: u64,
    /// All rows, active or not.
    pub rows: Vec<Binding>,
}

impl TableSnapshot {
    /// Checks the rows of a snapshot without loading them into a table.
    ///
    /// Unlike [`BindingTable::from_snapshot`], which stops at the first
    /// problem, this reports every violation.
    #[must_use]
    pub fn verify(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.version > SNAPSHOT_VERSION {
            problems.push(format!("unsupported snapshot version: {}", self.version));
        }
        problems.extend(verify_rows(self.rows.iter(), self.next_id));
        problems
    }
}

fn verify_rows<'a>(rows: impl Iterator<Item = &'a Binding>, next_id: u64) -> Vec<String> {
    let mut problems = Vec::new();
    let mut seen_local: HashMap<LocalKey, BindingId> = HashMap::new();
    let mut seen_external: HashMap<ExternalKey, BindingId> = HashMap::new();
    let mut seen_ids = HashSet::new();

    for row in rows {
        if !seen_ids.insert(row.id) {
            problems.push(format!("binding id {} appears twice", row.id));
        }
        let local_key = (row.backend_id, row.model.clone(), row.local_id);
        if let Some(other) = seen_local.insert(local_key, row.id) {
            problems.push(format!(
                "bindings {other} and {} share local id {} in {}",
                row.id, row.local_id, row.model
            ));
        }
        if let Some(ext) = row.external_id {
            let external_key = (row.backend_id, row.model.clone(), ext);
            if let Some(other) = seen_external.insert(external_key, row.id) {
                problems.push(format!(
                    "bindings {other} and {} share external id {ext} in {}",
                    row.id, row.model
                ));
            }
        }
        if row.id.0 >= next_id {
            problems.push(format!("binding {} is above next id {next_id}", row.id));
        }
    }

    problems
}

impl Default for BindingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl BindingTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: 1,
            rows: BTreeMap::new(),
            by_local: HashMap::new(),
            by_external: HashMap::new(),
        }
    }

    /// Rebuilds a table from a snapshot, re-checking both constraints.
    pub fn from_snapshot(snapshot: TableSnapshot) -> StoreResult<Self> {
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(StoreError::Corrupted(format!(
                "unsupported snapshot version: {}",
                snapshot.version
            )));
        }

        let mut table = Self::new();
        for row in snapshot.rows {
            if row.id.0 >= snapshot.next_id {
                return Err(StoreError::Corrupted(format!(
                    "row id {} not below next id {}",
                    row.id, snapshot.next_id
                )));
            }
            table.check_unique(&row, None)?;
            table.index(&row);
            table.rows.insert(row.id, row);
        }
        table.next_id = snapshot.next_id;
        Ok(table)
    }

    /// Produces a snapshot of the current rows.
    #[must_use]
    pub fn snapshot(&self) -> TableSnapshot {
        TableSnapshot {
            version: SNAPSHOT_VERSION,
            next_id: self.next_id,
            rows: self.rows.values().cloned().collect(),
        }
    }

    /// Number of rows, including inactive ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Gets a row by id.
    #[must_use]
    pub fn get(&self, id: BindingId) -> Option<&Binding> {
        self.rows.get(&id)
    }

    /// Finds the row for a local record.
    #[must_use]
    pub fn find_by_local(
        &self,
        backend_id: BackendId,
        model: &Model,
        local_id: LocalId,
    ) -> Option<&Binding> {
        self.by_local
            .get(&(backend_id, model.clone(), local_id))
            .and_then(|id| self.rows.get(id))
    }

    /// Finds the row for a remote record.
    #[must_use]
    pub fn find_by_external(
        &self,
        backend_id: BackendId,
        model: &Model,
        external_id: ExternalId,
    ) -> Option<&Binding> {
        self.by_external
            .get(&(backend_id, model.clone(), external_id))
            .and_then(|id| self.rows.get(id))
    }

    /// Returns all rows matching `filter`, ordered by id.
    #[must_use]
    pub fn list(&self, filter: &BindingFilter) -> Vec<Binding> {
        self.rows
            .values()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect()
    }

    /// Inserts a new row.
    pub fn insert(&mut self, new: NewBinding) -> StoreResult<Binding> {
        let binding = Binding {
            id: BindingId(self.next_id),
            backend_id: new.backend_id,
            model: new.model,
            local_id: new.local_id,
            external_id: new.external_id,
            sync_timestamp: new.sync_timestamp,
            active: true,
        };
        self.check_unique(&binding, None)?;

        self.next_id += 1;
        self.index(&binding);
        self.rows.insert(binding.id, binding.clone());
        Ok(binding)
    }

    /// Replaces an existing row.
    ///
    /// The backend, model and id of a row are immutable; only the local id,
    /// external id, timestamp and active flag may change.
    pub fn update(&mut self, binding: &Binding) -> StoreResult<()> {
        let current = self
            .rows
            .get(&binding.id)
            .cloned()
            .ok_or(StoreError::NotFound(binding.id))?;

        if current.backend_id != binding.backend_id || current.model != binding.model {
            return Err(StoreError::Corrupted(format!(
                "binding {} cannot move between backends or models",
                binding.id
            )));
        }

        self.check_unique(binding, Some(binding.id))?;

        self.unindex(&current);
        self.index(binding);
        self.rows.insert(binding.id, binding.clone());
        Ok(())
    }

    /// Verifies every row against both constraints.
    ///
    /// Returns one message per violation found. An empty result means the
    /// table is consistent.
    #[must_use]
    pub fn verify(&self) -> Vec<String> {
        verify_rows(self.rows.values(), self.next_id)
    }

    fn check_unique(&self, binding: &Binding, ignore: Option<BindingId>) -> StoreResult<()> {
        let local_key = (binding.backend_id, binding.model.clone(), binding.local_id);
        if let Some(existing) = self.by_local.get(&local_key) {
            if Some(*existing) != ignore {
                return Err(StoreError::UniqueViolation {
                    constraint: Constraint::LocalId,
                    backend_id: binding.backend_id,
                    model: binding.model.clone(),
                    key: binding.local_id.0,
                });
            }
        }

        if let Some(ext) = binding.external_id {
            let external_key = (binding.backend_id, binding.model.clone(), ext);
            if let Some(existing) = self.by_external.get(&external_key) {
                if Some(*existing) != ignore {
                    return Err(StoreError::UniqueViolation {
                        constraint: Constraint::ExternalId,
                        backend_id: binding.backend_id,
                        model: binding.model.clone(),
                        key: ext.get(),
                    });
                }
            }
        }

        Ok(())
    }

    fn index(&mut self, binding: &Binding) {
        self.by_local.insert(
            (binding.backend_id, binding.model.clone(), binding.local_id),
            binding.id,
        );
        if let Some(ext) = binding.external_id {
            self.by_external
                .insert((binding.backend_id, binding.model.clone(), ext), binding.id);
        }
    }

    fn unindex(&mut self, binding: &Binding) {
        self.by_local
            .remove(&(binding.backend_id, binding.model.clone(), binding.local_id));
        if let Some(ext) = binding.external_id {
            self.by_external
                .remove(&(binding.backend_id, binding.model.clone(), ext));
        }
    }
}
