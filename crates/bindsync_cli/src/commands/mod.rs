//! CLI command implementations.

pub mod inspect;
pub mod verify;

use bindsync_store::{BindingTable, FileBindingStore, TableSnapshot};
use std::path::Path;

/// Reads the snapshot of a store directory.
///
/// Commands only read, so they do not take the store lock and work while a
/// worker has the store open.
fn read_snapshot(path: &Path) -> Result<TableSnapshot, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No store found at {}", path.display()).into());
    }
    let snapshot = FileBindingStore::read_snapshot(path)?;
    Ok(snapshot.unwrap_or_else(|| BindingTable::new().snapshot()))
}
