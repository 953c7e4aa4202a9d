//! Verify command implementation.

use bindsync_store::TableSnapshot;
use std::path::Path;

/// Verification result.
#[derive(Debug)]
pub struct VerifyResult {
    /// Number of rows checked.
    pub rows_checked: usize,
    /// Problems found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying store at {}", path.display());
    println!();

    let snapshot = super::read_snapshot(path)?;
    let result = verify(&snapshot);

    println!("Rows checked: {}", result.rows_checked);
    for error in &result.errors {
        println!("  - {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Store verification passed");
        Ok(())
    } else {
        println!("✗ Store verification failed");
        Err("Verification failed".into())
    }
}

fn verify(snapshot: &TableSnapshot) -> VerifyResult {
    tracing::debug!(rows = snapshot.rows.len(), next_id = snapshot.next_id, "verifying snapshot");
    VerifyResult {
        rows_checked: snapshot.rows.len(),
        errors: snapshot.verify(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindsync_store::{
        BackendId, BindingStore, FileBindingStore, LocalId, Model, NewBinding,
    };

    #[test]
    fn written_store_verifies() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileBindingStore::open(dir.path(), true).unwrap();
            store
                .insert(NewBinding::placeholder(
                    BackendId(1),
                    Model::new("res.partner"),
                    LocalId(1),
                ))
                .unwrap();
        }

        let snapshot = super::super::read_snapshot(dir.path()).unwrap();
        let result = verify(&snapshot);
        assert_eq!(result.rows_checked, 1);
        assert!(result.is_ok());
    }

    #[test]
    fn duplicate_rows_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBindingStore::open(dir.path(), true).unwrap();
        let row = store
            .insert(NewBinding::placeholder(
                BackendId(1),
                Model::new("res.partner"),
                LocalId(1),
            ))
            .unwrap();
        let mut snapshot = store.table().snapshot();
        snapshot.rows.push(row);

        let result = verify(&snapshot);
        assert!(!result.is_ok());
        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(super::super::read_snapshot(&dir.path().join("nope")).is_err());
    }
}
