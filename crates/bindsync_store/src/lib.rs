//! # bindsync Store
//!
//! Persistent binding table for bindsync.
//!
//! A binding links one local record to its counterpart on a remote backend
//! and carries the last time the pair was confirmed synchronized. This crate
//! owns the table and its two concurrency primitives:
//!
//! - **Uniqueness**: at most one binding per `(backend, model, local_id)` and
//!   at most one per `(backend, model, external_id)`. A violation surfaces as
//!   [`StoreError::UniqueViolation`], distinguishable from every other error.
//! - **Row locks**: [`BindingStore::try_lock`] never blocks. It either hands
//!   out a [`RowLockGuard`] or fails with [`StoreError::LockUnavailable`].
//!
//! Every mutation is durable when the call returns. There is no outer
//! transaction to roll back, so an external id written here survives any
//! later failure of the caller.
//!
//! ## Available Stores
//!
//! - [`MemoryBindingStore`] - For tests and single-process deployments
//! - [`FileBindingStore`] - Snapshot file with atomic replace and a process lock
//!
//! ## Example
//!
//! ```rust
//! use bindsync_store::{BackendId, BindingStore, LocalId, MemoryBindingStore, Model, NewBinding};
//!
//! let store = MemoryBindingStore::new();
//! let model = Model::new("product.category");
//! let binding = store
//!     .insert(NewBinding::placeholder(BackendId(1), model.clone(), LocalId(7)))
//!     .unwrap();
//! assert!(binding.external_id.is_none());
//!
//! let guard = store.try_lock(binding.id).unwrap();
//! assert!(store.try_lock(binding.id).is_err());
//! drop(guard);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod binding;
mod error;
mod file;
mod lock;
mod memory;
mod store;
mod table;
mod types;

pub use binding::{Binding, BindingFilter, NewBinding};
pub use error::{Constraint, StoreError, StoreResult};
pub use file::FileBindingStore;
pub use lock::{RowLockGuard, RowLocks};
pub use memory::MemoryBindingStore;
pub use store::BindingStore;
pub use table::{BindingTable, TableSnapshot};
pub use types::{BackendId, BindingId, ExternalId, LocalId, Model, Timestamp};
