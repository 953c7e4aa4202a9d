//! Error types for binding store operations.

use crate::types::{BackendId, BindingId, Model};
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for binding store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// The uniqueness constraint a write collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constraint {
    /// `(backend_id, model, local_id)` must be unique.
    LocalId,
    /// `(backend_id, model, external_id)` must be unique.
    ExternalId,
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::LocalId => write!(f, "binding_local_uniq"),
            Constraint::ExternalId => write!(f, "binding_external_uniq"),
        }
    }
}

/// Errors that can occur in the binding store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A write would create a second binding for the same key.
    ///
    /// Under concurrent load this means another worker won a race; callers
    /// are expected to retry rather than treat it as a bug.
    #[error(
        "duplicate key value violates unique constraint \"{constraint}\": \
         (backend_id, model, key)=({backend_id}, {model}, {key}) already exists"
    )]
    UniqueViolation {
        /// The violated constraint.
        constraint: Constraint,
        /// Backend of the conflicting row.
        backend_id: BackendId,
        /// Model of the conflicting row.
        model: Model,
        /// The duplicated local or external id.
        key: u64,
    },

    /// A row lock is held by someone else.
    #[error("could not obtain lock on binding {binding_id}")]
    LockUnavailable {
        /// The binding that is already locked.
        binding_id: BindingId,
    },

    /// The referenced binding does not exist.
    #[error("binding {0} not found")]
    NotFound(BindingId),

    /// Another process holds the store directory.
    #[error("binding store locked: another process has exclusive access")]
    StoreLocked,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Snapshot encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// The snapshot file is corrupted.
    #[error("store corrupted: {0}")]
    Corrupted(String),
}

impl StoreError {
    /// Returns true if this error is a uniqueness constraint violation.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation { .. })
    }

    /// Returns true if this error is a failed non-blocking lock attempt.
    pub fn is_lock_unavailable(&self) -> bool {
        matches!(self, StoreError::LockUnavailable { .. })
    }

    pub(crate) fn codec(message: impl fmt::Display) -> Self {
        Self::Codec(message.to_string())
    }
}
