//! Error types for the sync engine.

use crate::adapter::AdapterError;
use crate::registry::Role;
use bindsync_store::{BindingId, Model, StoreError};
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A transient condition; the same work should be tried again later.
    #[error("{reason} (retry in {}s)", delay.as_secs_f64())]
    Retryable {
        /// What went wrong.
        reason: String,
        /// How long to wait before retrying.
        delay: Duration,
    },

    /// Data could not be mapped or failed validation.
    #[error("data error: {0}")]
    Data(String),

    /// The registry has no component for a model.
    #[error("no {role} registered for model {model}")]
    MissingComponent {
        /// Model that was looked up.
        model: Model,
        /// Missing component.
        role: Role,
    },

    /// A binding referenced by a job or caller does not exist.
    #[error("binding {0} not found")]
    BindingNotFound(BindingId),

    /// Dependency resolution nested too deeply, most likely a cycle.
    #[error("dependency chain too deep at {model} (depth {depth})")]
    DependencyTooDeep {
        /// Model where the limit was hit.
        model: Model,
        /// Depth reached.
        depth: usize,
    },

    /// Binding store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Remote backend error.
    #[error("backend error: {0}")]
    Adapter(#[from] AdapterError),

    /// Local system of record error.
    #[error("local store error: {0}")]
    Local(String),

    /// Job queue error.
    #[error("queue error: {0}")]
    Queue(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Coarse classification of a [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Try again after a delay.
    Retryable,
    /// Bad data or setup; retrying will not help.
    Data,
    /// Anything else.
    Unexpected,
}

impl SyncError {
    /// Creates a retryable error.
    pub fn retryable(reason: impl Into<String>, delay: Duration) -> Self {
        Self::Retryable {
            reason: reason.into(),
            delay,
        }
    }

    /// Creates a data error.
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data(message.into())
    }

    /// Creates a local store error.
    pub fn local(message: impl Into<String>) -> Self {
        Self::Local(message.into())
    }

    /// Creates a missing component error.
    pub fn missing(model: &Model, role: Role) -> Self {
        Self::MissingComponent {
            model: model.clone(),
            role,
        }
    }

    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Retryable { .. } => ErrorKind::Retryable,
            SyncError::Adapter(e) if e.is_retryable() => ErrorKind::Retryable,
            SyncError::Data(_)
            | SyncError::MissingComponent { .. }
            | SyncError::DependencyTooDeep { .. }
            | SyncError::Config(_) => ErrorKind::Data,
            SyncError::Adapter(AdapterError::Rejected(_)) => ErrorKind::Data,
            _ => ErrorKind::Unexpected,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Retryable
    }

    /// Returns the requested retry delay, if the error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SyncError::Retryable { delay, .. } => Some(*delay),
            _ => None,
        }
    }
}
