//! # bindsync Engine
//!
//! Synchronization engine keeping records consistent between a local system
//! of record and a remote backend.
//!
//! This crate provides:
//! - [`Binder`]: local ↔ external id translation and timestamp updates
//! - [`Exporter`] and [`Importer`]: single-record state machines
//! - Batch drivers with [`Direct`] and [`Delayed`] dispatch
//! - An in-memory job queue and a [`Worker`] that drains it
//! - A static [`Registry`] of per-model adapters, mappers and hooks
//!
//! ## Architecture
//!
//! A batch driver enumerates candidates and hands each record to a dispatch
//! strategy. The strategy either runs the state machine right away or
//! enqueues a job that a worker runs later. The state machine consults the
//! binder, the mapper and the adapter, recursing into dependencies before
//! it transfers the record itself.
//!
//! ## Key Invariants
//!
//! - At most one export of a binding runs at a time; the loser is retryable
//! - Dependencies are bound before the dependent record is transferred
//! - Bindings are only mutated through the binder
//! - A uniqueness race resolves to one binding; the loser is retryable
//! - Lock contention never blocks; it surfaces as [`SyncError::Retryable`]

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod advisory;
mod batch;
mod binder;
mod clock;
mod config;
mod connector;
mod context;
mod error;
mod exporter;
mod hooks;
mod importer;
mod job;
mod local;
mod mapper;
mod outcome;
mod record;
mod registry;
mod retry;
mod worker;

pub use adapter::{
    AdapterCall, AdapterError, AdapterResult, BackendAdapter, CallKind, CallLog, LegacyAdapter,
    MemoryAdapter,
};
pub use advisory::{
    acquire_or_retry, AdvisoryGuard, AdvisoryLocks, FileAdvisoryLocks, MemoryAdvisoryLocks,
};
pub use batch::{
    BatchExporter, BatchFailure, BatchImporter, BatchSummary, Delayed, Direct, DispatchStrategy,
    Dispatched,
};
pub use binder::Binder;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BackendConfig, MainRecord, RetryConfig};
pub use connector::Connector;
pub use context::RequestContext;
pub use error::{ErrorKind, SyncError, SyncResult};
pub use exporter::{Exporter, EXTERNAL_ID_KEY};
pub use hooks::{
    DefaultHooks, ExportDependency, ExportHooks, ImportDependency, ImportHooks,
    ReferenceDependencies,
};
pub use importer::Importer;
pub use job::{
    Job, JobDispatcher, JobId, JobOptions, JobRecord, JobState, MemoryJobQueue, SyncStatus,
};
pub use local::{LocalStore, LocalWrite, MemoryLocalStore};
pub use mapper::{ExportMapper, FieldMapper, ImportMapper, MapContext};
pub use outcome::{Outcome, Phase, SkipReason};
pub use record::{LocalRecord, Payload, RecordFilter, RemoteRecord};
pub use registry::{ModelComponents, Registry, RegistryBuilder, Role};
pub use retry::{lock_or_retry, retry_unique_violation};
pub use worker::{JobReport, Worker, WorkerConfig};

/// Version of the engine crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use bindsync_store::{
    BackendId, Binding, BindingFilter, BindingId, BindingStore, ExternalId, LocalId, Model,
    Timestamp,
};
