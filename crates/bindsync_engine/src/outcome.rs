//! Results of a single-record transfer.

use bindsync_store::{ExternalId, LocalId};
use std::fmt;

/// Why a transfer did not happen. None of these is an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Exports are disabled on the backend.
    NoExport,
    /// A `must_skip` hook decided to skip, with its explanation.
    MustSkip(String),
    /// An `init_import` hook vetoed the import.
    Vetoed,
    /// The remote record no longer exists.
    RemoteMissing,
    /// The local copy is at least as recent as the remote record.
    UpToDate,
    /// The mapper produced an empty payload.
    NothingToExport,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoExport => write!(f, "Nothing to export. (no export flag on backend)"),
            SkipReason::MustSkip(reason) if reason.is_empty() => write!(f, "Skipped."),
            SkipReason::MustSkip(reason) => f.write_str(reason),
            SkipReason::Vetoed => write!(f, "Import vetoed."),
            SkipReason::RemoteMissing => write!(f, "Record does no longer exist in the backend."),
            SkipReason::UpToDate => write!(f, "Already up-to-date."),
            SkipReason::NothingToExport => write!(f, "Nothing to export."),
        }
    }
}

/// Decision returned by gate hooks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Phase {
    /// Continue with the transfer.
    #[default]
    Proceed,
    /// Stop and report the transfer as skipped.
    Skip(SkipReason),
}

impl Phase {
    /// Skip with a free-form explanation.
    pub fn skip(reason: impl Into<String>) -> Self {
        Phase::Skip(SkipReason::MustSkip(reason.into()))
    }
}

/// Result of running an exporter or importer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The record was pushed to the backend.
    Exported {
        /// Remote id now bound.
        external_id: ExternalId,
        /// True if the remote record was created by this run.
        created: bool,
    },
    /// The record was pulled into the local store.
    Imported {
        /// Local id now bound.
        local_id: LocalId,
        /// True if the local record was created by this run.
        created: bool,
    },
    /// Nothing was transferred.
    Skipped(SkipReason),
}

impl Outcome {
    /// Returns true if the run was skipped.
    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped(_))
    }

    /// Returns the skip reason, if any.
    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match self {
            Outcome::Skipped(reason) => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Exported { external_id, .. } => {
                write!(f, "Record exported with ID {external_id} on the backend.")
            }
            Outcome::Imported { local_id, created } => {
                let verb = if *created { "created" } else { "updated" };
                write!(f, "Record {verb} locally with ID {local_id}.")
            }
            Outcome::Skipped(reason) => fmt::Display::fmt(reason, f),
        }
    }
}
