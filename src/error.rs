use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use crate::Artifact;

/// Every way a scan acquisition can end without a linked artifact.
///
/// Errors are returned as values from [`crate::ScanClient::acquire_scan`]; the
/// caller decides how to present them. [`ScanError::Link`] is the only variant
/// that leaves a side effect behind: the artifact is on disk but no patient
/// record points at it.
#[derive(Debug, Error)]
pub enum ScanError {
    /// A required input was missing. Nothing was sent and nothing was written.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The remote service could not be reached or did not answer in time.
    #[error("request error: {0}")]
    Transport(String),

    /// The remote service answered with something the protocol does not allow.
    #[error("{0}")]
    Protocol(String),

    /// The deferred request never reached a terminal status.
    #[error("polling timed out after {elapsed:?}")]
    TimedOut { elapsed: Duration },

    /// The artifact could not be written to the artifact store.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// The artifact was written but could not be attached to the patient.
    #[error(
        "artifact {} stored but not linked to patient {patient}: {reason}",
        artifact.filename
    )]
    Link {
        artifact: Artifact,
        patient: String,
        reason: String,
    },

    #[error("cancelled")]
    Cancelled,
}

/// Coarse category of a [`ScanError`], for callers that only branch on kind.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScanErrorKind {
    Validation,
    Transport,
    Protocol,
    TimedOut,
    Storage,
    Link,
    Cancelled,
}

impl ScanError {
    pub fn kind(&self) -> ScanErrorKind {
        match self {
            ScanError::Validation(_) => ScanErrorKind::Validation,
            ScanError::Transport(_) => ScanErrorKind::Transport,
            ScanError::Protocol(_) => ScanErrorKind::Protocol,
            ScanError::TimedOut { .. } => ScanErrorKind::TimedOut,
            ScanError::Storage(_) => ScanErrorKind::Storage,
            ScanError::Link { .. } => ScanErrorKind::Link,
            ScanError::Cancelled => ScanErrorKind::Cancelled,
        }
    }

    /// True when the artifact exists on disk but is not linked to any patient.
    pub fn is_orphaned_artifact(&self) -> bool {
        matches!(self, ScanError::Link { .. })
    }

    /// The stored but unlinked artifact of a [`ScanError::Link`], for
    /// [`crate::ScanClient::relink`].
    pub fn orphaned_artifact(&self) -> Option<&Artifact> {
        match self {
            ScanError::Link { artifact, .. } => Some(artifact),
            _ => None,
        }
    }

    pub(crate) fn transport(err: reqwest::Error) -> Self {
        ScanError::Transport(err.to_string())
    }
}

/// Errors raised by an [`crate::ArtifactStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("artifact {0} already exists")]
    AlreadyExists(String),

    #[error("unsafe artifact filename: {0:?}")]
    UnsafeName(String),

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("payload stream failed: {0}")]
    Stream(std::io::Error),

    #[error("write cancelled")]
    Cancelled,
}

/// Errors raised by a [`crate::PatientRecords`] implementation.
#[derive(Debug, Error)]
pub enum RecordsError {
    #[error("failed to read patient roster {}: {source}", path.display())]
    Roster {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read link ledger {}: {source}", path.display())]
    Ledger {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to append link record: {0}")]
    Append(std::io::Error),

    #[error("unknown internal patient id {0}")]
    UnknownPatientId(i64),
}
