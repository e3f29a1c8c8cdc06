use std::fmt;

use thiserror::Error;

/// All errors that Barrel can produce.
#[derive(Debug, Error)]
pub enum BarrelError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(ConflictKind),

    #[error("bad document: {0}")]
    BadDoc(String),

    #[error("invalid revision format: {0}")]
    InvalidRev(String),

    #[error("unknown store: {0}")]
    UnknownStore(String),

    #[error("database already exists: {0}")]
    DatabaseExists(String),

    /// The database writer went away mid-request. The write was not
    /// committed; a fresh writer has been spawned and the caller should
    /// resubmit.
    #[error("writer unavailable for database: {0}")]
    WriterDown(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why a write was rejected as a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Write without `_rev` against an existing, live document.
    DocExists,
    /// Write whose `_rev` is not a current leaf of the revision tree.
    RevisionConflict,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::DocExists => write!(f, "doc_exists"),
            ConflictKind::RevisionConflict => write!(f, "revision_conflict"),
        }
    }
}

impl BarrelError {
    /// True for both conflict flavors, useful in retry loops.
    pub fn is_conflict(&self) -> bool {
        matches!(self, BarrelError::Conflict(_))
    }
}

pub type Result<T> = std::result::Result<T, BarrelError>;
