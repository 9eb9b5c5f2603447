//! Repository error taxonomy.

use crate::db::DbError;
use crate::repo::lifecycle::RepositoryState;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type RepoResult<T> = Result<T, RepoError>;

/// Errors surfaced by alert and expression repositories.
///
/// "Not found" is not an error: `get` returns `Ok(None)`. Malformed stored
/// rows are logged and degrade to "not found" on read paths, so
/// `InvalidData` only escapes from the row-level generator APIs.
#[derive(Debug)]
pub enum RepoError {
    /// Operation invoked in the wrong lifecycle state. Indicates a caller bug.
    InvalidState {
        repository: &'static str,
        operation: &'static str,
        expected: RepositoryState,
        actual: RepositoryState,
    },
    /// Query descriptor handed to a repository other than the one that
    /// created it.
    ForeignQuery { repository: &'static str },
    /// Record could not be converted to its stored form; nothing was written.
    Serialization { id: Uuid, message: String },
    /// Write was rejected by the store and rolled back.
    StorageConflict { id: Uuid, reason: ConflictReason },
    /// Stored row cannot be converted back to a record.
    InvalidData(String),
    Db(DbError),
}

/// Why a write transaction was rolled back.
#[derive(Debug)]
pub enum ConflictReason {
    /// Row version changed between read and write.
    VersionMismatch { expected_version: i64 },
    /// Constraint violation, lock contention or commit failure.
    Rejected(rusqlite::Error),
}

impl Display for ConflictReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VersionMismatch { expected_version } => {
                write!(f, "row no longer at version {expected_version}")
            }
            Self::Rejected(err) => write!(f, "{err}"),
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidState {
                repository,
                operation,
                expected,
                actual,
            } => write!(
                f,
                "{repository} repository cannot `{operation}` while {actual}; expected {expected}"
            ),
            Self::ForeignQuery { repository } => write!(
                f,
                "query descriptor was created by another {repository} repository"
            ),
            Self::Serialization { id, message } => {
                write!(f, "cannot serialize record {id}: {message}")
            }
            Self::StorageConflict { id, reason } => {
                write!(f, "storage conflict for record {id}: {reason}")
            }
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::StorageConflict {
                reason: ConflictReason::Rejected(err),
                ..
            } => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl RepoError {
    /// Re-labels a failed write inside an upsert transaction as a conflict.
    pub(crate) fn into_conflict(self, id: Uuid) -> Self {
        match self {
            Self::Db(DbError::Sqlite(err)) => Self::StorageConflict {
                id,
                reason: ConflictReason::Rejected(err),
            },
            other => other,
        }
    }

    /// Whether this error reports a rolled-back write.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::StorageConflict { .. })
    }
}
