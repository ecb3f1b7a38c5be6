//! Error types for the store module.

use fieldlink_core::EntityKind;
use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The store cannot be reached at all (poisoned lock, dead worker).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// No row with this id.
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    /// Duplicate id or missing parent row.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn not_found(kind: EntityKind, id: impl ToString) -> Self {
        StoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// True when the error means the store itself is unusable, as opposed
    /// to a single row being rejected.
    ///
    /// A fatal error aborts a whole import; anything else only skips the
    /// entity being written.
    pub fn is_fatal(&self) -> bool {
        match self {
            StoreError::Unavailable(_) | StoreError::Migration(_) | StoreError::Io(_) => true,
            StoreError::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::CannotOpen
                    | ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::DatabaseCorrupt
                    | ErrorCode::NotADatabase
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::DiskFull
                    | ErrorCode::ReadOnly
                    | ErrorCode::PermissionDenied
                    | ErrorCode::OutOfMemory
            ),
            StoreError::Database(_) => false,
            StoreError::NotFound { .. }
            | StoreError::Constraint(_)
            | StoreError::InvalidData(_) => false,
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
