//! Error types for fieldlink transfers.

use std::time::Duration;

use fieldlink_core::{CoreError, EntityId, ValidationError};
use fieldlink_store::StoreError;
use fieldlink_sync::{DescriptorError, SyncError};
use thiserror::Error;

/// Errors that can occur while importing, exporting or transferring.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Storage error. Only fatal store errors escape an import.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Channel error.
    #[error("{0}")]
    Sync(#[from] SyncError),

    /// A payload could not be decoded.
    #[error("invalid payload: {0}")]
    Payload(#[from] CoreError),

    /// Planning import attempted with no event selected.
    /// A locally captured entity failed validation.
    #[error("invalid entity: {0}")]
    Invalid(#[from] ValidationError),

    #[error("no event selected: select an event first")]
    NoTargetEvent,

    #[error("event not found: {0}")]
    EventNotFound(EntityId),

    /// Peer answered `code 1`.
    #[error("refused by peer: {0}")]
    Refused(String),

    /// Peer answered `code 2` or a legacy `erreur:` sentinel.
    #[error("peer failed to import: {0}")]
    PeerFailed(String),

    /// Goodbye or closure arrived before any response.
    #[error("peer closed without responding")]
    PeerClosed,

    #[error("no response within {0:?}")]
    ResponseTimeout(Duration),

    /// Abnormal closure not preceded by a goodbye.
    #[error("{0}")]
    ConnectionLost(String),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TransferError {
    /// True when the local store is unusable.
    pub fn is_store_fatal(&self) -> bool {
        matches!(self, TransferError::Store(e) if e.is_fatal())
    }
}

impl From<DescriptorError> for TransferError {
    fn from(e: DescriptorError) -> Self {
        TransferError::Sync(e.into())
    }
}

/// Result type for fieldlink operations.
pub type Result<T> = std::result::Result<T, TransferError>;
