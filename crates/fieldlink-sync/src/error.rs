//! Error types for the sync module.

use std::time::Duration;

use thiserror::Error;

use crate::channel::ChannelState;

/// A scanned connection string that cannot be turned into an address.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("scanned code is empty")]
    Empty,

    #[error("scanned code contains {0:?}")]
    InvalidCharacter(char),

    #[error("unsupported scheme {0:?}, expected ws:// or wss://")]
    UnsupportedScheme(String),
}

/// Errors that can occur on a session channel.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Scanned descriptor was malformed.
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    /// The peer could not be reached.
    #[error("connection error: {0}")]
    Connection(String),

    /// Establishment did not finish within the liveness timeout.
    #[error("no answer within {0:?}")]
    LivenessTimeout(Duration),

    /// Send attempted before open resolved or after close.
    #[error("channel not connected")]
    NotConnected,

    /// A channel is single-use; a new pairing needs a new channel.
    #[error("channel already used (state {0:?})")]
    AlreadyUsed(ChannelState),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Outbound message could not be encoded.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
