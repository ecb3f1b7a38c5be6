//! Error types for fieldlink core.

use thiserror::Error;

use crate::model::EntityKind;

/// Errors raised while turning a wire payload into typed graph values.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("expected a JSON object for {0}")]
    NotAnObject(&'static str),

    #[error("expected a JSON array for {0}")]
    NotAnArray(&'static str),

    #[error("decoding error: {0}")]
    DecodingError(String),

    #[error("normalization failed: {0}")]
    Normalize(#[from] NormalizeError),
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::DecodingError(e.to_string())
    }
}

/// Errors raised by the alias normalization pass.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("envelope of type {0:?} has no data object")]
    EmptyEnvelope(String),

    #[error("field {field} of {shape} must be an array")]
    ExpectedArray { shape: &'static str, field: String },
}

/// Validation errors for a single incoming entity.
///
/// These never abort an import: the reconciler counts them and moves on.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("{0} has an empty id")]
    EmptyId(EntityKind),

    #[error("{kind} {id} has a non-finite {field}")]
    NonFinite {
        kind: EntityKind,
        id: String,
        field: &'static str,
    },

    #[error("{kind} {id} has no owning {owner}")]
    MissingOwner {
        kind: EntityKind,
        id: String,
        owner: EntityKind,
    },

    #[error("geometry {id} is not a recognizable LINESTRING or POLYGON")]
    UnrecognizedGeometry { id: String },

    #[error("quantity {0} is negative")]
    NegativeQuantity(i64),
}

pub type Result<T> = std::result::Result<T, CoreError>;
