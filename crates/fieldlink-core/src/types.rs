//! Strong type definitions for fieldlink.
//!
//! Entity identity is global and caller-supplied, so identifiers are opaque
//! strings wrapped in a newtype to keep them apart from free text.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, globally unique identifier of a stored entity.
///
/// The same id observed twice refers to the same logical row.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identifier for an entity created on this device.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Deterministic identifier derived from a scope and a list of parts.
    ///
    /// Used when an incoming child arrives without an id: re-importing the
    /// same payload derives the same id, which keeps imports idempotent.
    pub fn derive(scope: &str, parts: &[&str]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(scope.as_bytes());
        for part in parts {
            hasher.update(&[0u8]);
            hasher.update(part.as_bytes());
        }
        let hash = hasher.finalize();
        Self(format!("{}-{}", scope, hex::encode(&hash.as_bytes()[..16])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// True when the id is empty or only whitespace.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Current UTC time as an RFC 3339 string with millisecond precision.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_is_deterministic() {
        let a = EntityId::derive("coord", &["EQ1", "0"]);
        let b = EntityId::derive("coord", &["EQ1", "0"]);
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("coord-"));
    }

    #[test]
    fn test_derive_separates_parts() {
        let a = EntityId::derive("coord", &["EQ1", "10"]);
        let b = EntityId::derive("coord", &["EQ11", "0"]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_generate_is_unique() {
        assert_ne!(EntityId::generate(), EntityId::generate());
    }

    #[test]
    fn test_serde_transparent() {
        let id = EntityId::new("E1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"E1\"");
        let back: EntityId = serde_json::from_str("\"E1\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_blank() {
        assert!(EntityId::new("  ").is_blank());
        assert!(!EntityId::new("P1").is_blank());
    }
}
