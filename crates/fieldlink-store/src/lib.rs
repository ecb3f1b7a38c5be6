//! # fieldlink store
//!
//! Storage abstraction for fieldlink. Provides a trait-based interface for
//! entity persistence with SQLite and in-memory implementations.
//!
//! ## Overview
//!
//! The reconciler and exporter only talk to the [`Store`] trait, so they
//! are storage-agnostic. The primary implementation is [`SqliteStore`],
//! with [`MemoryStore`] for testing.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`StoreExt`] - Existence-check-then-write helpers built on [`Store`]
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`UpsertResult`] - Whether an upsert inserted or updated
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fieldlink_core::{EntityKind, Event};
//! use fieldlink_store::{SqliteStore, Store, StoreExt};
//!
//! async fn example() {
//!     let store = SqliteStore::open("device.db").unwrap();
//!
//!     let event = Event {
//!         id: "E1".into(),
//!         name: "Festival".into(),
//!         description: String::new(),
//!         start_date: Some("2024-05-01".into()),
//!         end_date: None,
//!     };
//!     store.upsert_event(&event).await.unwrap();
//!
//!     // Cascades to everything the event owns
//!     store.delete(EntityKind::Event, &event.id).await.unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Caller-supplied identity**: every row is keyed by a global id; writes
//!   never invent ids
//! - **Cascading deletes**: enforced by foreign keys in SQLite and mirrored
//!   by hand in memory
//! - **Fatal vs row errors**: [`StoreError::is_fatal`] tells an unreachable
//!   store apart from one rejected row

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{Store, StoreExt, UpsertResult};
