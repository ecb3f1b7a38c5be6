//! # fieldlink
//!
//! Offline-first transfer of event data between a field device and a
//! desktop peer.
//!
//! ## Overview
//!
//! A field device keeps events, their points, routes, zones, teams,
//! equipment and planned actions in a local store. A desktop peer pairs
//! with it by QR code and then either pushes data to it or receives one
//! event from it:
//!
//! - **Receiving**: every `event`/`events` message is reconciled into the
//!   local store and acknowledged; `planning_data` is merged into the event
//!   selected beforehand
//! - **Sending**: one event is exported as an entity graph; the peer's
//!   `code 3` confirmation deletes it locally
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fieldlink::{Device, DeviceConfig};
//! use fieldlink::core::EntityId;
//! use fieldlink::sync::{decode, WebSocketConnector};
//!
//! async fn example() -> fieldlink::Result<()> {
//!     let device = Device::open(DeviceConfig::default())?;
//!     let address = decode("192.168.1.20:8765")?;
//!
//!     let mut session = device.session(WebSocketConnector);
//!     let report = session
//!         .receive(&address, Some(EntityId::new("E1")))
//!         .await?;
//!     println!("{} event(s) imported", report.graphs);
//!
//!     let sent = session.send_event(&address, &EntityId::new("E1")).await?;
//!     println!("sent {} entities", sent.entities);
//!     Ok(())
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent imports**: every write is keyed by a caller-supplied id;
//!   children without one get a derived id
//! - **Serialized imports**: sessions of one [`Device`] share an import lock
//! - **No retries**: a failed transfer is reported and left to the operator
//!
//! ## Re-exports
//!
//! - `fieldlink::core` - Entity rows, wire graphs, normalization
//! - `fieldlink::store` - Storage abstraction and SQLite
//! - `fieldlink::sync` - Descriptor decoding, session channel, messages

pub mod device;
pub mod error;
pub mod export;
pub mod orchestrator;
pub mod reconcile;

// Re-export component crates
pub use fieldlink_core as core;
pub use fieldlink_store as store;
pub use fieldlink_sync as sync;

pub use device::{Device, DeviceConfig, NewPoint};
pub use error::{Result, TransferError};
pub use export::export_event_graph;
pub use orchestrator::{
    AcceptAll, CancelHandle, GateDecision, ImportGate, ReceiveReport, SendReport, TransferConfig,
    TransferPhase, TransferSession, TransferStatus,
};
pub use reconcile::{ImportSummary, PlanningOutcome, PlanningSummary, Reconciler, Tally};

pub use fieldlink_core::{EntityId, EventGraph, EventStatus, PlanningPayload};
