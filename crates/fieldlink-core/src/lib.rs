//! # fieldlink core
//!
//! Pure types for fieldlink: the persisted entity rows, the lenient wire
//! shape of an entity graph, and the rules that connect them.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`EntityId`] - Opaque, caller-supplied global identifier
//! - [`EventGraph`] - One event and everything it owns, as sent on the wire
//! - [`PlanningPayload`] - Action groups applied to a pre-selected event
//! - [`EventStatus`] - Status derived from an event's date range
//!
//! ## Normalization
//!
//! Senders disagree on field names. Every payload passes through
//! [`normalize`] before it is decoded; see the alias tables there.

pub mod error;
pub mod geometry;
pub mod graph;
pub mod model;
pub mod normalize;
pub mod planning;
pub mod status;
pub mod types;
pub mod validation;

pub use error::{CoreError, NormalizeError, ValidationError};
pub use geometry::classify_wkt;
pub use graph::{
    ActionRecord, CoordinateRecord, EquipmentRecord, EventGraph, GeometryRecord, PictureRecord,
    PointRecord, RejectedEntity, TeamRecord,
};
pub use model::{
    Action, Coordinate, EntityKind, Equipment, EquipmentType, Event, Geometry, GeometryKind,
    Picture, Point, Team,
};
pub use normalize::{normalize_graph, normalize_graphs, normalize_planning};
pub use planning::{ActionGroup, PlanningPayload};
pub use status::EventStatus;
pub use types::{now_rfc3339, EntityId};
