//! Persisted entity rows.
//!
//! These are the shapes the store reads and writes. The wire shapes in
//! [`crate::graph`] are more lenient and are folded into these rows by the
//! reconciler.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::status::EventStatus;
use crate::types::EntityId;

/// Discriminator for every stored entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Event,
    Point,
    Picture,
    Route,
    Zone,
    Team,
    EquipmentType,
    Equipment,
    Coordinate,
    Action,
}

impl EntityKind {
    pub const ALL: [EntityKind; 10] = [
        EntityKind::Event,
        EntityKind::Point,
        EntityKind::Picture,
        EntityKind::Route,
        EntityKind::Zone,
        EntityKind::Team,
        EntityKind::EquipmentType,
        EntityKind::Equipment,
        EntityKind::Coordinate,
        EntityKind::Action,
    ];

    /// Name used in logs and summaries.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Event => "event",
            EntityKind::Point => "point",
            EntityKind::Picture => "picture",
            EntityKind::Route => "route",
            EntityKind::Zone => "zone",
            EntityKind::Team => "team",
            EntityKind::EquipmentType => "equipment_type",
            EntityKind::Equipment => "equipment",
            EntityKind::Coordinate => "coordinate",
            EntityKind::Action => "action",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routes and zones share one row shape and differ only by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryKind {
    Route,
    Zone,
}

impl From<GeometryKind> for EntityKind {
    fn from(kind: GeometryKind) -> Self {
        match kind {
            GeometryKind::Route => EntityKind::Route,
            GeometryKind::Zone => EntityKind::Zone,
        }
    }
}

/// Root aggregate.
///
/// Status is never stored: it is derived from the date range when read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EntityId,
    pub name: String,
    pub description: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl Event {
    pub fn status_on(&self, today: chrono::NaiveDate) -> EventStatus {
        EventStatus::derive(self.start_date.as_deref(), self.end_date.as_deref(), today)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub id: EntityId,
    pub event_id: EntityId,
    pub x: f64,
    pub y: f64,
    pub name: Option<String>,
    pub comment: Option<String>,
    pub category: Option<String>,
    pub status: Option<bool>,
    pub created_at: String,
    pub modified_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Picture {
    pub id: EntityId,
    pub point_id: EntityId,
    /// Opaque encoded image text, never interpreted here.
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub id: EntityId,
    pub event_id: EntityId,
    pub kind: GeometryKind,
    pub wkt: String,
    pub description: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: EntityId,
    pub event_id: EntityId,
    pub name: String,
}

/// Catalog entry referenced by equipment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentType {
    pub id: EntityId,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equipment {
    pub id: EntityId,
    pub event_id: EntityId,
    pub type_id: Option<EntityId>,
    pub quantity: i64,
    pub length_per_unit: Option<f64>,
    pub installed_at: Option<String>,
    pub removed_at: Option<String>,
}

impl Equipment {
    /// Placeholder created when an action targets equipment this device
    /// has never seen.
    pub fn placeholder(id: EntityId, event_id: EntityId) -> Self {
        Self {
            id,
            event_id,
            type_id: None,
            quantity: 1,
            length_per_unit: None,
            installed_at: None,
            removed_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub id: EntityId,
    pub equipment_id: EntityId,
    pub x: f64,
    pub y: f64,
    pub order_index: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: EntityId,
    pub team_id: EntityId,
    pub equipment_id: EntityId,
    pub kind: Option<String>,
    pub scheduled_time: Option<String>,
    pub done: bool,
}
