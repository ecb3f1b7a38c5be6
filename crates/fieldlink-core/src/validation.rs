//! Per-entity checks run before anything is written.
//!
//! A failed check skips that one entity; it never aborts the import.

use crate::error::ValidationError;
use crate::graph::{
    ActionRecord, CoordinateRecord, EquipmentRecord, EventGraph, GeometryRecord, PointRecord,
    TeamRecord,
};
use crate::model::EntityKind;
use crate::types::EntityId;

type Result = std::result::Result<(), ValidationError>;

pub fn validate_id(kind: EntityKind, id: &EntityId) -> Result {
    if id.is_blank() {
        return Err(ValidationError::EmptyId(kind));
    }
    Ok(())
}

fn finite(kind: EntityKind, id: &str, field: &'static str, value: f64) -> Result {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::NonFinite {
            kind,
            id: id.to_string(),
            field,
        })
    }
}

pub fn validate_event(graph: &EventGraph) -> Result {
    validate_id(EntityKind::Event, &graph.id)
}

/// The geometry must carry a non-empty WKT string.
pub fn validate_geometry(kind: EntityKind, geometry: &GeometryRecord) -> Result {
    validate_id(kind, &geometry.id)?;
    match geometry.wkt.as_deref().map(str::trim) {
        Some(wkt) if !wkt.is_empty() => Ok(()),
        _ => Err(ValidationError::UnrecognizedGeometry {
            id: geometry.id.to_string(),
        }),
    }
}

pub fn validate_point(point: &PointRecord) -> Result {
    validate_id(EntityKind::Point, &point.id)?;
    finite(EntityKind::Point, point.id.as_str(), "x", point.x)?;
    finite(EntityKind::Point, point.id.as_str(), "y", point.y)
}

pub fn validate_team(team: &TeamRecord) -> Result {
    validate_id(EntityKind::Team, &team.id)
}

pub fn validate_equipment(equipment: &EquipmentRecord) -> Result {
    validate_id(EntityKind::Equipment, &equipment.id)?;
    match equipment.quantity {
        Some(q) if q < 0 => Err(ValidationError::NegativeQuantity(q)),
        _ => Ok(()),
    }
}

pub fn validate_coordinate(id: &EntityId, coordinate: &CoordinateRecord) -> Result {
    validate_id(EntityKind::Coordinate, id)?;
    finite(EntityKind::Coordinate, id.as_str(), "x", coordinate.x)?;
    finite(EntityKind::Coordinate, id.as_str(), "y", coordinate.y)
}

/// An action needs both its team and its target equipment.
pub fn validate_action(action: &ActionRecord) -> Result {
    validate_id(EntityKind::Action, &action.id)?;
    let missing = |owner| ValidationError::MissingOwner {
        kind: EntityKind::Action,
        id: action.id.to_string(),
        owner,
    };
    match &action.team_id {
        Some(id) if !id.is_blank() => {}
        _ => return Err(missing(EntityKind::Team)),
    }
    match &action.equipment_id {
        Some(id) if !id.is_blank() => Ok(()),
        _ => Err(missing(EntityKind::Equipment)),
    }
}
