//! Wire shape of an entity graph.
//!
//! An entity graph is the nested JSON form of one event and everything it
//! owns. These types are deliberately lenient: only `id` is required on each
//! entity, every collection defaults to empty, and owning ids may be omitted
//! on nested children (the reconciler fills them from the parent).
//!
//! Field names here are canonical. Payloads using legacy aliases must go
//! through [`crate::normalize`] first.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{
    Action, Coordinate, Equipment, EquipmentType, Event, Geometry, Picture, Point, Team,
};
use crate::types::EntityId;

/// One event and its owned collections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventGraph {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    /// Advisory only. The receiver derives status from the dates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub routes: Vec<GeometryRecord>,
    #[serde(default)]
    pub zones: Vec<GeometryRecord>,
    /// Legacy untyped geometry list, classified by WKT keyword on import.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub geometries: Vec<GeometryRecord>,
    #[serde(default)]
    pub points: Vec<PointRecord>,
    #[serde(default)]
    pub teams: Vec<TeamRecord>,
    #[serde(default)]
    pub equipment: Vec<EquipmentRecord>,
    #[serde(default)]
    pub actions: Vec<ActionRecord>,
    /// Children that could not be decoded and were left out of the
    /// collections above. Never sent on the wire.
    #[serde(skip)]
    pub rejected: Vec<RejectedEntity>,
}

impl EventGraph {
    /// Graph with no children, mostly useful in tests and builders.
    pub fn empty(id: impl Into<EntityId>) -> Self {
        Self {
            id: id.into(),
            name: None,
            description: None,
            start_date: None,
            end_date: None,
            status: None,
            routes: Vec::new(),
            zones: Vec::new(),
            geometries: Vec::new(),
            points: Vec::new(),
            teams: Vec::new(),
            equipment: Vec::new(),
            actions: Vec::new(),
            rejected: Vec::new(),
        }
    }

    /// The event row this graph describes.
    pub fn event_row(&self) -> Event {
        Event {
            id: self.id.clone(),
            name: self.name.clone().unwrap_or_default(),
            description: self.description.clone().unwrap_or_default(),
            start_date: self.start_date.clone(),
            end_date: self.end_date.clone(),
        }
    }

    /// Total number of entities carried, the event included.
    pub fn entity_count(&self) -> usize {
        1 + self.routes.len()
            + self.zones.len()
            + self.geometries.len()
            + self.points.len()
            + self.points.iter().map(|p| p.pictures.len()).sum::<usize>()
            + self.teams.len()
            + self.equipment.len()
            + self
                .equipment
                .iter()
                .map(|e| e.coordinates.len())
                .sum::<usize>()
            + self.actions.len()
    }
}

/// A child entity dropped while decoding a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedEntity {
    /// Collection the entity arrived in, e.g. `points`.
    pub collection: &'static str,
    pub id: Option<String>,
    pub reason: String,
}

impl fmt::Display for RejectedEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{} entry {}: {}", self.collection, id, self.reason),
            None => write!(f, "{} entry: {}", self.collection, self.reason),
        }
    }
}

/// A route or a zone. Which one is decided by the collection it arrives in,
/// or by its WKT keyword for the legacy untyped list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryRecord {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wkt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointRecord {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EntityId>,
    #[serde(default = "nan", deserialize_with = "lenient::number")]
    pub x: f64,
    #[serde(default = "nan", deserialize_with = "lenient::number")]
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient::flag",
        skip_serializing_if = "Option::is_none"
    )]
    pub status: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
    #[serde(default)]
    pub pictures: Vec<PictureRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PictureRecord {
    /// Pictures from older senders may lack an id; one is derived on import.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point_id: Option<EntityId>,
    #[serde(default)]
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRecord {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentRecord {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_description: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient::integer",
        skip_serializing_if = "Option::is_none"
    )]
    pub quantity: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length_per_unit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_at: Option<String>,
    #[serde(default)]
    pub coordinates: Vec<CoordinateRecord>,
}

impl EquipmentRecord {
    /// Catalog entry carried alongside this equipment, when it names one.
    pub fn equipment_type(&self) -> Option<EquipmentType> {
        let id = self.type_id.clone()?;
        let name = self.type_name.clone()?;
        Some(EquipmentType {
            id,
            name,
            description: self.type_description.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinateRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equipment_id: Option<EntityId>,
    #[serde(default = "nan", deserialize_with = "lenient::number")]
    pub x: f64,
    #[serde(default = "nan", deserialize_with = "lenient::number")]
    pub y: f64,
    #[serde(
        default,
        deserialize_with = "lenient::integer",
        skip_serializing_if = "Option::is_none"
    )]
    pub order_index: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equipment_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_time: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient::flag",
        skip_serializing_if = "Option::is_none"
    )]
    pub done: Option<bool>,
}

fn nan() -> f64 {
    f64::NAN
}

// ─────────────────────────────────────────────────────────────────────────
// Rows to wire records (export side)
// ─────────────────────────────────────────────────────────────────────────

impl From<Geometry> for GeometryRecord {
    fn from(g: Geometry) -> Self {
        Self {
            id: g.id,
            event_id: Some(g.event_id),
            wkt: Some(g.wkt),
            description: g.description,
            created_at: Some(g.created_at),
        }
    }
}

impl PointRecord {
    pub fn from_row(p: Point, pictures: Vec<Picture>) -> Self {
        Self {
            id: p.id,
            event_id: Some(p.event_id),
            x: p.x,
            y: p.y,
            name: p.name,
            comment: p.comment,
            category: p.category,
            status: p.status,
            created_at: Some(p.created_at),
            modified_at: Some(p.modified_at),
            pictures: pictures.into_iter().map(PictureRecord::from).collect(),
        }
    }
}

impl From<Picture> for PictureRecord {
    fn from(p: Picture) -> Self {
        Self {
            id: Some(p.id),
            point_id: Some(p.point_id),
            image: p.image,
        }
    }
}

impl From<Team> for TeamRecord {
    fn from(t: Team) -> Self {
        Self {
            id: t.id,
            event_id: Some(t.event_id),
            name: Some(t.name),
        }
    }
}

impl EquipmentRecord {
    pub fn from_row(
        e: Equipment,
        ty: Option<EquipmentType>,
        coordinates: Vec<Coordinate>,
    ) -> Self {
        let (type_name, type_description) = match ty {
            Some(t) => (Some(t.name), t.description),
            None => (None, None),
        };
        Self {
            id: e.id,
            event_id: Some(e.event_id),
            type_id: e.type_id,
            type_name,
            type_description,
            quantity: Some(e.quantity),
            length_per_unit: e.length_per_unit,
            installed_at: e.installed_at,
            removed_at: e.removed_at,
            coordinates: coordinates.into_iter().map(CoordinateRecord::from).collect(),
        }
    }
}

impl From<Coordinate> for CoordinateRecord {
    fn from(c: Coordinate) -> Self {
        Self {
            id: Some(c.id),
            equipment_id: Some(c.equipment_id),
            x: c.x,
            y: c.y,
            order_index: Some(c.order_index),
        }
    }
}

impl From<Action> for ActionRecord {
    fn from(a: Action) -> Self {
        Self {
            id: a.id,
            team_id: Some(a.team_id),
            equipment_id: Some(a.equipment_id),
            kind: a.kind,
            scheduled_time: a.scheduled_time,
            done: Some(a.done),
        }
    }
}

/// Deserializers for values that senders encode inconsistently.
pub(crate) mod lenient {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    /// Boolean flag given as `true`/`false`, `0`/`1`, or their string forms.
    pub fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
        match Option::<Value>::deserialize(d)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(b)),
            Some(Value::Number(n)) => Ok(Some(n.as_f64().map_or(false, |f| f != 0.0))),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(Some(true)),
                "false" | "0" | "" => Ok(Some(false)),
                other => Err(D::Error::custom(format!("invalid flag {:?}", other))),
            },
            Some(other) => Err(D::Error::custom(format!("invalid flag {}", other))),
        }
    }

    /// Number given either as a JSON number or a numeric string.
    pub fn number<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        match Option::<Value>::deserialize(d)? {
            None | Some(Value::Null) => Ok(f64::NAN),
            Some(Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| D::Error::custom("number out of range")),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| D::Error::custom(format!("invalid number {:?}", s))),
            Some(other) => Err(D::Error::custom(format!("invalid number {}", other))),
        }
    }

    /// Whole number given as a JSON integer, an integral float, or a
    /// numeric string.
    pub fn integer<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        let parsed = match Option::<Value>::deserialize(d)? {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().and_then(whole)),
            Some(Value::String(s)) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().and_then(whole))
            }
            Some(other) => {
                return Err(D::Error::custom(format!("invalid integer {}", other)));
            }
        };
        parsed
            .map(Some)
            .ok_or_else(|| D::Error::custom("expected a whole number"))
    }

    fn whole(f: f64) -> Option<i64> {
        (f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64).then(|| f as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_only_id_is_required() {
        let graph: EventGraph = serde_json::from_value(json!({"id": "E1"})).unwrap();
        assert_eq!(graph.id, EntityId::new("E1"));
        assert!(graph.points.is_empty());
        assert_eq!(graph.entity_count(), 1);

        let missing: Result<EventGraph, _> = serde_json::from_value(json!({"name": "x"}));
        assert!(missing.is_err());
    }

    #[test]
    fn test_done_flag_encodings() {
        for (raw, expected) in [
            (json!(true), Some(true)),
            (json!(0), Some(false)),
            (json!(1), Some(true)),
            (json!("1"), Some(true)),
            (json!("false"), Some(false)),
            (json!(null), None),
        ] {
            let action: ActionRecord =
                serde_json::from_value(json!({"id": "A1", "done": raw})).unwrap();
            assert_eq!(action.done, expected);
        }
        let absent: ActionRecord = serde_json::from_value(json!({"id": "A1"})).unwrap();
        assert_eq!(absent.done, None);
    }

    #[test]
    fn test_numeric_strings_accepted() {
        let point: PointRecord =
            serde_json::from_value(json!({"id": "P1", "x": "2.5", "y": 3})).unwrap();
        assert_eq!(point.x, 2.5);
        assert_eq!(point.y, 3.0);

        let missing: PointRecord = serde_json::from_value(json!({"id": "P2"})).unwrap();
        assert!(missing.x.is_nan());
    }

    #[test]
    fn test_quantity_encodings() {
        for (raw, expected) in [
            (json!(2), Some(2)),
            (json!("2"), Some(2)),
            (json!(3.0), Some(3)),
            (json!(null), None),
        ] {
            let eq: EquipmentRecord =
                serde_json::from_value(json!({"id": "EQ1", "quantity": raw})).unwrap();
            assert_eq!(eq.quantity, expected);
        }
        for raw in [json!(1.5), json!("two"), json!([1])] {
            let bad: Result<EquipmentRecord, _> =
                serde_json::from_value(json!({"id": "EQ1", "quantity": raw}));
            assert!(bad.is_err());
        }
    }

    #[test]
    fn test_rejected_is_not_serialized() {
        let mut graph = EventGraph::empty("E1");
        graph.rejected.push(RejectedEntity {
            collection: "points",
            id: Some("P1".into()),
            reason: "invalid number".into(),
        });
        let text = serde_json::to_string(&graph).unwrap();
        assert!(!text.contains("rejected"));
        assert_eq!(graph.rejected[0].to_string(), "points entry P1: invalid number");
    }

    #[test]
    fn test_equipment_type_requires_id_and_name() {
        let mut eq: EquipmentRecord =
            serde_json::from_value(json!({"id": "EQ1", "type_id": "T1"})).unwrap();
        assert!(eq.equipment_type().is_none());
        eq.type_name = Some("Barrier".into());
        let ty = eq.equipment_type().unwrap();
        assert_eq!(ty.id, EntityId::new("T1"));
        assert_eq!(ty.name, "Barrier");
    }

    #[test]
    fn test_event_row_defaults_text() {
        let graph = EventGraph::empty("E1");
        let row = graph.event_row();
        assert_eq!(row.name, "");
        assert_eq!(row.description, "");
    }
}
