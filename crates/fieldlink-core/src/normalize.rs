//! Field-name normalization.
//!
//! Senders of different generations name the same field differently
//! (`startDate`, `dateDebut`, `date_debut`...). Before anything is decoded
//! into typed graph values, the raw JSON goes through a single pass that
//! renames every accepted alias to its canonical key. The rules live in one
//! table per shape; the engine never sees an alias.
//!
//! When both an alias and the canonical key carry a value, the canonical
//! key wins. A `null` value counts as absent.
//!
//! Decoding is per entity. Only the event itself (or, for planning, the
//! outer list) has to decode; a child that does not is recorded as a
//! [`RejectedEntity`] and left out.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{CoreError, NormalizeError, Result};
use crate::graph::{EquipmentRecord, EventGraph, PointRecord, RejectedEntity};
use crate::planning::{ActionGroup, PlanningPayload};

/// Every JSON object shape the pass knows how to rename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Event,
    Geometry,
    Point,
    Picture,
    Team,
    Equipment,
    Coordinate,
    Action,
    ActionGroup,
}

impl Shape {
    fn name(&self) -> &'static str {
        match self {
            Shape::Event => "event",
            Shape::Geometry => "geometry",
            Shape::Point => "point",
            Shape::Picture => "picture",
            Shape::Team => "team",
            Shape::Equipment => "equipment",
            Shape::Coordinate => "coordinate",
            Shape::Action => "action",
            Shape::ActionGroup => "action group",
        }
    }
}

/// A canonical key and the aliases it absorbs, in priority order.
struct Alias {
    canonical: &'static str,
    accepted: &'static [&'static str],
}

const fn alias(canonical: &'static str, accepted: &'static [&'static str]) -> Alias {
    Alias {
        canonical,
        accepted,
    }
}

enum Child {
    Many(Shape),
    One(Shape),
}

const EVENT: &[Alias] = &[
    alias("start_date", &["startDate", "dateDebut", "date_debut"]),
    alias("end_date", &["endDate", "dateFin", "date_fin"]),
    alias("status", &["statut"]),
    alias("routes", &["parcours"]),
    alias("equipment", &["equipements", "equipments"]),
    alias("geometries", &["geometry_list"]),
];

const GEOMETRY: &[Alias] = &[
    alias("wkt", &["geometryJson", "geometry_json", "geometry"]),
    alias("description", &["name"]),
    alias("event_id", &["eventId"]),
    alias("created_at", &["createdAt"]),
];

const POINT: &[Alias] = &[
    alias("event_id", &["eventId"]),
    alias("category", &["type"]),
    alias("created_at", &["createdAt"]),
    alias("modified_at", &["modifiedAt"]),
];

const PICTURE: &[Alias] = &[
    alias("point_id", &["pointId"]),
    alias("image", &["image_data", "imageData"]),
];

const TEAM: &[Alias] = &[alias("event_id", &["eventId"])];

const EQUIPMENT: &[Alias] = &[
    alias("event_id", &["eventId"]),
    alias("type_id", &["typeId"]),
    alias("type_name", &["name", "typeName"]),
    alias("type_description", &["description", "typeDescription"]),
    alias("length_per_unit", &["lengthPerUnit"]),
    alias("installed_at", &["datePose", "date_pose"]),
    alias("removed_at", &["dateDepose", "date_depose"]),
];

const COORDINATE: &[Alias] = &[
    alias(
        "equipment_id",
        &["equipementId", "equipement_id", "equipmentId"],
    ),
    alias("order_index", &["orderIndex"]),
];

const ACTION: &[Alias] = &[
    alias("team_id", &["teamId"]),
    alias(
        "equipment_id",
        &["equipementId", "equipement_id", "equipmentId"],
    ),
    alias("kind", &["actionType", "action_type", "type"]),
    alias("scheduled_time", &["scheduledTime"]),
    alias("done", &["isDone", "is_done"]),
];

const ACTION_GROUP: &[Alias] = &[
    alias("equipment", &["equipements"]),
    alias("coordinates", &["coordonees"]),
];

fn aliases(shape: Shape) -> &'static [Alias] {
    match shape {
        Shape::Event => EVENT,
        Shape::Geometry => GEOMETRY,
        Shape::Point => POINT,
        Shape::Picture => PICTURE,
        Shape::Team => TEAM,
        Shape::Equipment => EQUIPMENT,
        Shape::Coordinate => COORDINATE,
        Shape::Action => ACTION,
        Shape::ActionGroup => ACTION_GROUP,
    }
}

fn children(shape: Shape) -> &'static [(&'static str, Child)] {
    match shape {
        Shape::Event => &[
            ("routes", Child::Many(Shape::Geometry)),
            ("zones", Child::Many(Shape::Geometry)),
            ("geometries", Child::Many(Shape::Geometry)),
            ("points", Child::Many(Shape::Point)),
            ("teams", Child::Many(Shape::Team)),
            ("equipment", Child::Many(Shape::Equipment)),
            ("actions", Child::Many(Shape::Action)),
        ],
        Shape::Point => &[("pictures", Child::Many(Shape::Picture))],
        Shape::Equipment => &[("coordinates", Child::Many(Shape::Coordinate))],
        Shape::ActionGroup => &[
            ("team", Child::One(Shape::Team)),
            ("equipment", Child::Many(Shape::Equipment)),
            ("coordinates", Child::Many(Shape::Coordinate)),
            ("actions", Child::Many(Shape::Action)),
        ],
        _ => &[],
    }
}

/// Rename aliases in place, recursing into known child collections.
///
/// Non-object values are left untouched.
pub fn normalize(value: &mut Value, shape: Shape) -> std::result::Result<(), NormalizeError> {
    let Some(map) = value.as_object_mut() else {
        return Ok(());
    };
    for rule in aliases(shape) {
        resolve(map, rule);
    }
    for (key, child) in children(shape) {
        match map.get_mut(*key) {
            None => {}
            Some(Value::Null) => {
                map.remove(*key);
            }
            Some(Value::Array(items)) => {
                let Child::Many(child_shape) = child else {
                    return Err(NormalizeError::ExpectedArray {
                        shape: shape.name(),
                        field: (*key).to_string(),
                    });
                };
                for item in items.iter_mut() {
                    normalize(item, *child_shape)?;
                }
            }
            Some(other) => match child {
                Child::One(child_shape) => normalize(other, *child_shape)?,
                Child::Many(_) => {
                    return Err(NormalizeError::ExpectedArray {
                        shape: shape.name(),
                        field: (*key).to_string(),
                    })
                }
            },
        }
    }
    Ok(())
}

fn resolve(map: &mut Map<String, Value>, rule: &Alias) {
    let canonical_present = matches!(map.get(rule.canonical), Some(v) if !v.is_null());
    let mut chosen = None;
    for name in rule.accepted {
        if let Some(v) = map.remove(*name) {
            if chosen.is_none() && !v.is_null() {
                chosen = Some(v);
            }
        }
    }
    if !canonical_present {
        if let Some(v) = chosen {
            map.insert(rule.canonical.to_string(), v);
        }
    }
}

/// Strip a nested `{"type": "event", "data": {...}}` envelope, which some
/// senders place inside the `events` array.
fn unwrap_event_envelope(value: Value) -> std::result::Result<Value, NormalizeError> {
    match value {
        Value::Object(mut map)
            if map.get("type").and_then(Value::as_str) == Some("event")
                && !map.contains_key("id") =>
        {
            match map.remove("data") {
                Some(data @ Value::Object(_)) => Ok(data),
                _ => Err(NormalizeError::EmptyEnvelope("event".to_string())),
            }
        }
        other => Ok(other),
    }
}

fn take(value: &mut Value, key: &str) -> Vec<Value> {
    match value.as_object_mut().and_then(|map| map.remove(key)) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

fn id_of(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn plain<T: DeserializeOwned>(value: Value, _: &mut Vec<RejectedEntity>) -> serde_json::Result<T> {
    serde_json::from_value(value)
}

/// Decode each item on its own, setting aside the ones that fail.
fn decode_each<T>(
    items: Vec<Value>,
    collection: &'static str,
    rejected: &mut Vec<RejectedEntity>,
    decode: impl Fn(Value, &mut Vec<RejectedEntity>) -> serde_json::Result<T>,
) -> Vec<T> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let id = id_of(&item);
        match decode(item, rejected) {
            Ok(decoded) => out.push(decoded),
            Err(e) => rejected.push(RejectedEntity {
                collection,
                id,
                reason: e.to_string(),
            }),
        }
    }
    out
}

fn decode_point(mut value: Value, rejected: &mut Vec<RejectedEntity>) -> serde_json::Result<PointRecord> {
    let pictures = take(&mut value, "pictures");
    let mut point: PointRecord = serde_json::from_value(value)?;
    point.pictures = decode_each(pictures, "pictures", rejected, plain);
    Ok(point)
}

fn decode_equipment(
    mut value: Value,
    rejected: &mut Vec<RejectedEntity>,
) -> serde_json::Result<EquipmentRecord> {
    let coordinates = take(&mut value, "coordinates");
    let mut equipment: EquipmentRecord = serde_json::from_value(value)?;
    equipment.coordinates = decode_each(coordinates, "coordinates", rejected, plain);
    Ok(equipment)
}

fn decode_group(mut value: Value, rejected: &mut Vec<RejectedEntity>) -> serde_json::Result<ActionGroup> {
    let equipment = take(&mut value, "equipment");
    let coordinates = take(&mut value, "coordinates");
    let actions = take(&mut value, "actions");
    let mut group: ActionGroup = serde_json::from_value(value)?;
    group.equipment = decode_each(equipment, "equipment", rejected, decode_equipment);
    group.coordinates = decode_each(coordinates, "coordinates", rejected, plain);
    group.actions = decode_each(actions, "actions", rejected, plain);
    Ok(group)
}

/// Normalize one raw entity graph and decode it.
///
/// Fails only when the event itself cannot be decoded. Children that cannot
/// be decoded end up in [`EventGraph::rejected`].
pub fn normalize_graph(value: Value) -> Result<EventGraph> {
    let mut value = unwrap_event_envelope(value)?;
    if !value.is_object() {
        return Err(CoreError::NotAnObject("event"));
    }
    normalize(&mut value, Shape::Event)?;

    let routes = take(&mut value, "routes");
    let zones = take(&mut value, "zones");
    let geometries = take(&mut value, "geometries");
    let points = take(&mut value, "points");
    let teams = take(&mut value, "teams");
    let equipment = take(&mut value, "equipment");
    let actions = take(&mut value, "actions");

    let mut graph: EventGraph = serde_json::from_value(value)?;
    let mut rejected = Vec::new();
    graph.routes = decode_each(routes, "routes", &mut rejected, plain);
    graph.zones = decode_each(zones, "zones", &mut rejected, plain);
    graph.geometries = decode_each(geometries, "geometries", &mut rejected, plain);
    graph.points = decode_each(points, "points", &mut rejected, decode_point);
    graph.teams = decode_each(teams, "teams", &mut rejected, plain);
    graph.equipment = decode_each(equipment, "equipment", &mut rejected, decode_equipment);
    graph.actions = decode_each(actions, "actions", &mut rejected, plain);
    graph.rejected = rejected;
    Ok(graph)
}

/// Normalize the `data` of an `events` message: an array of graphs, or a
/// single graph object.
pub fn normalize_graphs(value: Value) -> Result<Vec<EventGraph>> {
    match value {
        Value::Array(items) => items.into_iter().map(normalize_graph).collect(),
        Value::Object(_) => Ok(vec![normalize_graph(value)?]),
        _ => Err(CoreError::NotAnArray("events")),
    }
}

/// Normalize a planning payload: a bare array of action groups, or a
/// wrapper object carrying them under `actions`.
///
/// A group that cannot be decoded, or a child of one, is set aside in
/// [`PlanningPayload::rejected`].
pub fn normalize_planning(value: Value) -> Result<PlanningPayload> {
    let groups = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("actions") {
            Some(Value::Array(items)) => items,
            _ => return Err(CoreError::NotAnArray("planning actions")),
        },
        _ => return Err(CoreError::NotAnArray("planning actions")),
    };
    let mut normalized = Vec::with_capacity(groups.len());
    for mut group in groups {
        normalize(&mut group, Shape::ActionGroup)?;
        normalized.push(group);
    }
    let mut rejected = Vec::new();
    let groups = decode_each(normalized, "planning groups", &mut rejected, decode_group);
    Ok(PlanningPayload { groups, rejected })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityId;
    use proptest::prelude::*;
    use serde_json::json;

    const START_ALIASES: [&str; 3] = ["startDate", "dateDebut", "date_debut"];

    proptest! {
        #[test]
        fn test_normalize_is_idempotent(
            start in "[0-9]{4}-[0-9]{2}-[0-9]{2}",
            alias_idx in 0usize..3,
            with_canonical in any::<bool>(),
        ) {
            let mut raw = json!({"id": "E1"});
            raw[START_ALIASES[alias_idx]] = json!(start.clone());
            if with_canonical {
                raw["start_date"] = json!("canonical");
            }

            let mut once = raw.clone();
            normalize(&mut once, Shape::Event).unwrap();
            let mut twice = once.clone();
            normalize(&mut twice, Shape::Event).unwrap();
            prop_assert_eq!(&once, &twice);

            let expected = if with_canonical { "canonical".to_string() } else { start };
            prop_assert_eq!(once["start_date"].as_str(), Some(expected.as_str()));
            for alias in START_ALIASES {
                prop_assert!(once.get(alias).is_none());
            }
        }
    }

    #[test]
    fn test_event_aliases() {
        let graph = normalize_graph(json!({
            "id": "E1",
            "dateDebut": "2024-05-01",
            "endDate": "2024-05-02",
            "statut": "actif",
            "parcours": [{"id": "R1", "geometryJson": "LINESTRING(0 0, 1 1)"}],
            "equipements": [{"id": "EQ1", "typeId": "T1", "name": "Barrier"}]
        }))
        .unwrap();
        assert_eq!(graph.start_date.as_deref(), Some("2024-05-01"));
        assert_eq!(graph.end_date.as_deref(), Some("2024-05-02"));
        assert_eq!(graph.status.as_deref(), Some("actif"));
        assert_eq!(graph.routes[0].wkt.as_deref(), Some("LINESTRING(0 0, 1 1)"));
        assert_eq!(graph.equipment[0].type_id, Some(EntityId::new("T1")));
        assert_eq!(graph.equipment[0].type_name.as_deref(), Some("Barrier"));
    }

    #[test]
    fn test_canonical_key_wins() {
        let graph = normalize_graph(json!({
            "id": "E1",
            "start_date": "2024-05-01",
            "startDate": "1999-01-01"
        }))
        .unwrap();
        assert_eq!(graph.start_date.as_deref(), Some("2024-05-01"));
    }

    #[test]
    fn test_null_canonical_falls_back_to_alias() {
        let graph = normalize_graph(json!({
            "id": "E1",
            "start_date": null,
            "date_debut": "2024-05-01"
        }))
        .unwrap();
        assert_eq!(graph.start_date.as_deref(), Some("2024-05-01"));
    }

    #[test]
    fn test_nested_point_and_picture_aliases() {
        let graph = normalize_graph(json!({
            "id": "E1",
            "points": [{
                "id": "P1", "eventId": "E1", "x": 1.0, "y": 2.0, "type": "obstacle",
                "createdAt": "2024-05-01T08:00:00Z",
                "pictures": [{"id": "PIC1", "pointId": "P1", "imageData": "abc"}]
            }]
        }))
        .unwrap();
        let point = &graph.points[0];
        assert_eq!(point.event_id, Some(EntityId::new("E1")));
        assert_eq!(point.category.as_deref(), Some("obstacle"));
        assert_eq!(point.created_at.as_deref(), Some("2024-05-01T08:00:00Z"));
        assert_eq!(point.pictures[0].image, "abc");
        assert_eq!(point.pictures[0].point_id, Some(EntityId::new("P1")));
    }

    #[test]
    fn test_action_aliases_and_flag() {
        let graph = normalize_graph(json!({
            "id": "E1",
            "actions": [{"id": "A1", "teamId": "T1", "equipementId": "EQ1",
                         "type": "pose", "scheduledTime": "08:00", "isDone": 1}]
        }))
        .unwrap();
        let action = &graph.actions[0];
        assert_eq!(action.team_id, Some(EntityId::new("T1")));
        assert_eq!(action.equipment_id, Some(EntityId::new("EQ1")));
        assert_eq!(action.kind.as_deref(), Some("pose"));
        assert_eq!(action.scheduled_time.as_deref(), Some("08:00"));
        assert_eq!(action.done, Some(true));
    }

    #[test]
    fn test_coordinate_aliases() {
        let graph = normalize_graph(json!({
            "id": "E1",
            "equipments": [{"id": "EQ1", "coordinates": [
                {"id": "C1", "equipement_id": "EQ1", "x": 1, "y": 2, "orderIndex": 0}
            ]}]
        }))
        .unwrap();
        let coord = &graph.equipment[0].coordinates[0];
        assert_eq!(coord.equipment_id, Some(EntityId::new("EQ1")));
        assert_eq!(coord.order_index, Some(0));
    }

    #[test]
    fn test_null_collections_are_dropped() {
        let graph = normalize_graph(json!({"id": "E1", "points": null, "zones": null})).unwrap();
        assert!(graph.points.is_empty());
        assert!(graph.zones.is_empty());
    }

    #[test]
    fn test_collection_must_be_array() {
        let err = normalize_graph(json!({"id": "E1", "points": {"id": "P1"}})).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Normalize(NormalizeError::ExpectedArray { .. })
        ));
    }

    #[test]
    fn test_nested_envelope_unwrapped() {
        let graphs = normalize_graphs(json!([
            {"type": "event", "data": {"id": "E1"}},
            {"id": "E2"}
        ]))
        .unwrap();
        assert_eq!(graphs.len(), 2);
        assert_eq!(graphs[0].id, EntityId::new("E1"));
    }

    #[test]
    fn test_not_an_object() {
        assert!(matches!(
            normalize_graph(json!("E1")),
            Err(CoreError::NotAnObject(_))
        ));
        assert!(matches!(
            normalize_graphs(json!(42)),
            Err(CoreError::NotAnArray(_))
        ));
    }

    #[test]
    fn test_planning_forms() {
        let group = json!({
            "team": {"id": "T1", "eventId": "E1"},
            "equipements": [{"id": "EQ1", "eventId": "E1"}],
            "coordonees": [{"id": "C1", "equipmentId": "EQ1", "x": 0, "y": 0}],
            "actions": [{"id": "A1", "is_done": true}]
        });
        let bare = normalize_planning(json!([group.clone()])).unwrap();
        let wrapped = normalize_planning(json!({"actions": [group]})).unwrap();
        assert_eq!(bare, wrapped);

        let g = &bare.groups[0];
        assert_eq!(
            g.team.as_ref().unwrap().event_id,
            Some(EntityId::new("E1"))
        );
        assert_eq!(g.equipment[0].event_id, Some(EntityId::new("E1")));
        assert_eq!(g.coordinates[0].equipment_id, Some(EntityId::new("EQ1")));
        assert_eq!(g.actions[0].done, Some(true));
    }

    #[test]
    fn test_planning_rejects_scalars() {
        assert!(normalize_planning(json!("nope")).is_err());
        assert!(normalize_planning(json!({"data": []})).is_err());
    }

    #[test]
    fn test_malformed_children_are_set_aside() {
        let graph = normalize_graph(json!({
            "id": "E1",
            "points": [
                {"id": "P1", "x": 1, "y": 2},
                {"id": "P2", "x": "n/a", "y": 0}
            ],
            "equipements": [
                {"id": "EQ1", "quantity": "2", "coordinates": [
                    {"id": "C1", "x": 0, "y": 0},
                    {"id": "C2", "x": [], "y": 0}
                ]},
                {"id": "EQ2", "quantity": 1.5}
            ],
            "actions": [
                {"id": "A1", "teamId": "T1", "equipementId": "EQ1", "isDone": "yes"},
                {"id": "A2", "teamId": "T1", "equipementId": "EQ1", "isDone": 0}
            ]
        }))
        .unwrap();

        assert_eq!(graph.points.len(), 1);
        assert_eq!(graph.points[0].id, EntityId::new("P1"));
        assert_eq!(graph.equipment.len(), 1);
        assert_eq!(graph.equipment[0].quantity, Some(2));
        assert_eq!(graph.equipment[0].coordinates.len(), 1);
        assert_eq!(graph.actions.len(), 1);
        assert_eq!(graph.actions[0].id, EntityId::new("A2"));

        let rejected: Vec<_> = graph
            .rejected
            .iter()
            .map(|r| (r.collection, r.id.as_deref()))
            .collect();
        assert_eq!(
            rejected,
            vec![
                ("points", Some("P2")),
                ("coordinates", Some("C2")),
                ("equipment", Some("EQ2")),
                ("actions", Some("A1")),
            ]
        );
    }

    #[test]
    fn test_malformed_event_still_fails() {
        let err = normalize_graph(json!({"id": "E1", "name": 42, "points": []})).unwrap_err();
        assert!(matches!(err, CoreError::DecodingError(_)));
    }

    #[test]
    fn test_geometry_name_becomes_description() {
        let graph = normalize_graph(json!({
            "id": "E1",
            "zones": [{"id": "Z1", "name": "Parking", "color": "#ff0000",
                       "geometry": "POLYGON((0 0, 1 0, 1 1, 0 0))"}],
            "routes": [{"id": "R1", "name": "ignored", "description": "Main road"}]
        }))
        .unwrap();
        assert_eq!(graph.zones[0].description.as_deref(), Some("Parking"));
        assert_eq!(graph.routes[0].description.as_deref(), Some("Main road"));
    }

    #[test]
    fn test_planning_sets_aside_bad_entries() {
        let payload = normalize_planning(json!([
            {
                "team": {"id": "T1", "eventId": "E1"},
                "equipements": [{"id": "EQ1", "eventId": "E1", "quantity": "many"}],
                "actions": [{"id": "A1", "isDone": "yes"}, {"id": "A2"}]
            },
            {"team": "T2"}
        ]))
        .unwrap();
        assert_eq!(payload.groups.len(), 1);
        assert!(payload.groups[0].equipment.is_empty());
        assert_eq!(payload.groups[0].actions.len(), 1);
        assert_eq!(payload.rejected.len(), 3);
        assert_eq!(payload.rejected[2].collection, "planning groups");
    }
}
