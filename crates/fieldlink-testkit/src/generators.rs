//! Proptest strategies for generating entity graphs and payloads.
//!
//! Generated graphs are internally consistent: ids are unique per kind and
//! every action names a team of its graph. Some actions deliberately name
//! equipment the graph does not carry, to exercise placeholder creation.

use proptest::prelude::*;
use serde_json::{json, Value};

use fieldlink_core::{
    ActionRecord, CoordinateRecord, EntityId, EquipmentRecord, EventGraph, GeometryRecord,
    PointRecord, TeamRecord,
};

/// Generate an identifier of the form the desktop tends to use.
pub fn entity_id() -> impl Strategy<Value = EntityId> {
    "[A-Za-z][A-Za-z0-9_-]{0,15}".prop_map(EntityId::new)
}

/// Map coordinates within a plausible projected range.
pub fn coordinate() -> impl Strategy<Value = f64> {
    (-1_000_000i64..1_000_000i64).prop_map(|v| v as f64 / 100.0)
}

pub fn short_text() -> impl Strategy<Value = Option<String>> {
    prop_oneof![Just(None), "[a-zA-Z ]{1,20}".prop_map(Some)]
}

/// A `YYYY-MM-DD` date range, or no dates at all.
pub fn date_range() -> impl Strategy<Value = Option<(String, String)>> {
    prop_oneof![
        1 => Just(None),
        3 => (2020u32..2030, 1u32..13, 1u32..29, 0u32..60).prop_map(|(y, m, d, len)| {
            let start = format!("{:04}-{:02}-{:02}", y, m, d);
            let end_day = (d + len).min(28);
            let end = format!("{:04}-{:02}-{:02}", y, m, end_day);
            Some((start, end))
        }),
    ]
}

fn point(index: usize, x: f64, y: f64, name: Option<String>) -> PointRecord {
    PointRecord {
        id: EntityId::new(format!("P{}", index)),
        event_id: None,
        x,
        y,
        name,
        comment: None,
        category: None,
        status: None,
        created_at: None,
        modified_at: None,
        pictures: Vec::new(),
    }
}

fn equipment(index: usize, coords: Vec<(f64, f64)>) -> EquipmentRecord {
    let id = EntityId::new(format!("EQ{}", index));
    EquipmentRecord {
        id: id.clone(),
        event_id: None,
        type_id: None,
        type_name: None,
        type_description: None,
        quantity: Some(1),
        length_per_unit: None,
        installed_at: None,
        removed_at: None,
        coordinates: coords
            .into_iter()
            .enumerate()
            .map(|(i, (x, y))| CoordinateRecord {
                id: Some(EntityId::new(format!("EQ{}-C{}", index, i))),
                equipment_id: Some(id.clone()),
                x,
                y,
                order_index: Some(i as i64),
            })
            .collect(),
    }
}

/// Generate a consistent entity graph for event `E<n>`.
pub fn event_graph() -> impl Strategy<Value = EventGraph> {
    (
        0u32..1000,
        date_range(),
        prop::collection::vec((coordinate(), coordinate(), short_text()), 0..5),
        1usize..4,
        prop::collection::vec(prop::collection::vec((coordinate(), coordinate()), 0..4), 0..3),
        prop::collection::vec((0usize..4, 0usize..5, any::<bool>()), 0..6),
        prop::option::of("LINESTRING\\(0 0, [1-9] [1-9]\\)"),
    )
        .prop_map(|(n, dates, points, teams, equipment_coords, actions, route)| {
            let mut graph = EventGraph::empty(format!("E{}", n));
            graph.name = Some(format!("Event {}", n));
            if let Some((start, end)) = dates {
                graph.start_date = Some(start);
                graph.end_date = Some(end);
            }
            graph.points = points
                .into_iter()
                .enumerate()
                .map(|(i, (x, y, name))| point(i, x, y, name))
                .collect();
            graph.teams = (0..teams)
                .map(|i| TeamRecord {
                    id: EntityId::new(format!("T{}", i)),
                    event_id: Some(graph.id.clone()),
                    name: Some(format!("Team {}", i)),
                })
                .collect();
            graph.equipment = equipment_coords
                .into_iter()
                .enumerate()
                .map(|(i, coords)| equipment(i, coords))
                .collect();
            graph.actions = actions
                .into_iter()
                .enumerate()
                .map(|(i, (team, eq, done))| ActionRecord {
                    id: EntityId::new(format!("A{}", i)),
                    team_id: Some(EntityId::new(format!("T{}", team % teams))),
                    // Indexes past the equipment list name missing equipment
                    equipment_id: Some(EntityId::new(format!("EQ{}", eq))),
                    kind: None,
                    scheduled_time: None,
                    done: Some(done),
                })
                .collect();
            graph.routes = route
                .into_iter()
                .map(|wkt| GeometryRecord {
                    id: EntityId::new("R0"),
                    event_id: None,
                    wkt: Some(wkt),
                    description: None,
                    created_at: None,
                })
                .collect();
            graph
        })
}

/// Generate a graph together with a copy whose team and equipment lists
/// are reordered.
pub fn event_graph_with_reordering() -> impl Strategy<Value = (EventGraph, EventGraph)> {
    (event_graph(), any::<prop::sample::Index>()).prop_map(|(graph, rotate)| {
        let mut shuffled = graph.clone();
        shuffled.teams.reverse();
        shuffled.equipment.reverse();
        if !shuffled.teams.is_empty() {
            let k = rotate.index(shuffled.teams.len());
            shuffled.teams.rotate_left(k);
        }
        (graph, shuffled)
    })
}

/// Generate a graph, its wire JSON with some points and actions made
/// undecodable, and how many were corrupted.
///
/// Only leaves are corrupted: nothing else in the graph depends on a point
/// or an action, so each corruption costs exactly one entity.
pub fn event_graph_with_malformed_children() -> impl Strategy<Value = (EventGraph, Value, usize)> {
    (
        event_graph(),
        prop::collection::vec(any::<bool>(), 5),
        prop::collection::vec(any::<bool>(), 6),
    )
        .prop_map(|(graph, bad_points, bad_actions)| {
            let mut raw = serde_json::to_value(&graph)
                .unwrap_or_else(|e| panic!("graph does not serialize: {}", e));
            let mut corrupted = 0;
            corrupt(&mut raw, "points", &bad_points, "x", json!("n/a"), &mut corrupted);
            corrupt(&mut raw, "actions", &bad_actions, "done", json!("yes"), &mut corrupted);
            (graph, raw, corrupted)
        })
}

fn corrupt(
    raw: &mut Value,
    collection: &str,
    mask: &[bool],
    field: &str,
    bad: Value,
    corrupted: &mut usize,
) {
    let Some(items) = raw.get_mut(collection).and_then(Value::as_array_mut) else {
        return;
    };
    for (item, _) in items.iter_mut().zip(mask).filter(|(_, hit)| **hit) {
        item[field] = bad.clone();
        *corrupted += 1;
    }
}
