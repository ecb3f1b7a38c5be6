//! Test fixtures: graph builders, record shorthands and a fault-injecting
//! store wrapper.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use fieldlink_core::{
    Action, ActionGroup, ActionRecord, Coordinate, CoordinateRecord, EntityId, EntityKind,
    Equipment, EquipmentRecord, EquipmentType, Event, EventGraph, Geometry, GeometryKind,
    GeometryRecord, Picture, PictureRecord, Point, PointRecord, Team, TeamRecord,
};
use fieldlink_store::{Store, StoreError};
use fieldlink_sync::Message;

type StoreResult<T> = fieldlink_store::Result<T>;

// ─────────────────────────────────────────────────────────────────────────────
// Graph Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Start building an entity graph for event `id`.
///
/// ```
/// use fieldlink_testkit::fixtures::event_graph;
///
/// let graph = event_graph("E1")
///     .point("P1", 1.0, 2.0)
///     .team("T1")
///     .equipment("EQ1", &[("C1", 1.0, 1.0)])
///     .action("A1", "T1", "EQ1")
///     .build();
/// assert_eq!(graph.entity_count(), 6);
/// ```
pub fn event_graph(id: &str) -> GraphBuilder {
    let mut graph = EventGraph::empty(id);
    graph.name = Some(format!("Event {}", id));
    GraphBuilder { graph }
}

/// Fluent builder over [`EventGraph`]. Children are appended in call order.
pub struct GraphBuilder {
    graph: EventGraph,
}

impl GraphBuilder {
    pub fn named(mut self, name: &str) -> Self {
        self.graph.name = Some(name.to_string());
        self
    }

    /// Set start and end dates (`YYYY-MM-DD`).
    pub fn dates(mut self, start: &str, end: &str) -> Self {
        self.graph.start_date = Some(start.to_string());
        self.graph.end_date = Some(end.to_string());
        self
    }

    pub fn point(mut self, id: &str, x: f64, y: f64) -> Self {
        self.graph.points.push(PointRecord {
            id: EntityId::new(id),
            event_id: None,
            x,
            y,
            name: Some(format!("Point {}", id)),
            comment: None,
            category: None,
            status: None,
            created_at: None,
            modified_at: None,
            pictures: Vec::new(),
        });
        self
    }

    /// Attach a picture to a point added earlier. Unknown points are ignored.
    pub fn picture(mut self, point_id: &str, image: &str) -> Self {
        if let Some(point) = self
            .graph
            .points
            .iter_mut()
            .find(|p| p.id.as_str() == point_id)
        {
            point.pictures.push(PictureRecord {
                id: None,
                point_id: None,
                image: image.to_string(),
            });
        }
        self
    }

    pub fn route(mut self, id: &str, wkt: &str) -> Self {
        self.graph.routes.push(geometry_record(id, wkt));
        self
    }

    pub fn zone(mut self, id: &str, wkt: &str) -> Self {
        self.graph.zones.push(geometry_record(id, wkt));
        self
    }

    /// Add to the untyped geometry list, classified by WKT on import.
    pub fn legacy_geometry(mut self, id: &str, wkt: &str) -> Self {
        self.graph.geometries.push(geometry_record(id, wkt));
        self
    }

    pub fn team(mut self, id: &str) -> Self {
        let event_id = self.graph.id.clone();
        self.graph
            .teams
            .push(team_record(id, Some(event_id.as_str())));
        self
    }

    /// Untyped equipment with coordinates in the given order.
    pub fn equipment(mut self, id: &str, coords: &[(&str, f64, f64)]) -> Self {
        self.graph.equipment.push(equipment_record(id, None, coords));
        self
    }

    /// Equipment with an embedded type and no coordinates.
    pub fn typed_equipment(mut self, id: &str, type_id: &str, type_name: &str) -> Self {
        let mut record = equipment_record(id, None, &[]);
        record.type_id = Some(EntityId::new(type_id));
        record.type_name = Some(type_name.to_string());
        self.graph.equipment.push(record);
        self
    }

    pub fn action(mut self, id: &str, team_id: &str, equipment_id: &str) -> Self {
        self.graph
            .actions
            .push(action_record(id, team_id, equipment_id));
        self
    }

    pub fn build(self) -> EventGraph {
        self.graph
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Record Shorthands
// ─────────────────────────────────────────────────────────────────────────────

fn geometry_record(id: &str, wkt: &str) -> GeometryRecord {
    GeometryRecord {
        id: EntityId::new(id),
        event_id: None,
        wkt: Some(wkt.to_string()),
        description: None,
        created_at: None,
    }
}

pub fn team_record(id: &str, event_id: Option<&str>) -> TeamRecord {
    TeamRecord {
        id: EntityId::new(id),
        event_id: event_id.map(EntityId::new),
        name: Some(format!("Team {}", id)),
    }
}

/// Equipment with `order_index` following the coordinate positions.
pub fn equipment_record(
    id: &str,
    event_id: Option<&str>,
    coords: &[(&str, f64, f64)],
) -> EquipmentRecord {
    let equipment_id = EntityId::new(id);
    EquipmentRecord {
        id: equipment_id.clone(),
        event_id: event_id.map(EntityId::new),
        type_id: None,
        type_name: None,
        type_description: None,
        quantity: Some(1),
        length_per_unit: None,
        installed_at: None,
        removed_at: None,
        coordinates: coords
            .iter()
            .enumerate()
            .map(|(i, (cid, x, y))| CoordinateRecord {
                id: Some(EntityId::new(*cid)),
                equipment_id: Some(equipment_id.clone()),
                x: *x,
                y: *y,
                order_index: Some(i as i64),
            })
            .collect(),
    }
}

pub fn action_record(id: &str, team_id: &str, equipment_id: &str) -> ActionRecord {
    ActionRecord {
        id: EntityId::new(id),
        team_id: Some(EntityId::new(team_id)),
        equipment_id: Some(EntityId::new(equipment_id)),
        kind: None,
        scheduled_time: None,
        done: Some(false),
    }
}

/// A planning group for one team, with nothing planned yet.
pub fn planning_group(team_id: &str, team_event_id: &str) -> ActionGroup {
    ActionGroup::for_team(team_record(team_id, Some(team_event_id)))
}

/// The text of an `event` message carrying `graph`.
pub fn event_frame(graph: &EventGraph) -> String {
    Message::event(graph)
        .and_then(|m| m.to_text())
        .unwrap_or_else(|e| panic!("graph does not serialize: {}", e))
}

/// Drop every store-assigned timestamp, so graphs imported at different
/// moments compare equal.
pub fn without_timestamps(mut graph: EventGraph) -> EventGraph {
    for point in &mut graph.points {
        point.created_at = None;
        point.modified_at = None;
    }
    for geometry in graph.routes.iter_mut().chain(graph.zones.iter_mut()) {
        geometry.created_at = None;
    }
    graph
}

// ─────────────────────────────────────────────────────────────────────────────
// Fault Injection
// ─────────────────────────────────────────────────────────────────────────────

/// A store wrapper that can be made unreachable, or made to reject every
/// write of selected kinds.
pub struct FlakyStore<S> {
    inner: S,
    unavailable: AtomicBool,
    rejected: Mutex<HashSet<EntityKind>>,
}

impl<S: Store> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            unavailable: AtomicBool::new(false),
            rejected: Mutex::new(HashSet::new()),
        }
    }

    /// While set, every call fails with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Reject every insert and update of `kind` with a constraint error.
    pub fn reject_writes(&self, kind: EntityKind) {
        self.rejected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(kind);
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn check(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected outage".into()));
        }
        Ok(())
    }

    fn check_write(&self, kind: EntityKind) -> StoreResult<()> {
        self.check()?;
        let rejected = self.rejected.lock().unwrap_or_else(|e| e.into_inner());
        if rejected.contains(&kind) {
            return Err(StoreError::Constraint(format!("{} writes rejected", kind)));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: Store> Store for FlakyStore<S> {
    async fn exists(&self, kind: EntityKind, id: &EntityId) -> StoreResult<bool> {
        self.check()?;
        self.inner.exists(kind, id).await
    }

    async fn delete(&self, kind: EntityKind, id: &EntityId) -> StoreResult<bool> {
        self.check_write(kind)?;
        self.inner.delete(kind, id).await
    }

    async fn count(&self, kind: EntityKind) -> StoreResult<usize> {
        self.check()?;
        self.inner.count(kind).await
    }

    async fn get_event(&self, id: &EntityId) -> StoreResult<Option<Event>> {
        self.check()?;
        self.inner.get_event(id).await
    }

    async fn insert_event(&self, event: &Event) -> StoreResult<()> {
        self.check_write(EntityKind::Event)?;
        self.inner.insert_event(event).await
    }

    async fn update_event(&self, event: &Event) -> StoreResult<()> {
        self.check_write(EntityKind::Event)?;
        self.inner.update_event(event).await
    }

    async fn list_events(&self) -> StoreResult<Vec<Event>> {
        self.check()?;
        self.inner.list_events().await
    }

    async fn get_point(&self, id: &EntityId) -> StoreResult<Option<Point>> {
        self.check()?;
        self.inner.get_point(id).await
    }

    async fn insert_point(&self, point: &Point) -> StoreResult<()> {
        self.check_write(EntityKind::Point)?;
        self.inner.insert_point(point).await
    }

    async fn update_point(&self, point: &Point) -> StoreResult<()> {
        self.check_write(EntityKind::Point)?;
        self.inner.update_point(point).await
    }

    async fn list_points(&self, event_id: &EntityId) -> StoreResult<Vec<Point>> {
        self.check()?;
        self.inner.list_points(event_id).await
    }

    async fn insert_picture(&self, picture: &Picture) -> StoreResult<()> {
        self.check_write(EntityKind::Picture)?;
        self.inner.insert_picture(picture).await
    }

    async fn update_picture(&self, picture: &Picture) -> StoreResult<()> {
        self.check_write(EntityKind::Picture)?;
        self.inner.update_picture(picture).await
    }

    async fn list_pictures(&self, point_id: &EntityId) -> StoreResult<Vec<Picture>> {
        self.check()?;
        self.inner.list_pictures(point_id).await
    }

    async fn get_geometry(
        &self,
        kind: GeometryKind,
        id: &EntityId,
    ) -> StoreResult<Option<Geometry>> {
        self.check()?;
        self.inner.get_geometry(kind, id).await
    }

    async fn insert_geometry(&self, geometry: &Geometry) -> StoreResult<()> {
        self.check_write(geometry.kind.into())?;
        self.inner.insert_geometry(geometry).await
    }

    async fn update_geometry(&self, geometry: &Geometry) -> StoreResult<()> {
        self.check_write(geometry.kind.into())?;
        self.inner.update_geometry(geometry).await
    }

    async fn list_geometries(
        &self,
        kind: GeometryKind,
        event_id: &EntityId,
    ) -> StoreResult<Vec<Geometry>> {
        self.check()?;
        self.inner.list_geometries(kind, event_id).await
    }

    async fn get_team(&self, id: &EntityId) -> StoreResult<Option<Team>> {
        self.check()?;
        self.inner.get_team(id).await
    }

    async fn insert_team(&self, team: &Team) -> StoreResult<()> {
        self.check_write(EntityKind::Team)?;
        self.inner.insert_team(team).await
    }

    async fn update_team(&self, team: &Team) -> StoreResult<()> {
        self.check_write(EntityKind::Team)?;
        self.inner.update_team(team).await
    }

    async fn list_teams(&self, event_id: &EntityId) -> StoreResult<Vec<Team>> {
        self.check()?;
        self.inner.list_teams(event_id).await
    }

    async fn get_equipment_type(&self, id: &EntityId) -> StoreResult<Option<EquipmentType>> {
        self.check()?;
        self.inner.get_equipment_type(id).await
    }

    async fn insert_equipment_type(&self, ty: &EquipmentType) -> StoreResult<()> {
        self.check_write(EntityKind::EquipmentType)?;
        self.inner.insert_equipment_type(ty).await
    }

    async fn update_equipment_type(&self, ty: &EquipmentType) -> StoreResult<()> {
        self.check_write(EntityKind::EquipmentType)?;
        self.inner.update_equipment_type(ty).await
    }

    async fn get_equipment(&self, id: &EntityId) -> StoreResult<Option<Equipment>> {
        self.check()?;
        self.inner.get_equipment(id).await
    }

    async fn insert_equipment(&self, equipment: &Equipment) -> StoreResult<()> {
        self.check_write(EntityKind::Equipment)?;
        self.inner.insert_equipment(equipment).await
    }

    async fn update_equipment(&self, equipment: &Equipment) -> StoreResult<()> {
        self.check_write(EntityKind::Equipment)?;
        self.inner.update_equipment(equipment).await
    }

    async fn list_equipment(&self, event_id: &EntityId) -> StoreResult<Vec<Equipment>> {
        self.check()?;
        self.inner.list_equipment(event_id).await
    }

    async fn insert_coordinate(&self, coordinate: &Coordinate) -> StoreResult<()> {
        self.check_write(EntityKind::Coordinate)?;
        self.inner.insert_coordinate(coordinate).await
    }

    async fn delete_coordinates(&self, equipment_id: &EntityId) -> StoreResult<usize> {
        self.check_write(EntityKind::Coordinate)?;
        self.inner.delete_coordinates(equipment_id).await
    }

    async fn list_coordinates(&self, equipment_id: &EntityId) -> StoreResult<Vec<Coordinate>> {
        self.check()?;
        self.inner.list_coordinates(equipment_id).await
    }

    async fn get_action(&self, id: &EntityId) -> StoreResult<Option<Action>> {
        self.check()?;
        self.inner.get_action(id).await
    }

    async fn insert_action(&self, action: &Action) -> StoreResult<()> {
        self.check_write(EntityKind::Action)?;
        self.inner.insert_action(action).await
    }

    async fn update_action(&self, action: &Action) -> StoreResult<()> {
        self.check_write(EntityKind::Action)?;
        self.inner.update_action(action).await
    }

    async fn list_actions(&self, team_id: &EntityId) -> StoreResult<Vec<Action>> {
        self.check()?;
        self.inner.list_actions(team_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldlink_store::MemoryStore;

    #[test]
    fn test_builder_orders_coordinates() {
        let graph = event_graph("E1")
            .equipment("EQ1", &[("C2", 0.0, 0.0), ("C1", 1.0, 1.0)])
            .build();
        let order: Vec<_> = graph.equipment[0]
            .coordinates
            .iter()
            .map(|c| (c.id.clone().unwrap().into_inner(), c.order_index))
            .collect();
        assert_eq!(
            order,
            vec![("C2".to_string(), Some(0)), ("C1".to_string(), Some(1))]
        );
    }

    #[test]
    fn test_picture_for_unknown_point_is_ignored() {
        let graph = event_graph("E1").picture("P9", "aW1n").build();
        assert!(graph.points.is_empty());
    }

    #[tokio::test]
    async fn test_flaky_store_outage_and_rejection() {
        let store = FlakyStore::new(MemoryStore::new());
        let event = event_graph("E1").build().event_row();
        store.insert_event(&event).await.unwrap();

        store.reject_writes(EntityKind::Event);
        assert!(matches!(
            store.update_event(&event).await,
            Err(StoreError::Constraint(_))
        ));
        assert!(store.exists(EntityKind::Event, &event.id).await.unwrap());

        store.set_unavailable(true);
        let err = store.count(EntityKind::Event).await.unwrap_err();
        assert!(err.is_fatal());
        store.set_unavailable(false);
        assert_eq!(store.count(EntityKind::Event).await.unwrap(), 1);
    }
}
