//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! (duplicate ids and missing parents are rejected, deletes cascade) but
//! keeps everything in memory with no persistence.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use fieldlink_core::{
    Action, Coordinate, EntityId, EntityKind, Equipment, EquipmentType, Event, Geometry,
    GeometryKind, Picture, Point, Team,
};

use crate::error::{Result, StoreError};
use crate::traits::Store;

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    events: BTreeMap<EntityId, Event>,
    points: BTreeMap<EntityId, Point>,
    pictures: BTreeMap<EntityId, Picture>,
    routes: BTreeMap<EntityId, Geometry>,
    zones: BTreeMap<EntityId, Geometry>,
    teams: BTreeMap<EntityId, Team>,
    equipment_types: BTreeMap<EntityId, EquipmentType>,
    equipment: BTreeMap<EntityId, Equipment>,
    coordinates: BTreeMap<EntityId, Coordinate>,
    actions: BTreeMap<EntityId, Action>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {}", e)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn duplicate(kind: EntityKind, id: &EntityId) -> StoreError {
    StoreError::Constraint(format!("{} {} already exists", kind, id))
}

fn missing_parent(kind: EntityKind, id: &EntityId) -> StoreError {
    StoreError::Constraint(format!("{} {} does not exist", kind, id))
}

fn require<T>(map: &BTreeMap<EntityId, T>, kind: EntityKind, id: &EntityId) -> Result<()> {
    if map.contains_key(id) {
        Ok(())
    } else {
        Err(missing_parent(kind, id))
    }
}

fn insert_new<T>(
    map: &mut BTreeMap<EntityId, T>,
    kind: EntityKind,
    id: &EntityId,
    row: T,
) -> Result<()> {
    if map.contains_key(id) {
        return Err(duplicate(kind, id));
    }
    map.insert(id.clone(), row);
    Ok(())
}

fn replace<T>(
    map: &mut BTreeMap<EntityId, T>,
    kind: EntityKind,
    id: &EntityId,
    row: T,
) -> Result<()> {
    match map.get_mut(id) {
        Some(slot) => {
            *slot = row;
            Ok(())
        }
        None => Err(StoreError::not_found(kind, id)),
    }
}

impl MemoryStoreInner {
    fn geometries(&self, kind: GeometryKind) -> &BTreeMap<EntityId, Geometry> {
        match kind {
            GeometryKind::Route => &self.routes,
            GeometryKind::Zone => &self.zones,
        }
    }

    fn geometries_mut(&mut self, kind: GeometryKind) -> &mut BTreeMap<EntityId, Geometry> {
        match kind {
            GeometryKind::Route => &mut self.routes,
            GeometryKind::Zone => &mut self.zones,
        }
    }

    fn contains(&self, kind: EntityKind, id: &EntityId) -> bool {
        match kind {
            EntityKind::Event => self.events.contains_key(id),
            EntityKind::Point => self.points.contains_key(id),
            EntityKind::Picture => self.pictures.contains_key(id),
            EntityKind::Route => self.routes.contains_key(id),
            EntityKind::Zone => self.zones.contains_key(id),
            EntityKind::Team => self.teams.contains_key(id),
            EntityKind::EquipmentType => self.equipment_types.contains_key(id),
            EntityKind::Equipment => self.equipment.contains_key(id),
            EntityKind::Coordinate => self.coordinates.contains_key(id),
            EntityKind::Action => self.actions.contains_key(id),
        }
    }

    fn len(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Event => self.events.len(),
            EntityKind::Point => self.points.len(),
            EntityKind::Picture => self.pictures.len(),
            EntityKind::Route => self.routes.len(),
            EntityKind::Zone => self.zones.len(),
            EntityKind::Team => self.teams.len(),
            EntityKind::EquipmentType => self.equipment_types.len(),
            EntityKind::Equipment => self.equipment.len(),
            EntityKind::Coordinate => self.coordinates.len(),
            EntityKind::Action => self.actions.len(),
        }
    }

    // Cascades mirror the ON DELETE CASCADE clauses of the SQLite schema.

    fn remove_point(&mut self, id: &EntityId) -> bool {
        self.pictures.retain(|_, p| &p.point_id != id);
        self.points.remove(id).is_some()
    }

    fn remove_team(&mut self, id: &EntityId) -> bool {
        self.actions.retain(|_, a| &a.team_id != id);
        self.teams.remove(id).is_some()
    }

    fn remove_equipment(&mut self, id: &EntityId) -> bool {
        self.coordinates.retain(|_, c| &c.equipment_id != id);
        self.actions.retain(|_, a| &a.equipment_id != id);
        self.equipment.remove(id).is_some()
    }

    fn remove_event(&mut self, id: &EntityId) -> bool {
        let owned = |event_id: &EntityId| event_id == id;
        let points: Vec<_> = self
            .points
            .values()
            .filter(|p| owned(&p.event_id))
            .map(|p| p.id.clone())
            .collect();
        let teams: Vec<_> = self
            .teams
            .values()
            .filter(|t| owned(&t.event_id))
            .map(|t| t.id.clone())
            .collect();
        let equipment: Vec<_> = self
            .equipment
            .values()
            .filter(|e| owned(&e.event_id))
            .map(|e| e.id.clone())
            .collect();
        for p in &points {
            self.remove_point(p);
        }
        for t in &teams {
            self.remove_team(t);
        }
        for e in &equipment {
            self.remove_equipment(e);
        }
        self.routes.retain(|_, g| !owned(&g.event_id));
        self.zones.retain(|_, g| !owned(&g.event_id));
        self.events.remove(id).is_some()
    }

    fn check_action_parents(&self, action: &Action) -> Result<()> {
        require(&self.teams, EntityKind::Team, &action.team_id)?;
        require(&self.equipment, EntityKind::Equipment, &action.equipment_id)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn exists(&self, kind: EntityKind, id: &EntityId) -> Result<bool> {
        Ok(self.read()?.contains(kind, id))
    }

    async fn delete(&self, kind: EntityKind, id: &EntityId) -> Result<bool> {
        let mut inner = self.write()?;
        let removed = match kind {
            EntityKind::Event => inner.remove_event(id),
            EntityKind::Point => inner.remove_point(id),
            EntityKind::Team => inner.remove_team(id),
            EntityKind::Equipment => inner.remove_equipment(id),
            EntityKind::Picture => inner.pictures.remove(id).is_some(),
            EntityKind::Route => inner.routes.remove(id).is_some(),
            EntityKind::Zone => inner.zones.remove(id).is_some(),
            EntityKind::EquipmentType => inner.equipment_types.remove(id).is_some(),
            EntityKind::Coordinate => inner.coordinates.remove(id).is_some(),
            EntityKind::Action => inner.actions.remove(id).is_some(),
        };
        Ok(removed)
    }

    async fn count(&self, kind: EntityKind) -> Result<usize> {
        Ok(self.read()?.len(kind))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_event(&self, id: &EntityId) -> Result<Option<Event>> {
        Ok(self.read()?.events.get(id).cloned())
    }

    async fn insert_event(&self, event: &Event) -> Result<()> {
        let mut inner = self.write()?;
        insert_new(&mut inner.events, EntityKind::Event, &event.id, event.clone())
    }

    async fn update_event(&self, event: &Event) -> Result<()> {
        let mut inner = self.write()?;
        replace(&mut inner.events, EntityKind::Event, &event.id, event.clone())
    }

    async fn list_events(&self) -> Result<Vec<Event>> {
        Ok(self.read()?.events.values().cloned().collect())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Points and Pictures
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_point(&self, id: &EntityId) -> Result<Option<Point>> {
        Ok(self.read()?.points.get(id).cloned())
    }

    async fn insert_point(&self, point: &Point) -> Result<()> {
        let mut inner = self.write()?;
        require(&inner.events, EntityKind::Event, &point.event_id)?;
        insert_new(&mut inner.points, EntityKind::Point, &point.id, point.clone())
    }

    async fn update_point(&self, point: &Point) -> Result<()> {
        let mut inner = self.write()?;
        require(&inner.events, EntityKind::Event, &point.event_id)?;
        let created_at = match inner.points.get(&point.id) {
            Some(existing) => existing.created_at.clone(),
            None => return Err(StoreError::not_found(EntityKind::Point, &point.id)),
        };
        let mut row = point.clone();
        row.created_at = created_at;
        replace(&mut inner.points, EntityKind::Point, &point.id, row)
    }

    async fn list_points(&self, event_id: &EntityId) -> Result<Vec<Point>> {
        Ok(self
            .read()?
            .points
            .values()
            .filter(|p| &p.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn insert_picture(&self, picture: &Picture) -> Result<()> {
        let mut inner = self.write()?;
        require(&inner.points, EntityKind::Point, &picture.point_id)?;
        insert_new(
            &mut inner.pictures,
            EntityKind::Picture,
            &picture.id,
            picture.clone(),
        )
    }

    async fn update_picture(&self, picture: &Picture) -> Result<()> {
        let mut inner = self.write()?;
        require(&inner.points, EntityKind::Point, &picture.point_id)?;
        replace(
            &mut inner.pictures,
            EntityKind::Picture,
            &picture.id,
            picture.clone(),
        )
    }

    async fn list_pictures(&self, point_id: &EntityId) -> Result<Vec<Picture>> {
        Ok(self
            .read()?
            .pictures
            .values()
            .filter(|p| &p.point_id == point_id)
            .cloned()
            .collect())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Routes and Zones
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_geometry(&self, kind: GeometryKind, id: &EntityId) -> Result<Option<Geometry>> {
        Ok(self.read()?.geometries(kind).get(id).cloned())
    }

    async fn insert_geometry(&self, geometry: &Geometry) -> Result<()> {
        let mut inner = self.write()?;
        require(&inner.events, EntityKind::Event, &geometry.event_id)?;
        insert_new(
            inner.geometries_mut(geometry.kind),
            geometry.kind.into(),
            &geometry.id,
            geometry.clone(),
        )
    }

    async fn update_geometry(&self, geometry: &Geometry) -> Result<()> {
        let mut inner = self.write()?;
        require(&inner.events, EntityKind::Event, &geometry.event_id)?;
        let created_at = match inner.geometries(geometry.kind).get(&geometry.id) {
            Some(existing) => existing.created_at.clone(),
            None => return Err(StoreError::not_found(geometry.kind.into(), &geometry.id)),
        };
        let mut row = geometry.clone();
        row.created_at = created_at;
        replace(
            inner.geometries_mut(geometry.kind),
            geometry.kind.into(),
            &geometry.id,
            row,
        )
    }

    async fn list_geometries(
        &self,
        kind: GeometryKind,
        event_id: &EntityId,
    ) -> Result<Vec<Geometry>> {
        Ok(self
            .read()?
            .geometries(kind)
            .values()
            .filter(|g| &g.event_id == event_id)
            .cloned()
            .collect())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Teams
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_team(&self, id: &EntityId) -> Result<Option<Team>> {
        Ok(self.read()?.teams.get(id).cloned())
    }

    async fn insert_team(&self, team: &Team) -> Result<()> {
        let mut inner = self.write()?;
        require(&inner.events, EntityKind::Event, &team.event_id)?;
        insert_new(&mut inner.teams, EntityKind::Team, &team.id, team.clone())
    }

    async fn update_team(&self, team: &Team) -> Result<()> {
        let mut inner = self.write()?;
        require(&inner.events, EntityKind::Event, &team.event_id)?;
        replace(&mut inner.teams, EntityKind::Team, &team.id, team.clone())
    }

    async fn list_teams(&self, event_id: &EntityId) -> Result<Vec<Team>> {
        Ok(self
            .read()?
            .teams
            .values()
            .filter(|t| &t.event_id == event_id)
            .cloned()
            .collect())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Equipment, Types and Coordinates
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_equipment_type(&self, id: &EntityId) -> Result<Option<EquipmentType>> {
        Ok(self.read()?.equipment_types.get(id).cloned())
    }

    async fn insert_equipment_type(&self, ty: &EquipmentType) -> Result<()> {
        let mut inner = self.write()?;
        insert_new(
            &mut inner.equipment_types,
            EntityKind::EquipmentType,
            &ty.id,
            ty.clone(),
        )
    }

    async fn update_equipment_type(&self, ty: &EquipmentType) -> Result<()> {
        let mut inner = self.write()?;
        replace(
            &mut inner.equipment_types,
            EntityKind::EquipmentType,
            &ty.id,
            ty.clone(),
        )
    }

    async fn get_equipment(&self, id: &EntityId) -> Result<Option<Equipment>> {
        Ok(self.read()?.equipment.get(id).cloned())
    }

    async fn insert_equipment(&self, equipment: &Equipment) -> Result<()> {
        let mut inner = self.write()?;
        require(&inner.events, EntityKind::Event, &equipment.event_id)?;
        insert_new(
            &mut inner.equipment,
            EntityKind::Equipment,
            &equipment.id,
            equipment.clone(),
        )
    }

    async fn update_equipment(&self, equipment: &Equipment) -> Result<()> {
        let mut inner = self.write()?;
        require(&inner.events, EntityKind::Event, &equipment.event_id)?;
        replace(
            &mut inner.equipment,
            EntityKind::Equipment,
            &equipment.id,
            equipment.clone(),
        )
    }

    async fn list_equipment(&self, event_id: &EntityId) -> Result<Vec<Equipment>> {
        Ok(self
            .read()?
            .equipment
            .values()
            .filter(|e| &e.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn insert_coordinate(&self, coordinate: &Coordinate) -> Result<()> {
        let mut inner = self.write()?;
        require(&inner.equipment, EntityKind::Equipment, &coordinate.equipment_id)?;
        insert_new(
            &mut inner.coordinates,
            EntityKind::Coordinate,
            &coordinate.id,
            coordinate.clone(),
        )
    }

    async fn delete_coordinates(&self, equipment_id: &EntityId) -> Result<usize> {
        let mut inner = self.write()?;
        let before = inner.coordinates.len();
        inner
            .coordinates
            .retain(|_, c| &c.equipment_id != equipment_id);
        Ok(before - inner.coordinates.len())
    }

    async fn list_coordinates(&self, equipment_id: &EntityId) -> Result<Vec<Coordinate>> {
        let mut coords: Vec<Coordinate> = self
            .read()?
            .coordinates
            .values()
            .filter(|c| &c.equipment_id == equipment_id)
            .cloned()
            .collect();
        coords.sort_by(|a, b| a.order_index.cmp(&b.order_index).then_with(|| a.id.cmp(&b.id)));
        Ok(coords)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Actions
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_action(&self, id: &EntityId) -> Result<Option<Action>> {
        Ok(self.read()?.actions.get(id).cloned())
    }

    async fn insert_action(&self, action: &Action) -> Result<()> {
        let mut inner = self.write()?;
        inner.check_action_parents(action)?;
        insert_new(&mut inner.actions, EntityKind::Action, &action.id, action.clone())
    }

    async fn update_action(&self, action: &Action) -> Result<()> {
        let mut inner = self.write()?;
        inner.check_action_parents(action)?;
        replace(&mut inner.actions, EntityKind::Action, &action.id, action.clone())
    }

    async fn list_actions(&self, team_id: &EntityId) -> Result<Vec<Action>> {
        Ok(self
            .read()?
            .actions
            .values()
            .filter(|a| &a.team_id == team_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{StoreExt, UpsertResult};

    fn event(id: &str) -> Event {
        Event {
            id: id.into(),
            name: id.to_string(),
            description: String::new(),
            start_date: None,
            end_date: None,
        }
    }

    fn team(id: &str, event_id: &str) -> Team {
        Team {
            id: id.into(),
            event_id: event_id.into(),
            name: "Alpha".into(),
        }
    }

    fn action(id: &str, team_id: &str, equipment_id: &str) -> Action {
        Action {
            id: id.into(),
            team_id: team_id.into(),
            equipment_id: equipment_id.into(),
            kind: None,
            scheduled_time: None,
            done: false,
        }
    }

    #[tokio::test]
    async fn test_upsert_twice_keeps_one_row() {
        let store = MemoryStore::new();
        assert_eq!(store.upsert_event(&event("E1")).await.unwrap(), UpsertResult::Inserted);
        assert_eq!(store.upsert_event(&event("E1")).await.unwrap(), UpsertResult::Updated);
        assert_eq!(store.count(EntityKind::Event).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_action_requires_parents() {
        let store = MemoryStore::new();
        store.insert_event(&event("E1")).await.unwrap();
        store.insert_team(&team("T1", "E1")).await.unwrap();

        let err = store.insert_action(&action("A1", "T1", "EQ1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
        assert!(!err.is_fatal());

        store
            .insert_equipment(&Equipment::placeholder("EQ1".into(), "E1".into()))
            .await
            .unwrap();
        store.insert_action(&action("A1", "T1", "EQ1")).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_event_cascades() {
        let store = MemoryStore::new();
        store.insert_event(&event("E1")).await.unwrap();
        store.insert_event(&event("E2")).await.unwrap();
        store.insert_team(&team("T1", "E1")).await.unwrap();
        store.insert_team(&team("T2", "E2")).await.unwrap();
        store
            .insert_equipment(&Equipment::placeholder("EQ1".into(), "E1".into()))
            .await
            .unwrap();
        store
            .insert_coordinate(&Coordinate {
                id: "C1".into(),
                equipment_id: "EQ1".into(),
                x: 0.0,
                y: 0.0,
                order_index: 0,
            })
            .await
            .unwrap();
        store.insert_action(&action("A1", "T1", "EQ1")).await.unwrap();

        assert!(store.delete(EntityKind::Event, &"E1".into()).await.unwrap());

        assert_eq!(store.count(EntityKind::Event).await.unwrap(), 1);
        assert_eq!(store.count(EntityKind::Team).await.unwrap(), 1);
        assert_eq!(store.count(EntityKind::Equipment).await.unwrap(), 0);
        assert_eq!(store.count(EntityKind::Coordinate).await.unwrap(), 0);
        assert_eq!(store.count(EntityKind::Action).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_unknown_is_not_found() {
        let store = MemoryStore::new();
        let err = store.update_event(&event("E1")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }
}
