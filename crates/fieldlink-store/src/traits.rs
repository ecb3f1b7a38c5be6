//! Store trait: the abstract interface for entity persistence.
//!
//! The reconciler and the exporter are storage-agnostic. Implementations
//! include SQLite (primary) and in-memory (for tests).

use std::future::Future;

use async_trait::async_trait;
use fieldlink_core::{
    Action, Coordinate, EntityId, EntityKind, Equipment, EquipmentType, Event, Geometry,
    GeometryKind, Picture, Point, Team,
};

use crate::error::Result;

/// Result of writing a row keyed by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertResult {
    /// No row had this id; one was created.
    Inserted,
    /// A row with this id existed and was updated in place.
    Updated,
}

/// The Store trait: async interface for entity persistence.
///
/// All methods are async to support both sync (SQLite) and async backends.
/// For SQLite, blocking work runs on `spawn_blocking`.
///
/// # Contract
///
/// - `insert_*` fails if the id already exists or a parent row is missing.
/// - `update_*` replaces every column except `created_at`, and fails with
///   `NotFound` if the id is unknown.
/// - `delete` cascades: an event takes its points (and their pictures),
///   routes, zones, teams, equipment, coordinates and actions with it.
/// - List operations return rows ordered by id, except coordinates which
///   come back in order-index order.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Any Kind
    // ─────────────────────────────────────────────────────────────────────────

    /// Check if a row of this kind exists.
    async fn exists(&self, kind: EntityKind, id: &EntityId) -> Result<bool>;

    /// Delete a row by id, cascading to everything it owns.
    ///
    /// Returns `false` if there was nothing to delete.
    async fn delete(&self, kind: EntityKind, id: &EntityId) -> Result<bool>;

    /// Number of stored rows of this kind.
    async fn count(&self, kind: EntityKind) -> Result<usize>;

    // ─────────────────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_event(&self, id: &EntityId) -> Result<Option<Event>>;

    async fn insert_event(&self, event: &Event) -> Result<()>;

    async fn update_event(&self, event: &Event) -> Result<()>;

    async fn list_events(&self) -> Result<Vec<Event>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Points and Pictures
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_point(&self, id: &EntityId) -> Result<Option<Point>>;

    async fn insert_point(&self, point: &Point) -> Result<()>;

    async fn update_point(&self, point: &Point) -> Result<()>;

    async fn list_points(&self, event_id: &EntityId) -> Result<Vec<Point>>;

    async fn insert_picture(&self, picture: &Picture) -> Result<()>;

    async fn update_picture(&self, picture: &Picture) -> Result<()>;

    async fn list_pictures(&self, point_id: &EntityId) -> Result<Vec<Picture>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Routes and Zones
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_geometry(&self, kind: GeometryKind, id: &EntityId) -> Result<Option<Geometry>>;

    /// Insert into the table selected by `geometry.kind`.
    async fn insert_geometry(&self, geometry: &Geometry) -> Result<()>;

    async fn update_geometry(&self, geometry: &Geometry) -> Result<()>;

    async fn list_geometries(
        &self,
        kind: GeometryKind,
        event_id: &EntityId,
    ) -> Result<Vec<Geometry>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Teams
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_team(&self, id: &EntityId) -> Result<Option<Team>>;

    async fn insert_team(&self, team: &Team) -> Result<()>;

    async fn update_team(&self, team: &Team) -> Result<()>;

    async fn list_teams(&self, event_id: &EntityId) -> Result<Vec<Team>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Equipment, Types and Coordinates
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_equipment_type(&self, id: &EntityId) -> Result<Option<EquipmentType>>;

    async fn insert_equipment_type(&self, ty: &EquipmentType) -> Result<()>;

    async fn update_equipment_type(&self, ty: &EquipmentType) -> Result<()>;

    async fn get_equipment(&self, id: &EntityId) -> Result<Option<Equipment>>;

    async fn insert_equipment(&self, equipment: &Equipment) -> Result<()>;

    async fn update_equipment(&self, equipment: &Equipment) -> Result<()>;

    async fn list_equipment(&self, event_id: &EntityId) -> Result<Vec<Equipment>>;

    async fn insert_coordinate(&self, coordinate: &Coordinate) -> Result<()>;

    /// Delete every coordinate of an equipment. Returns how many went.
    async fn delete_coordinates(&self, equipment_id: &EntityId) -> Result<usize>;

    async fn list_coordinates(&self, equipment_id: &EntityId) -> Result<Vec<Coordinate>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Actions
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_action(&self, id: &EntityId) -> Result<Option<Action>>;

    async fn insert_action(&self, action: &Action) -> Result<()>;

    async fn update_action(&self, action: &Action) -> Result<()>;

    async fn list_actions(&self, team_id: &EntityId) -> Result<Vec<Action>>;
}

/// Extension trait for the existence-check-then-write pattern.
pub trait StoreExt: Store {
    fn upsert_event(&self, event: &Event) -> impl Future<Output = Result<UpsertResult>> + Send;

    fn upsert_picture(
        &self,
        picture: &Picture,
    ) -> impl Future<Output = Result<UpsertResult>> + Send;

    fn upsert_geometry(
        &self,
        geometry: &Geometry,
    ) -> impl Future<Output = Result<UpsertResult>> + Send;

    fn upsert_team(&self, team: &Team) -> impl Future<Output = Result<UpsertResult>> + Send;

    fn upsert_equipment_type(
        &self,
        ty: &EquipmentType,
    ) -> impl Future<Output = Result<UpsertResult>> + Send;

    fn upsert_equipment(
        &self,
        equipment: &Equipment,
    ) -> impl Future<Output = Result<UpsertResult>> + Send;

    fn upsert_action(&self, action: &Action)
        -> impl Future<Output = Result<UpsertResult>> + Send;

    /// Insert the point unless a row with its id already exists.
    ///
    /// Returns `true` when a row was written.
    fn insert_point_if_absent(&self, point: &Point) -> impl Future<Output = Result<bool>> + Send;

    /// Insert the coordinate unless a row with its id already exists.
    fn insert_coordinate_if_absent(
        &self,
        coordinate: &Coordinate,
    ) -> impl Future<Output = Result<bool>> + Send;
}

impl<S: Store + ?Sized> StoreExt for S {
    async fn upsert_event(&self, event: &Event) -> Result<UpsertResult> {
        if self.exists(EntityKind::Event, &event.id).await? {
            self.update_event(event).await?;
            Ok(UpsertResult::Updated)
        } else {
            self.insert_event(event).await?;
            Ok(UpsertResult::Inserted)
        }
    }

    async fn upsert_picture(&self, picture: &Picture) -> Result<UpsertResult> {
        if self.exists(EntityKind::Picture, &picture.id).await? {
            self.update_picture(picture).await?;
            Ok(UpsertResult::Updated)
        } else {
            self.insert_picture(picture).await?;
            Ok(UpsertResult::Inserted)
        }
    }

    async fn upsert_geometry(&self, geometry: &Geometry) -> Result<UpsertResult> {
        if self.exists(geometry.kind.into(), &geometry.id).await? {
            self.update_geometry(geometry).await?;
            Ok(UpsertResult::Updated)
        } else {
            self.insert_geometry(geometry).await?;
            Ok(UpsertResult::Inserted)
        }
    }

    async fn upsert_team(&self, team: &Team) -> Result<UpsertResult> {
        if self.exists(EntityKind::Team, &team.id).await? {
            self.update_team(team).await?;
            Ok(UpsertResult::Updated)
        } else {
            self.insert_team(team).await?;
            Ok(UpsertResult::Inserted)
        }
    }

    async fn upsert_equipment_type(&self, ty: &EquipmentType) -> Result<UpsertResult> {
        if self.exists(EntityKind::EquipmentType, &ty.id).await? {
            self.update_equipment_type(ty).await?;
            Ok(UpsertResult::Updated)
        } else {
            self.insert_equipment_type(ty).await?;
            Ok(UpsertResult::Inserted)
        }
    }

    async fn upsert_equipment(&self, equipment: &Equipment) -> Result<UpsertResult> {
        if self.exists(EntityKind::Equipment, &equipment.id).await? {
            self.update_equipment(equipment).await?;
            Ok(UpsertResult::Updated)
        } else {
            self.insert_equipment(equipment).await?;
            Ok(UpsertResult::Inserted)
        }
    }

    async fn upsert_action(&self, action: &Action) -> Result<UpsertResult> {
        if self.exists(EntityKind::Action, &action.id).await? {
            self.update_action(action).await?;
            Ok(UpsertResult::Updated)
        } else {
            self.insert_action(action).await?;
            Ok(UpsertResult::Inserted)
        }
    }

    async fn insert_point_if_absent(&self, point: &Point) -> Result<bool> {
        if self.exists(EntityKind::Point, &point.id).await? {
            return Ok(false);
        }
        self.insert_point(point).await?;
        Ok(true)
    }

    async fn insert_coordinate_if_absent(&self, coordinate: &Coordinate) -> Result<bool> {
        if self.exists(EntityKind::Coordinate, &coordinate.id).await? {
            return Ok(false);
        }
        self.insert_coordinate(coordinate).await?;
        Ok(true)
    }
}
