//! Reconciliation of incoming payloads into the local store.
//!
//! Two paths exist. The full-graph path merges an [`EventGraph`] and
//! everything it owns; the planning path merges action groups into an event
//! the operator selected beforehand.
//!
//! Every write is an existence check followed by an insert or an update,
//! keyed by id, so applying the same payload twice leaves the store as it
//! was after the first application.
//!
//! A write rejected by the store (missing parent, bad row) skips that one
//! entity and is counted. A store that cannot be reached at all aborts the
//! import with an error.

use std::fmt;

use fieldlink_core::validation::{
    validate_action, validate_coordinate, validate_equipment, validate_event, validate_geometry,
    validate_point, validate_team,
};
use fieldlink_core::{
    classify_wkt, now_rfc3339, Action, ActionRecord, Coordinate, CoordinateRecord, EntityId,
    EntityKind, Equipment, EquipmentRecord, EventGraph, Geometry, GeometryKind, GeometryRecord,
    Picture, PlanningPayload, Point, PointRecord, RejectedEntity, Team, TeamRecord,
    ValidationError,
};
use fieldlink_store::{Result as StoreResult, Store, StoreExt, UpsertResult};
use tracing::{debug, error, info, warn};

use crate::error::{Result, TransferError};

/// Category given to points synthesized from equipment coordinates.
pub const SYNTHESIZED_POINT_CATEGORY: &str = "equipement";

/// Inserted and updated counts for one entity kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub inserted: usize,
    pub updated: usize,
}

impl Tally {
    fn record(&mut self, result: UpsertResult) {
        match result {
            UpsertResult::Inserted => self.inserted += 1,
            UpsertResult::Updated => self.updated += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.inserted + self.updated
    }

    fn merge(&mut self, other: Tally) {
        self.inserted += other.inserted;
        self.updated += other.updated;
    }
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.inserted, self.updated)
    }
}

/// Counts from one or more full-graph imports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub events: Tally,
    pub points: Tally,
    pub routes: Tally,
    pub zones: Tally,
    pub equipment: Tally,
    pub teams: Tally,
    pub actions: Tally,
    pub pictures: Tally,
    /// Coordinates written after the wholesale replace.
    pub coordinates: usize,
    /// Points created from equipment coordinates.
    pub synthesized_points: usize,
    /// Equipment created because an action targeted an unknown id.
    pub placeholders: usize,
    /// Entities skipped by validation or rejected by the store.
    pub failed: usize,
}

impl ImportSummary {
    pub fn merge(&mut self, other: &ImportSummary) {
        self.events.merge(other.events);
        self.points.merge(other.points);
        self.routes.merge(other.routes);
        self.zones.merge(other.zones);
        self.equipment.merge(other.equipment);
        self.teams.merge(other.teams);
        self.actions.merge(other.actions);
        self.pictures.merge(other.pictures);
        self.coordinates += other.coordinates;
        self.synthesized_points += other.synthesized_points;
        self.placeholders += other.placeholders;
        self.failed += other.failed;
    }
}

impl fmt::Display for ImportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "inserted/updated: events {}, points {}, routes {}, zones {}, equipment {}, teams {}, actions {}",
            self.events,
            self.points,
            self.routes,
            self.zones,
            self.equipment,
            self.teams,
            self.actions
        )?;
        if self.failed > 0 {
            write!(f, ", {} skipped", self.failed)?;
        }
        Ok(())
    }
}

/// Counts from one planning import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanningSummary {
    pub teams: Tally,
    pub equipment: Tally,
    pub actions: Tally,
    /// Coordinates newly inserted.
    pub coordinates: usize,
    /// Groups whose team belongs to another event.
    pub skipped_groups: usize,
    /// Equipment belonging to another event.
    pub skipped_equipment: usize,
    pub failed: usize,
}

impl fmt::Display for PlanningSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} team(s), {} action(s), {} equipment, {} coordinate(s)",
            self.teams.total(),
            self.actions.total(),
            self.equipment.total(),
            self.coordinates
        )?;
        if self.skipped_groups > 0 {
            write!(f, ", {} group(s) from another event ignored", self.skipped_groups)?;
        }
        if self.skipped_equipment > 0 {
            write!(f, ", {} equipment from another event ignored", self.skipped_equipment)?;
        }
        if self.failed > 0 {
            write!(f, ", {} skipped", self.failed)?;
        }
        Ok(())
    }
}

/// What the planning path reports back to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanningOutcome {
    pub success: bool,
    pub message: String,
    pub summary: Option<PlanningSummary>,
}

impl PlanningOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            summary: None,
        }
    }
}

impl From<Result<PlanningSummary>> for PlanningOutcome {
    fn from(result: Result<PlanningSummary>) -> Self {
        match result {
            Ok(summary) => Self {
                success: true,
                message: summary.to_string(),
                summary: Some(summary),
            },
            Err(e @ TransferError::NoTargetEvent) => Self::failed(e.to_string()),
            Err(e) => Self::failed(format!("planning import failed: {}", e)),
        }
    }
}

/// Id of a coordinate that arrived without one.
pub fn coordinate_id(equipment_id: &EntityId, order_index: i64) -> EntityId {
    EntityId::derive("coord", &[equipment_id.as_str(), &order_index.to_string()])
}

/// Id of a picture that arrived without one.
pub fn picture_id(point_id: &EntityId, position: usize) -> EntityId {
    EntityId::derive("picture", &[point_id.as_str(), &position.to_string()])
}

/// Keep going after a rejected row; stop on an unreachable store.
fn settle<T>(
    result: StoreResult<T>,
    kind: EntityKind,
    id: &EntityId,
    failed: &mut usize,
) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_fatal() => {
            error!(%kind, %id, error = %e, "store unavailable, aborting import");
            Err(e.into())
        }
        Err(e) => {
            warn!(%kind, %id, error = %e, "write rejected, skipping entity");
            *failed += 1;
            Ok(None)
        }
    }
}

fn reject(err: ValidationError, failed: &mut usize) {
    warn!(error = %err, "invalid entity skipped");
    *failed += 1;
}

fn count_undecodable(event_id: &EntityId, rejected: &[RejectedEntity], failed: &mut usize) {
    for entity in rejected {
        warn!(%event_id, %entity, "undecodable entity skipped");
    }
    *failed += rejected.len();
}

/// Coordinates of one equipment, with ids and order indexes filled in.
fn resolve_coordinates(
    equipment_id: &EntityId,
    records: &[CoordinateRecord],
    failed: &mut usize,
) -> Vec<Coordinate> {
    let mut out = Vec::with_capacity(records.len());
    for (position, rec) in records.iter().enumerate() {
        let order_index = rec.order_index.unwrap_or(position as i64);
        let id = match &rec.id {
            Some(id) if !id.is_blank() => id.clone(),
            _ => coordinate_id(equipment_id, order_index),
        };
        if let Err(e) = validate_coordinate(&id, rec) {
            reject(e, failed);
            continue;
        }
        out.push(Coordinate {
            id,
            equipment_id: rec
                .equipment_id
                .clone()
                .filter(|id| !id.is_blank())
                .unwrap_or_else(|| equipment_id.clone()),
            x: rec.x,
            y: rec.y,
            order_index,
        });
    }
    out
}

fn synthesized_point(event_id: &EntityId, coordinate: &Coordinate) -> Point {
    let now = now_rfc3339();
    Point {
        id: coordinate.id.clone(),
        event_id: event_id.clone(),
        x: coordinate.x,
        y: coordinate.y,
        name: Some(format!("Équipement - Coord {}", coordinate.order_index + 1)),
        comment: None,
        category: Some(SYNTHESIZED_POINT_CATEGORY.to_string()),
        status: Some(false),
        created_at: now.clone(),
        modified_at: now,
    }
}

fn equipment_row(rec: &EquipmentRecord, event_id: EntityId) -> Equipment {
    Equipment {
        id: rec.id.clone(),
        event_id,
        type_id: rec.type_id.clone(),
        quantity: rec.quantity.unwrap_or(1),
        length_per_unit: rec.length_per_unit,
        installed_at: rec.installed_at.clone(),
        removed_at: rec.removed_at.clone(),
    }
}

fn team_row(rec: &TeamRecord, event_id: EntityId) -> Team {
    Team {
        id: rec.id.clone(),
        event_id,
        name: rec.name.clone().unwrap_or_default(),
    }
}

fn action_row(rec: &ActionRecord, team_id: EntityId, equipment_id: EntityId) -> Action {
    Action {
        id: rec.id.clone(),
        team_id,
        equipment_id,
        kind: rec.kind.clone(),
        scheduled_time: rec.scheduled_time.clone(),
        done: rec.done.unwrap_or(false),
    }
}

/// Applies payloads to a store.
pub struct Reconciler<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: Store + ?Sized> Reconciler<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Full-Graph Path
    // ─────────────────────────────────────────────────────────────────────────

    /// Import several graphs, stopping at the first fatal error.
    pub async fn import_graphs(&self, graphs: &[EventGraph]) -> Result<ImportSummary> {
        let mut total = ImportSummary::default();
        for graph in graphs {
            let summary = self.import_graph(graph).await?;
            total.merge(&summary);
        }
        Ok(total)
    }

    /// Merge one event and everything it owns.
    pub async fn import_graph(&self, graph: &EventGraph) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();
        if let Err(e) = validate_event(graph) {
            reject(e, &mut summary.failed);
            return Ok(summary);
        }
        let event_id = &graph.id;
        debug!(%event_id, entities = graph.entity_count(), "importing entity graph");
        count_undecodable(event_id, &graph.rejected, &mut summary.failed);

        let written = settle(
            self.store.upsert_event(&graph.event_row()).await,
            EntityKind::Event,
            event_id,
            &mut summary.failed,
        )?;
        if let Some(result) = written {
            summary.events.record(result);
        }

        self.import_geometries(graph, &mut summary).await?;
        for point in &graph.points {
            self.import_point(event_id, point, &mut summary).await?;
        }
        for team in &graph.teams {
            if let Err(e) = validate_team(team) {
                reject(e, &mut summary.failed);
                continue;
            }
            let owner = team.event_id.clone().unwrap_or_else(|| event_id.clone());
            let row = team_row(team, owner);
            let written = settle(
                self.store.upsert_team(&row).await,
                EntityKind::Team,
                &team.id,
                &mut summary.failed,
            )?;
            if let Some(result) = written {
                summary.teams.record(result);
            }
        }
        for equipment in &graph.equipment {
            self.import_equipment(event_id, equipment, &mut summary).await?;
        }
        for action in &graph.actions {
            self.import_action(event_id, action, &mut summary).await?;
        }

        info!(%event_id, %summary, "entity graph imported");
        Ok(summary)
    }

    async fn import_geometries(
        &self,
        graph: &EventGraph,
        summary: &mut ImportSummary,
    ) -> Result<()> {
        let typed = graph
            .routes
            .iter()
            .map(|g| (Some(GeometryKind::Route), g))
            .chain(graph.zones.iter().map(|g| (Some(GeometryKind::Zone), g)))
            .chain(
                graph
                    .geometries
                    .iter()
                    .map(|g| (g.wkt.as_deref().and_then(classify_wkt), g)),
            );

        for (kind, rec) in typed {
            let Some(kind) = kind else {
                reject(
                    ValidationError::UnrecognizedGeometry {
                        id: rec.id.to_string(),
                    },
                    &mut summary.failed,
                );
                continue;
            };
            if let Err(e) = validate_geometry(kind.into(), rec) {
                reject(e, &mut summary.failed);
                continue;
            }
            let row = geometry_row(rec, kind, graph.id.clone());
            let written = settle(
                self.store.upsert_geometry(&row).await,
                kind.into(),
                &rec.id,
                &mut summary.failed,
            )?;
            if let Some(result) = written {
                match kind {
                    GeometryKind::Route => summary.routes.record(result),
                    GeometryKind::Zone => summary.zones.record(result),
                }
            }
        }
        Ok(())
    }

    async fn import_point(
        &self,
        event_id: &EntityId,
        rec: &PointRecord,
        summary: &mut ImportSummary,
    ) -> Result<()> {
        if let Err(e) = validate_point(rec) {
            reject(e, &mut summary.failed);
            return Ok(());
        }
        let written = settle(
            self.write_point(event_id, rec).await,
            EntityKind::Point,
            &rec.id,
            &mut summary.failed,
        )?;
        let Some(result) = written else {
            return Ok(());
        };
        summary.points.record(result);

        for (position, pic) in rec.pictures.iter().enumerate() {
            let id = match &pic.id {
                Some(id) if !id.is_blank() => id.clone(),
                _ => picture_id(&rec.id, position),
            };
            let picture = Picture {
                id,
                point_id: rec.id.clone(),
                image: pic.image.clone(),
            };
            let written = settle(
                self.store.upsert_picture(&picture).await,
                EntityKind::Picture,
                &picture.id,
                &mut summary.failed,
            )?;
            if let Some(result) = written {
                summary.pictures.record(result);
            }
        }
        Ok(())
    }

    /// Upsert a point, keeping the stored timestamps the sender left out.
    async fn write_point(&self, event_id: &EntityId, rec: &PointRecord) -> StoreResult<UpsertResult> {
        let existing = self.store.get_point(&rec.id).await?;
        let (created_at, modified_at) = match &existing {
            Some(old) => (
                old.created_at.clone(),
                rec.modified_at.clone().unwrap_or_else(|| old.modified_at.clone()),
            ),
            None => {
                let created = rec.created_at.clone().unwrap_or_else(now_rfc3339);
                let modified = rec.modified_at.clone().unwrap_or_else(|| created.clone());
                (created, modified)
            }
        };
        let point = Point {
            id: rec.id.clone(),
            event_id: event_id.clone(),
            x: rec.x,
            y: rec.y,
            name: rec.name.clone(),
            comment: rec.comment.clone(),
            category: rec.category.clone(),
            status: rec.status,
            created_at,
            modified_at,
        };
        if existing.is_some() {
            self.store.update_point(&point).await?;
            Ok(UpsertResult::Updated)
        } else {
            self.store.insert_point(&point).await?;
            Ok(UpsertResult::Inserted)
        }
    }

    async fn import_equipment(
        &self,
        event_id: &EntityId,
        rec: &EquipmentRecord,
        summary: &mut ImportSummary,
    ) -> Result<()> {
        if let Err(e) = validate_equipment(rec) {
            reject(e, &mut summary.failed);
            return Ok(());
        }
        let mut coordinates = resolve_coordinates(&rec.id, &rec.coordinates, &mut summary.failed);
        for coordinate in &mut coordinates {
            coordinate.equipment_id = rec.id.clone();
        }

        // The first coordinate's point exists before the equipment does
        if let Some(first) = coordinates.first() {
            self.synthesize_point(event_id, first, summary).await?;
        }
        self.write_equipment_type(rec, &mut summary.failed).await?;

        let row = equipment_row(rec, event_id.clone());
        let written = settle(
            self.store.upsert_equipment(&row).await,
            EntityKind::Equipment,
            &rec.id,
            &mut summary.failed,
        )?;
        let Some(result) = written else {
            return Ok(());
        };
        summary.equipment.record(result);

        let removed = settle(
            self.store.delete_coordinates(&rec.id).await,
            EntityKind::Coordinate,
            &rec.id,
            &mut summary.failed,
        )?;
        debug!(equipment_id = %rec.id, removed = removed.unwrap_or(0), "coordinates cleared");

        for (position, coordinate) in coordinates.iter().enumerate() {
            let written = settle(
                self.store.insert_coordinate(coordinate).await,
                EntityKind::Coordinate,
                &coordinate.id,
                &mut summary.failed,
            )?;
            if written.is_some() {
                summary.coordinates += 1;
            }
            if position > 0 {
                self.synthesize_point(event_id, coordinate, summary).await?;
            }
        }
        Ok(())
    }

    async fn synthesize_point(
        &self,
        event_id: &EntityId,
        coordinate: &Coordinate,
        summary: &mut ImportSummary,
    ) -> Result<()> {
        let point = synthesized_point(event_id, coordinate);
        let written = settle(
            self.store.insert_point_if_absent(&point).await,
            EntityKind::Point,
            &point.id,
            &mut summary.failed,
        )?;
        if written == Some(true) {
            summary.synthesized_points += 1;
        }
        Ok(())
    }

    /// The type catalog row, when the equipment names both id and name.
    async fn write_equipment_type(&self, rec: &EquipmentRecord, failed: &mut usize) -> Result<()> {
        if let Some(ty) = rec.equipment_type() {
            settle(
                self.store.upsert_equipment_type(&ty).await,
                EntityKind::EquipmentType,
                &ty.id,
                failed,
            )?;
        }
        Ok(())
    }

    async fn import_action(
        &self,
        event_id: &EntityId,
        rec: &ActionRecord,
        summary: &mut ImportSummary,
    ) -> Result<()> {
        if let Err(e) = validate_action(rec) {
            reject(e, &mut summary.failed);
            return Ok(());
        }
        let (Some(team_id), Some(equipment_id)) = (&rec.team_id, &rec.equipment_id) else {
            return Ok(());
        };

        // No placeholder for an action whose team is missing
        let team_present = settle(
            self.store.exists(EntityKind::Team, team_id).await,
            EntityKind::Team,
            team_id,
            &mut summary.failed,
        )?;
        match team_present {
            Some(true) => {}
            Some(false) => {
                warn!(action_id = %rec.id, %team_id, "action names an unknown team, skipping");
                summary.failed += 1;
                return Ok(());
            }
            None => return Ok(()),
        }

        let present = settle(
            self.store.exists(EntityKind::Equipment, equipment_id).await,
            EntityKind::Equipment,
            equipment_id,
            &mut summary.failed,
        )?;
        if present == Some(false) {
            let placeholder = Equipment::placeholder(equipment_id.clone(), event_id.clone());
            let written = settle(
                self.store.insert_equipment(&placeholder).await,
                EntityKind::Equipment,
                equipment_id,
                &mut summary.failed,
            )?;
            if written.is_some() {
                debug!(%equipment_id, action_id = %rec.id, "placeholder equipment created");
                summary.placeholders += 1;
            }
        }

        let row = action_row(rec, team_id.clone(), equipment_id.clone());
        let written = settle(
            self.store.upsert_action(&row).await,
            EntityKind::Action,
            &rec.id,
            &mut summary.failed,
        )?;
        if let Some(result) = written {
            summary.actions.record(result);
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Planning Path
    // ─────────────────────────────────────────────────────────────────────────

    /// Merge action groups into the selected event.
    ///
    /// Fails with [`TransferError::NoTargetEvent`] before touching the
    /// store when no event is selected. Groups and equipment that belong to
    /// another event are skipped and counted.
    pub async fn import_planning(
        &self,
        target: Option<&EntityId>,
        payload: &PlanningPayload,
    ) -> Result<PlanningSummary> {
        let target = target
            .filter(|id| !id.is_blank())
            .ok_or(TransferError::NoTargetEvent)?;
        let mut summary = PlanningSummary::default();
        count_undecodable(target, &payload.rejected, &mut summary.failed);

        for group in &payload.groups {
            let team = match &group.team {
                Some(team) if team.event_id.as_ref() == Some(target) => team,
                other => {
                    warn!(
                        event_id = %target,
                        team_event = ?other.as_ref().and_then(|t| t.event_id.as_ref()),
                        "planning group for another event ignored"
                    );
                    summary.skipped_groups += 1;
                    continue;
                }
            };
            if let Err(e) = validate_team(team) {
                reject(e, &mut summary.failed);
                continue;
            }
            let written = settle(
                self.store.upsert_team(&team_row(team, target.clone())).await,
                EntityKind::Team,
                &team.id,
                &mut summary.failed,
            )?;
            if let Some(result) = written {
                summary.teams.record(result);
            }

            for equipment in &group.equipment {
                if equipment.event_id.as_ref() != Some(target) {
                    debug!(equipment_id = %equipment.id, "equipment for another event ignored");
                    summary.skipped_equipment += 1;
                    continue;
                }
                self.plan_equipment(target, equipment, &mut summary).await?;
            }

            for coordinate in &group.coordinates {
                let Some(owner) = coordinate.equipment_id.clone().filter(|id| !id.is_blank())
                else {
                    reject(
                        ValidationError::MissingOwner {
                            kind: EntityKind::Coordinate,
                            id: coordinate
                                .id
                                .as_ref()
                                .map(ToString::to_string)
                                .unwrap_or_default(),
                            owner: EntityKind::Equipment,
                        },
                        &mut summary.failed,
                    );
                    continue;
                };
                let resolved =
                    resolve_coordinates(&owner, std::slice::from_ref(coordinate), &mut summary.failed);
                for coordinate in &resolved {
                    self.plan_coordinate(coordinate, &mut summary).await?;
                }
            }

            for action in &group.actions {
                let mut action = action.clone();
                if action.team_id.as_ref().map_or(true, EntityId::is_blank) {
                    action.team_id = Some(team.id.clone());
                }
                if let Err(e) = validate_action(&action) {
                    reject(e, &mut summary.failed);
                    continue;
                }
                let (Some(team_id), Some(equipment_id)) = (&action.team_id, &action.equipment_id)
                else {
                    continue;
                };
                let row = action_row(&action, team_id.clone(), equipment_id.clone());
                let written = settle(
                    self.store.upsert_action(&row).await,
                    EntityKind::Action,
                    &action.id,
                    &mut summary.failed,
                )?;
                if let Some(result) = written {
                    summary.actions.record(result);
                }
            }
        }

        info!(event_id = %target, %summary, "planning imported");
        Ok(summary)
    }

    async fn plan_equipment(
        &self,
        target: &EntityId,
        rec: &EquipmentRecord,
        summary: &mut PlanningSummary,
    ) -> Result<()> {
        if let Err(e) = validate_equipment(rec) {
            reject(e, &mut summary.failed);
            return Ok(());
        }
        self.write_equipment_type(rec, &mut summary.failed).await?;
        let written = settle(
            self.store.upsert_equipment(&equipment_row(rec, target.clone())).await,
            EntityKind::Equipment,
            &rec.id,
            &mut summary.failed,
        )?;
        let Some(result) = written else {
            return Ok(());
        };
        summary.equipment.record(result);

        for coordinate in resolve_coordinates(&rec.id, &rec.coordinates, &mut summary.failed) {
            self.plan_coordinate(&coordinate, summary).await?;
        }
        Ok(())
    }

    async fn plan_coordinate(
        &self,
        coordinate: &Coordinate,
        summary: &mut PlanningSummary,
    ) -> Result<()> {
        let written = settle(
            self.store.insert_coordinate_if_absent(coordinate).await,
            EntityKind::Coordinate,
            &coordinate.id,
            &mut summary.failed,
        )?;
        if written == Some(true) {
            summary.coordinates += 1;
        }
        Ok(())
    }
}

fn geometry_row(rec: &GeometryRecord, kind: GeometryKind, event_id: EntityId) -> Geometry {
    Geometry {
        id: rec.id.clone(),
        event_id,
        kind,
        wkt: rec.wkt.clone().unwrap_or_default(),
        description: rec.description.clone(),
        created_at: rec.created_at.clone().unwrap_or_else(now_rfc3339),
    }
}
