//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend. It uses rusqlite with bundled
//! SQLite, wrapped in async via tokio::spawn_blocking. Foreign keys are
//! switched on for every connection so cascades and parent checks hold.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};

use fieldlink_core::{
    Action, Coordinate, EntityId, EntityKind, Equipment, EquipmentType, Event, Geometry,
    GeometryKind, Picture, Point, Team,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::Store;

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking operation on the connection from the blocking pool.
    async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("mutex poisoned: {}", e)))?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("spawn_blocking failed: {}", e)))?
    }

    /// Run an UPDATE and map "no row touched" to `NotFound`.
    async fn update_row<F>(&self, kind: EntityKind, id: &EntityId, f: F) -> Result<()>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<usize> + Send + 'static,
    {
        let changed = self.call(move |conn| Ok(f(conn)?)).await?;
        if changed == 0 {
            return Err(StoreError::not_found(kind, id));
        }
        Ok(())
    }
}

/// Table holding rows of a kind.
fn table(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Event => "events",
        EntityKind::Point => "points",
        EntityKind::Picture => "pictures",
        EntityKind::Route => "routes",
        EntityKind::Zone => "zones",
        EntityKind::Team => "teams",
        EntityKind::EquipmentType => "equipment_types",
        EntityKind::Equipment => "equipment",
        EntityKind::Coordinate => "equipment_coordinates",
        EntityKind::Action => "actions",
    }
}

fn id_col(row: &Row<'_>, col: &str) -> rusqlite::Result<EntityId> {
    row.get::<_, String>(col).map(EntityId::new)
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: id_col(row, "id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        start_date: row.get("start_date")?,
        end_date: row.get("end_date")?,
    })
}

fn row_to_point(row: &Row<'_>) -> rusqlite::Result<Point> {
    Ok(Point {
        id: id_col(row, "id")?,
        event_id: id_col(row, "event_id")?,
        x: row.get("x")?,
        y: row.get("y")?,
        name: row.get("name")?,
        comment: row.get("comment")?,
        category: row.get("category")?,
        status: row.get("status")?,
        created_at: row.get("created_at")?,
        modified_at: row.get("modified_at")?,
    })
}

fn row_to_picture(row: &Row<'_>) -> rusqlite::Result<Picture> {
    Ok(Picture {
        id: id_col(row, "id")?,
        point_id: id_col(row, "point_id")?,
        image: row.get("image")?,
    })
}

fn row_to_geometry(kind: GeometryKind) -> impl Fn(&Row<'_>) -> rusqlite::Result<Geometry> {
    move |row| {
        Ok(Geometry {
            id: id_col(row, "id")?,
            event_id: id_col(row, "event_id")?,
            kind,
            wkt: row.get("wkt")?,
            description: row.get("description")?,
            created_at: row.get("created_at")?,
        })
    }
}

fn row_to_team(row: &Row<'_>) -> rusqlite::Result<Team> {
    Ok(Team {
        id: id_col(row, "id")?,
        event_id: id_col(row, "event_id")?,
        name: row.get("name")?,
    })
}

fn row_to_equipment_type(row: &Row<'_>) -> rusqlite::Result<EquipmentType> {
    Ok(EquipmentType {
        id: id_col(row, "id")?,
        name: row.get("name")?,
        description: row.get("description")?,
    })
}

fn row_to_equipment(row: &Row<'_>) -> rusqlite::Result<Equipment> {
    Ok(Equipment {
        id: id_col(row, "id")?,
        event_id: id_col(row, "event_id")?,
        type_id: row.get::<_, Option<String>>("type_id")?.map(EntityId::new),
        quantity: row.get("quantity")?,
        length_per_unit: row.get("length_per_unit")?,
        installed_at: row.get("installed_at")?,
        removed_at: row.get("removed_at")?,
    })
}

fn row_to_coordinate(row: &Row<'_>) -> rusqlite::Result<Coordinate> {
    Ok(Coordinate {
        id: id_col(row, "id")?,
        equipment_id: id_col(row, "equipment_id")?,
        x: row.get("x")?,
        y: row.get("y")?,
        order_index: row.get("order_index")?,
    })
}

fn row_to_action(row: &Row<'_>) -> rusqlite::Result<Action> {
    Ok(Action {
        id: id_col(row, "id")?,
        team_id: id_col(row, "team_id")?,
        equipment_id: id_col(row, "equipment_id")?,
        kind: row.get("kind")?,
        scheduled_time: row.get("scheduled_time")?,
        done: row.get("done")?,
    })
}

/// Fetch at most one row by id.
fn get_by_id<T>(
    conn: &Connection,
    sql: &str,
    id: &str,
    f: impl FnOnce(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Option<T>> {
    Ok(conn.query_row(sql, params![id], f).optional()?)
}

/// Fetch every row matching one parameter.
fn list_by<T>(
    conn: &Connection,
    sql: &str,
    param: &str,
    f: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params![param], f)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[async_trait]
impl Store for SqliteStore {
    async fn exists(&self, kind: EntityKind, id: &EntityId) -> Result<bool> {
        let id = id.to_string();
        self.call(move |conn| {
            let sql = format!("SELECT 1 FROM {} WHERE id = ?1", table(kind));
            let found: Option<i64> = conn.query_row(&sql, params![id], |row| row.get(0)).optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn delete(&self, kind: EntityKind, id: &EntityId) -> Result<bool> {
        let id = id.to_string();
        self.call(move |conn| {
            let sql = format!("DELETE FROM {} WHERE id = ?1", table(kind));
            Ok(conn.execute(&sql, params![id])? > 0)
        })
        .await
    }

    async fn count(&self, kind: EntityKind) -> Result<usize> {
        self.call(move |conn| {
            let sql = format!("SELECT COUNT(*) FROM {}", table(kind));
            let n: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
            Ok(n as usize)
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_event(&self, id: &EntityId) -> Result<Option<Event>> {
        let id = id.to_string();
        self.call(move |conn| get_by_id(conn, "SELECT * FROM events WHERE id = ?1", &id, row_to_event))
            .await
    }

    async fn insert_event(&self, event: &Event) -> Result<()> {
        let e = event.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO events (id, name, description, start_date, end_date)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![e.id.as_str(), e.name, e.description, e.start_date, e.end_date],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_event(&self, event: &Event) -> Result<()> {
        let e = event.clone();
        self.update_row(EntityKind::Event, &event.id, move |conn| {
            conn.execute(
                "UPDATE events SET name = ?2, description = ?3, start_date = ?4, end_date = ?5
                 WHERE id = ?1",
                params![e.id.as_str(), e.name, e.description, e.start_date, e.end_date],
            )
        })
        .await
    }

    async fn list_events(&self) -> Result<Vec<Event>> {
        self.call(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM events ORDER BY id")?;
            let rows = stmt
                .query_map([], row_to_event)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Points and Pictures
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_point(&self, id: &EntityId) -> Result<Option<Point>> {
        let id = id.to_string();
        self.call(move |conn| get_by_id(conn, "SELECT * FROM points WHERE id = ?1", &id, row_to_point))
            .await
    }

    async fn insert_point(&self, point: &Point) -> Result<()> {
        let p = point.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO points (id, event_id, x, y, name, comment, category, status,
                                     created_at, modified_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    p.id.as_str(),
                    p.event_id.as_str(),
                    p.x,
                    p.y,
                    p.name,
                    p.comment,
                    p.category,
                    p.status,
                    p.created_at,
                    p.modified_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_point(&self, point: &Point) -> Result<()> {
        let p = point.clone();
        self.update_row(EntityKind::Point, &point.id, move |conn| {
            conn.execute(
                "UPDATE points SET event_id = ?2, x = ?3, y = ?4, name = ?5, comment = ?6,
                                   category = ?7, status = ?8, modified_at = ?9
                 WHERE id = ?1",
                params![
                    p.id.as_str(),
                    p.event_id.as_str(),
                    p.x,
                    p.y,
                    p.name,
                    p.comment,
                    p.category,
                    p.status,
                    p.modified_at,
                ],
            )
        })
        .await
    }

    async fn list_points(&self, event_id: &EntityId) -> Result<Vec<Point>> {
        let event_id = event_id.to_string();
        self.call(move |conn| {
            list_by(
                conn,
                "SELECT * FROM points WHERE event_id = ?1 ORDER BY id",
                &event_id,
                row_to_point,
            )
        })
        .await
    }

    async fn insert_picture(&self, picture: &Picture) -> Result<()> {
        let p = picture.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO pictures (id, point_id, image) VALUES (?1, ?2, ?3)",
                params![p.id.as_str(), p.point_id.as_str(), p.image],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_picture(&self, picture: &Picture) -> Result<()> {
        let p = picture.clone();
        self.update_row(EntityKind::Picture, &picture.id, move |conn| {
            conn.execute(
                "UPDATE pictures SET point_id = ?2, image = ?3 WHERE id = ?1",
                params![p.id.as_str(), p.point_id.as_str(), p.image],
            )
        })
        .await
    }

    async fn list_pictures(&self, point_id: &EntityId) -> Result<Vec<Picture>> {
        let point_id = point_id.to_string();
        self.call(move |conn| {
            list_by(
                conn,
                "SELECT * FROM pictures WHERE point_id = ?1 ORDER BY id",
                &point_id,
                row_to_picture,
            )
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Routes and Zones
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_geometry(&self, kind: GeometryKind, id: &EntityId) -> Result<Option<Geometry>> {
        let id = id.to_string();
        self.call(move |conn| {
            let sql = format!("SELECT * FROM {} WHERE id = ?1", table(kind.into()));
            get_by_id(conn, &sql, &id, row_to_geometry(kind))
        })
        .await
    }

    async fn insert_geometry(&self, geometry: &Geometry) -> Result<()> {
        let g = geometry.clone();
        self.call(move |conn| {
            let sql = format!(
                "INSERT INTO {} (id, event_id, wkt, description, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                table(g.kind.into())
            );
            conn.execute(
                &sql,
                params![g.id.as_str(), g.event_id.as_str(), g.wkt, g.description, g.created_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_geometry(&self, geometry: &Geometry) -> Result<()> {
        let g = geometry.clone();
        self.update_row(geometry.kind.into(), &geometry.id, move |conn| {
            let sql = format!(
                "UPDATE {} SET event_id = ?2, wkt = ?3, description = ?4 WHERE id = ?1",
                table(g.kind.into())
            );
            conn.execute(
                &sql,
                params![g.id.as_str(), g.event_id.as_str(), g.wkt, g.description],
            )
        })
        .await
    }

    async fn list_geometries(
        &self,
        kind: GeometryKind,
        event_id: &EntityId,
    ) -> Result<Vec<Geometry>> {
        let event_id = event_id.to_string();
        self.call(move |conn| {
            let sql = format!(
                "SELECT * FROM {} WHERE event_id = ?1 ORDER BY id",
                table(kind.into())
            );
            list_by(conn, &sql, &event_id, row_to_geometry(kind))
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Teams
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_team(&self, id: &EntityId) -> Result<Option<Team>> {
        let id = id.to_string();
        self.call(move |conn| get_by_id(conn, "SELECT * FROM teams WHERE id = ?1", &id, row_to_team))
            .await
    }

    async fn insert_team(&self, team: &Team) -> Result<()> {
        let t = team.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO teams (id, event_id, name) VALUES (?1, ?2, ?3)",
                params![t.id.as_str(), t.event_id.as_str(), t.name],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_team(&self, team: &Team) -> Result<()> {
        let t = team.clone();
        self.update_row(EntityKind::Team, &team.id, move |conn| {
            conn.execute(
                "UPDATE teams SET event_id = ?2, name = ?3 WHERE id = ?1",
                params![t.id.as_str(), t.event_id.as_str(), t.name],
            )
        })
        .await
    }

    async fn list_teams(&self, event_id: &EntityId) -> Result<Vec<Team>> {
        let event_id = event_id.to_string();
        self.call(move |conn| {
            list_by(
                conn,
                "SELECT * FROM teams WHERE event_id = ?1 ORDER BY id",
                &event_id,
                row_to_team,
            )
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Equipment, Types and Coordinates
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_equipment_type(&self, id: &EntityId) -> Result<Option<EquipmentType>> {
        let id = id.to_string();
        self.call(move |conn| {
            get_by_id(
                conn,
                "SELECT * FROM equipment_types WHERE id = ?1",
                &id,
                row_to_equipment_type,
            )
        })
        .await
    }

    async fn insert_equipment_type(&self, ty: &EquipmentType) -> Result<()> {
        let t = ty.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO equipment_types (id, name, description) VALUES (?1, ?2, ?3)",
                params![t.id.as_str(), t.name, t.description],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_equipment_type(&self, ty: &EquipmentType) -> Result<()> {
        let t = ty.clone();
        self.update_row(EntityKind::EquipmentType, &ty.id, move |conn| {
            conn.execute(
                "UPDATE equipment_types SET name = ?2, description = ?3 WHERE id = ?1",
                params![t.id.as_str(), t.name, t.description],
            )
        })
        .await
    }

    async fn get_equipment(&self, id: &EntityId) -> Result<Option<Equipment>> {
        let id = id.to_string();
        self.call(move |conn| {
            get_by_id(conn, "SELECT * FROM equipment WHERE id = ?1", &id, row_to_equipment)
        })
        .await
    }

    async fn insert_equipment(&self, equipment: &Equipment) -> Result<()> {
        let e = equipment.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO equipment (id, event_id, type_id, quantity, length_per_unit,
                                        installed_at, removed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    e.id.as_str(),
                    e.event_id.as_str(),
                    e.type_id.as_ref().map(EntityId::as_str),
                    e.quantity,
                    e.length_per_unit,
                    e.installed_at,
                    e.removed_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_equipment(&self, equipment: &Equipment) -> Result<()> {
        let e = equipment.clone();
        self.update_row(EntityKind::Equipment, &equipment.id, move |conn| {
            conn.execute(
                "UPDATE equipment SET event_id = ?2, type_id = ?3, quantity = ?4,
                                      length_per_unit = ?5, installed_at = ?6, removed_at = ?7
                 WHERE id = ?1",
                params![
                    e.id.as_str(),
                    e.event_id.as_str(),
                    e.type_id.as_ref().map(EntityId::as_str),
                    e.quantity,
                    e.length_per_unit,
                    e.installed_at,
                    e.removed_at,
                ],
            )
        })
        .await
    }

    async fn list_equipment(&self, event_id: &EntityId) -> Result<Vec<Equipment>> {
        let event_id = event_id.to_string();
        self.call(move |conn| {
            list_by(
                conn,
                "SELECT * FROM equipment WHERE event_id = ?1 ORDER BY id",
                &event_id,
                row_to_equipment,
            )
        })
        .await
    }

    async fn insert_coordinate(&self, coordinate: &Coordinate) -> Result<()> {
        let c = coordinate.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO equipment_coordinates (id, equipment_id, x, y, order_index)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![c.id.as_str(), c.equipment_id.as_str(), c.x, c.y, c.order_index],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_coordinates(&self, equipment_id: &EntityId) -> Result<usize> {
        let equipment_id = equipment_id.to_string();
        self.call(move |conn| {
            Ok(conn.execute(
                "DELETE FROM equipment_coordinates WHERE equipment_id = ?1",
                params![equipment_id],
            )?)
        })
        .await
    }

    async fn list_coordinates(&self, equipment_id: &EntityId) -> Result<Vec<Coordinate>> {
        let equipment_id = equipment_id.to_string();
        self.call(move |conn| {
            list_by(
                conn,
                "SELECT * FROM equipment_coordinates WHERE equipment_id = ?1
                 ORDER BY order_index, id",
                &equipment_id,
                row_to_coordinate,
            )
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Actions
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_action(&self, id: &EntityId) -> Result<Option<Action>> {
        let id = id.to_string();
        self.call(move |conn| get_by_id(conn, "SELECT * FROM actions WHERE id = ?1", &id, row_to_action))
            .await
    }

    async fn insert_action(&self, action: &Action) -> Result<()> {
        let a = action.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO actions (id, team_id, equipment_id, kind, scheduled_time, done)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    a.id.as_str(),
                    a.team_id.as_str(),
                    a.equipment_id.as_str(),
                    a.kind,
                    a.scheduled_time,
                    a.done,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_action(&self, action: &Action) -> Result<()> {
        let a = action.clone();
        self.update_row(EntityKind::Action, &action.id, move |conn| {
            conn.execute(
                "UPDATE actions SET team_id = ?2, equipment_id = ?3, kind = ?4,
                                    scheduled_time = ?5, done = ?6
                 WHERE id = ?1",
                params![
                    a.id.as_str(),
                    a.team_id.as_str(),
                    a.equipment_id.as_str(),
                    a.kind,
                    a.scheduled_time,
                    a.done,
                ],
            )
        })
        .await
    }

    async fn list_actions(&self, team_id: &EntityId) -> Result<Vec<Action>> {
        let team_id = team_id.to_string();
        self.call(move |conn| {
            list_by(
                conn,
                "SELECT * FROM actions WHERE team_id = ?1 ORDER BY id",
                &team_id,
                row_to_action,
            )
        })
        .await
    }
}
