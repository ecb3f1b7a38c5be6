//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database is at version {}, newer than supported {}",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            tracing::debug!(version, "applying schema migration");
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, chrono::Utc::now().timestamp_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
///
/// Every owned table references its owner with `ON DELETE CASCADE`, so
/// deleting an event removes its whole subtree. Equipment types are a
/// shared catalog and are not owned by any event.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE events (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            start_date TEXT,
            end_date TEXT
        );

        CREATE TABLE points (
            id TEXT PRIMARY KEY NOT NULL,
            event_id TEXT NOT NULL REFERENCES events (id) ON DELETE CASCADE,
            x REAL NOT NULL,
            y REAL NOT NULL,
            name TEXT,
            comment TEXT,
            category TEXT,
            status INTEGER,                   -- nullable boolean
            created_at TEXT NOT NULL,
            modified_at TEXT NOT NULL
        );

        CREATE TABLE pictures (
            id TEXT PRIMARY KEY NOT NULL,
            point_id TEXT NOT NULL REFERENCES points (id) ON DELETE CASCADE,
            image TEXT NOT NULL
        );

        CREATE TABLE routes (
            id TEXT PRIMARY KEY NOT NULL,
            event_id TEXT NOT NULL REFERENCES events (id) ON DELETE CASCADE,
            wkt TEXT NOT NULL,
            description TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE zones (
            id TEXT PRIMARY KEY NOT NULL,
            event_id TEXT NOT NULL REFERENCES events (id) ON DELETE CASCADE,
            wkt TEXT NOT NULL,
            description TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE teams (
            id TEXT PRIMARY KEY NOT NULL,
            event_id TEXT NOT NULL REFERENCES events (id) ON DELETE CASCADE,
            name TEXT NOT NULL
        );

        CREATE TABLE equipment_types (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            description TEXT
        );

        -- type_id is a soft reference: the catalog may be seeded later
        CREATE TABLE equipment (
            id TEXT PRIMARY KEY NOT NULL,
            event_id TEXT NOT NULL REFERENCES events (id) ON DELETE CASCADE,
            type_id TEXT,
            quantity INTEGER NOT NULL DEFAULT 1,
            length_per_unit REAL,
            installed_at TEXT,
            removed_at TEXT
        );

        CREATE TABLE equipment_coordinates (
            id TEXT PRIMARY KEY NOT NULL,
            equipment_id TEXT NOT NULL REFERENCES equipment (id) ON DELETE CASCADE,
            x REAL NOT NULL,
            y REAL NOT NULL,
            order_index INTEGER NOT NULL
        );

        CREATE TABLE actions (
            id TEXT PRIMARY KEY NOT NULL,
            team_id TEXT NOT NULL REFERENCES teams (id) ON DELETE CASCADE,
            equipment_id TEXT NOT NULL REFERENCES equipment (id) ON DELETE CASCADE,
            kind TEXT,
            scheduled_time TEXT,
            done INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX idx_points_event ON points(event_id);
        CREATE INDEX idx_pictures_point ON pictures(point_id);
        CREATE INDEX idx_routes_event ON routes(event_id);
        CREATE INDEX idx_zones_event ON zones(event_id);
        CREATE INDEX idx_teams_event ON teams(event_id);
        CREATE INDEX idx_equipment_event ON equipment(event_id);
        CREATE INDEX idx_coordinates_equipment ON equipment_coordinates(equipment_id, order_index);
        CREATE INDEX idx_actions_team ON actions(team_id);
        CREATE INDEX idx_actions_equipment ON actions(equipment_id);
        "#,
    )?;

    Ok(())
}
