//! The device: one local store plus the transfers and captures run on it.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use fieldlink_core::status::sort_events;
use fieldlink_core::validation::validate_point;
use fieldlink_core::{
    now_rfc3339, EntityId, EntityKind, Event, EventGraph, EventStatus, PlanningPayload, Picture,
    Point, PointRecord,
};
use fieldlink_store::{SqliteStore, Store, StoreError};
use fieldlink_sync::Connector;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, TransferError};
use crate::export::export_event_graph;
use crate::orchestrator::{TransferConfig, TransferSession};
use crate::reconcile::{ImportSummary, PlanningOutcome, Reconciler};

/// Configuration for a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// SQLite database file.
    pub store_path: PathBuf,
    pub transfer: TransferConfig,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("fieldlink.db"),
            transfer: TransferConfig::default(),
        }
    }
}

impl DeviceConfig {
    /// Parse a JSON configuration; missing keys take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| TransferError::Config(e.to_string()))
    }
}

/// A point captured on this device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewPoint {
    pub x: f64,
    pub y: f64,
    pub name: Option<String>,
    pub comment: Option<String>,
    pub category: Option<String>,
}

/// Owns the local store and the lock that serializes imports into it.
pub struct Device<S: ?Sized> {
    store: Arc<S>,
    import_lock: Arc<Mutex<()>>,
    config: DeviceConfig,
}

impl Device<SqliteStore> {
    /// Open the SQLite store named by the configuration.
    pub fn open(config: DeviceConfig) -> Result<Self> {
        let store = SqliteStore::open(&config.store_path)?;
        info!(path = %config.store_path.display(), "device store opened");
        Ok(Self::new(store, config))
    }
}

impl<S: Store> Device<S> {
    pub fn new(store: S, config: DeviceConfig) -> Self {
        Self::from_shared(Arc::new(store), config)
    }
}

impl<S: Store + ?Sized> Device<S> {
    pub fn from_shared(store: Arc<S>, config: DeviceConfig) -> Self {
        Self {
            store,
            import_lock: Arc::new(Mutex::new(())),
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// A transfer session over `connector`, sharing this device's store
    /// and import lock.
    pub fn session<C: Connector>(&self, connector: C) -> TransferSession<S, C> {
        TransferSession::new(
            Arc::clone(&self.store),
            Arc::clone(&self.import_lock),
            connector,
            self.config.transfer.clone(),
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────────────────

    /// Events with their derived status, active first.
    pub async fn list_events(&self) -> Result<Vec<(Event, EventStatus)>> {
        self.list_events_on(chrono::Local::now().date_naive()).await
    }

    pub async fn list_events_on(&self, today: NaiveDate) -> Result<Vec<(Event, EventStatus)>> {
        let mut events = self.store.list_events().await?;
        sort_events(&mut events, today);
        Ok(events
            .into_iter()
            .map(|event| {
                let status = event.status_on(today);
                (event, status)
            })
            .collect())
    }

    /// Delete an event and everything it owns.
    pub async fn delete_event(&self, id: &EntityId) -> Result<bool> {
        let deleted = self.store.delete(EntityKind::Event, id).await?;
        debug!(event_id = %id, deleted, "event deleted");
        Ok(deleted)
    }

    pub async fn export_event(&self, id: &EntityId) -> Result<EventGraph> {
        export_event_graph(self.store.as_ref(), id, chrono::Local::now().date_naive()).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Imports
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn import_graphs(&self, graphs: &[EventGraph]) -> Result<ImportSummary> {
        let _guard = self.import_lock.lock().await;
        Reconciler::new(self.store.as_ref())
            .import_graphs(graphs)
            .await
    }

    pub async fn import_planning(
        &self,
        target: Option<&EntityId>,
        payload: &PlanningPayload,
    ) -> PlanningOutcome {
        let _guard = self.import_lock.lock().await;
        Reconciler::new(self.store.as_ref())
            .import_planning(target, payload)
            .await
            .into()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Capture
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a new point. Created and modified timestamps start equal.
    pub async fn create_point(&self, event_id: &EntityId, new: NewPoint) -> Result<Point> {
        let now = now_rfc3339();
        let point = Point {
            id: EntityId::generate(),
            event_id: event_id.clone(),
            x: new.x,
            y: new.y,
            name: new.name,
            comment: new.comment,
            category: new.category,
            status: Some(false),
            created_at: now.clone(),
            modified_at: now,
        };
        validate_point(&PointRecord::from_row(point.clone(), Vec::new()))?;
        self.store.insert_point(&point).await?;
        debug!(point_id = %point.id, %event_id, "point captured");
        Ok(point)
    }

    pub async fn update_point_comment(
        &self,
        id: &EntityId,
        comment: Option<String>,
    ) -> Result<Point> {
        self.modify_point(id, |point| point.comment = comment).await
    }

    pub async fn move_point(&self, id: &EntityId, x: f64, y: f64) -> Result<Point> {
        self.modify_point(id, |point| {
            point.x = x;
            point.y = y;
        })
        .await
    }

    /// Attach an encoded image to a point.
    pub async fn attach_picture(&self, point_id: &EntityId, image: String) -> Result<Picture> {
        let picture = Picture {
            id: EntityId::generate(),
            point_id: point_id.clone(),
            image,
        };
        self.store.insert_picture(&picture).await?;
        self.modify_point(point_id, |_| {}).await?;
        Ok(picture)
    }

    /// Remove one picture of a point. Returns `false` if it was not there.
    pub async fn remove_picture(&self, point_id: &EntityId, picture_id: &EntityId) -> Result<bool> {
        let removed = self.store.delete(EntityKind::Picture, picture_id).await?;
        if removed {
            self.modify_point(point_id, |_| {}).await?;
        }
        Ok(removed)
    }

    /// Apply `change` and refresh the modified timestamp.
    async fn modify_point(&self, id: &EntityId, change: impl FnOnce(&mut Point)) -> Result<Point> {
        let mut point = self
            .store
            .get_point(id)
            .await?
            .ok_or_else(|| StoreError::not_found(EntityKind::Point, id))?;
        change(&mut point);
        validate_point(&PointRecord::from_row(point.clone(), Vec::new()))?;
        point.modified_at = now_rfc3339();
        self.store.update_point(&point).await?;
        Ok(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldlink_store::MemoryStore;
    use fieldlink_testkit::fixtures::event_graph;

    async fn device_with(graphs: &[EventGraph]) -> Device<MemoryStore> {
        let device = Device::new(MemoryStore::new(), DeviceConfig::default());
        device.import_graphs(graphs).await.unwrap();
        device
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[tokio::test]
    async fn test_list_events_sorted_by_status() {
        let device = device_with(&[
            event_graph("past-old").dates("2024-01-01", "2024-01-02").build(),
            event_graph("past-new").dates("2024-03-01", "2024-03-02").build(),
            event_graph("planned").dates("2024-09-01", "2024-09-02").build(),
            event_graph("active").dates("2024-05-01", "2024-07-01").build(),
            event_graph("undated").build(),
        ])
        .await;

        let listed = device.list_events_on(day("2024-06-01")).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|(e, _)| e.id.as_str()).collect();
        assert_eq!(ids, vec!["active", "undated", "planned", "past-new", "past-old"]);
        assert_eq!(listed[0].1, EventStatus::Active);
        assert_eq!(listed[4].1, EventStatus::Past);
    }

    #[tokio::test]
    async fn test_capture_refreshes_modified_at() {
        let device = device_with(&[event_graph("E1").build()]).await;
        let mut old = event_graph("E1").point("P1", 1.0, 1.0).build().points.remove(0);
        old.created_at = Some("2020-01-01T00:00:00.000Z".into());
        old.modified_at = Some("2020-01-01T00:00:00.000Z".into());
        let mut graph = event_graph("E1").build();
        graph.points.push(old);
        device.import_graphs(&[graph]).await.unwrap();
        let p1 = EntityId::new("P1");

        let updated = device
            .update_point_comment(&p1, Some("gate B".into()))
            .await
            .unwrap();
        assert_eq!(updated.comment.as_deref(), Some("gate B"));
        assert_eq!(updated.created_at, "2020-01-01T00:00:00.000Z");
        assert!(updated.modified_at.as_str() > "2020-01-01T00:00:00.000Z");

        let moved = device.move_point(&p1, 3.0, 4.0).await.unwrap();
        assert_eq!((moved.x, moved.y), (3.0, 4.0));
        assert!(device.move_point(&p1, f64::NAN, 0.0).await.is_err());
    }

    #[tokio::test]
    async fn test_pictures_attach_and_remove() {
        let device = device_with(&[event_graph("E1").build()]).await;
        let point = device
            .create_point(
                &EntityId::new("E1"),
                NewPoint {
                    x: 1.0,
                    y: 2.0,
                    ..NewPoint::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(point.created_at, point.modified_at);

        let picture = device
            .attach_picture(&point.id, "aW1n".into())
            .await
            .unwrap();
        assert_eq!(device.store().list_pictures(&point.id).await.unwrap().len(), 1);
        assert!(device.remove_picture(&point.id, &picture.id).await.unwrap());
        assert!(!device.remove_picture(&point.id, &picture.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_point_needs_existing_event() {
        let device = device_with(&[]).await;
        let result = device
            .create_point(&EntityId::new("nope"), NewPoint::default())
            .await;
        assert!(matches!(result, Err(TransferError::Store(_))));
    }

    #[tokio::test]
    async fn test_delete_event_cascades() {
        let device = device_with(&[event_graph("E1")
            .point("P1", 1.0, 1.0)
            .team("T1")
            .equipment("EQ1", &[("C1", 1.0, 1.0)])
            .action("A1", "T1", "EQ1")
            .build()])
        .await;
        assert!(device.delete_event(&EntityId::new("E1")).await.unwrap());
        for kind in EntityKind::ALL {
            if kind == EntityKind::EquipmentType {
                continue;
            }
            assert_eq!(device.store().count(kind).await.unwrap(), 0, "{}", kind);
        }
    }

    #[test]
    fn test_config_from_json() {
        let config = DeviceConfig::from_json(
            r#"{"store_path": "/data/field.db", "transfer": {"liveness_timeout_ms": 2000}}"#,
        )
        .unwrap();
        assert_eq!(config.store_path, PathBuf::from("/data/field.db"));
        assert_eq!(config.transfer.liveness_timeout.as_secs(), 2);
        assert!(config.transfer.acknowledge_imports);
        assert!(DeviceConfig::from_json("{").is_err());
    }
}
