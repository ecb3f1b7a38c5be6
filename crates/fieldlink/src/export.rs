//! Entity graph assembly for the sending side.

use chrono::NaiveDate;
use fieldlink_core::{
    ActionRecord, EntityId, EquipmentRecord, EventGraph, GeometryKind, GeometryRecord,
    PointRecord, TeamRecord,
};
use fieldlink_store::Store;
use tracing::debug;

use crate::error::{Result, TransferError};

/// Read one event and everything it owns into a canonical graph.
///
/// Coordinates come back in order-index order. Actions are collected through
/// the event's teams. `status` is filled with the status derived for `today`
/// and is advisory for the receiver.
pub async fn export_event_graph<S: Store + ?Sized>(
    store: &S,
    event_id: &EntityId,
    today: NaiveDate,
) -> Result<EventGraph> {
    let event = store
        .get_event(event_id)
        .await?
        .ok_or_else(|| TransferError::EventNotFound(event_id.clone()))?;

    let mut graph = EventGraph::empty(event.id.clone());
    graph.status = Some(event.status_on(today).as_str().to_string());
    graph.name = Some(event.name);
    graph.description = Some(event.description);
    graph.start_date = event.start_date;
    graph.end_date = event.end_date;

    graph.routes = store
        .list_geometries(GeometryKind::Route, event_id)
        .await?
        .into_iter()
        .map(GeometryRecord::from)
        .collect();
    graph.zones = store
        .list_geometries(GeometryKind::Zone, event_id)
        .await?
        .into_iter()
        .map(GeometryRecord::from)
        .collect();

    for point in store.list_points(event_id).await? {
        let pictures = store.list_pictures(&point.id).await?;
        graph.points.push(PointRecord::from_row(point, pictures));
    }

    for equipment in store.list_equipment(event_id).await? {
        let ty = match &equipment.type_id {
            Some(type_id) => store.get_equipment_type(type_id).await?,
            None => None,
        };
        let coordinates = store.list_coordinates(&equipment.id).await?;
        graph
            .equipment
            .push(EquipmentRecord::from_row(equipment, ty, coordinates));
    }

    for team in store.list_teams(event_id).await? {
        let actions = store.list_actions(&team.id).await?;
        graph
            .actions
            .extend(actions.into_iter().map(ActionRecord::from));
        graph.teams.push(TeamRecord::from(team));
    }

    debug!(%event_id, entities = graph.entity_count(), "entity graph assembled");
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::Reconciler;
    use fieldlink_store::MemoryStore;
    use fieldlink_testkit::fixtures::event_graph;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[tokio::test]
    async fn test_export_unknown_event() {
        let store = MemoryStore::new();
        let err = export_event_graph(&store, &EntityId::new("nope"), today())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::EventNotFound(_)));
    }

    #[tokio::test]
    async fn test_export_carries_the_whole_subtree() {
        let store = MemoryStore::new();
        let graph = event_graph("E1")
            .dates("2024-05-01", "2024-05-03")
            .point("P1", 1.0, 2.0)
            .picture("P1", "aW1n")
            .zone("Z1", "POLYGON((0 0, 1 0, 1 1, 0 0))")
            .team("T1")
            .typed_equipment("EQ1", "TY1", "Barrier")
            .equipment("EQ2", &[("C2", 5.0, 5.0), ("C1", 4.0, 4.0)])
            .action("A1", "T1", "EQ1")
            .build();
        Reconciler::new(&store).import_graph(&graph).await.unwrap();

        let out = export_event_graph(&store, &EntityId::new("E1"), today())
            .await
            .unwrap();
        assert_eq!(out.status.as_deref(), Some("passé"));
        assert_eq!(out.zones.len(), 1);
        assert_eq!(out.teams.len(), 1);
        assert_eq!(out.actions.len(), 1);
        // P1 plus two synthesized coordinate points
        assert_eq!(out.points.len(), 3);
        let p1 = out.points.iter().find(|p| p.id.as_str() == "P1").unwrap();
        assert_eq!(p1.pictures.len(), 1);

        let eq1 = out.equipment.iter().find(|e| e.id.as_str() == "EQ1").unwrap();
        assert_eq!(eq1.type_name.as_deref(), Some("Barrier"));
        let eq2 = out.equipment.iter().find(|e| e.id.as_str() == "EQ2").unwrap();
        let order: Vec<_> = eq2.coordinates.iter().map(|c| c.order_index).collect();
        assert_eq!(order, vec![Some(0), Some(1)]);
    }

    #[tokio::test]
    async fn test_export_then_import_elsewhere_is_equivalent() {
        let source = MemoryStore::new();
        let graph = event_graph("E1")
            .point("P1", 1.0, 2.0)
            .team("T1")
            .equipment("EQ1", &[("C1", 1.0, 1.0)])
            .action("A1", "T1", "EQ1")
            .build();
        Reconciler::new(&source).import_graph(&graph).await.unwrap();
        let exported = export_event_graph(&source, &EntityId::new("E1"), today())
            .await
            .unwrap();

        let target = MemoryStore::new();
        let summary = Reconciler::new(&target)
            .import_graph(&exported)
            .await
            .unwrap();
        assert_eq!(summary.failed, 0);
        let again = export_event_graph(&target, &EntityId::new("E1"), today())
            .await
            .unwrap();
        assert_eq!(again, exported);
    }
}
