//! End-to-end transfers between a device and a scripted desktop peer on
//! the in-memory network.

use std::time::Duration;

use fieldlink::core::{EntityKind, EventGraph};
use fieldlink::store::{MemoryStore, Store};
use fieldlink::sync::transport::{CLOSE_GOING_AWAY, CLOSE_NORMAL};
use fieldlink::sync::{
    classify, decode, ChannelAddress, ChannelState, Inbound, MemoryNetwork, Message, Response,
    ResponseCode, SyncError,
};
use fieldlink::{
    Device, DeviceConfig, EntityId, GateDecision, ImportGate, PlanningPayload, TransferConfig,
    TransferError, TransferPhase,
};
use fieldlink_testkit::fixtures::{
    action_record, event_frame, event_graph, planning_group, FlakyStore,
};
use fieldlink_testkit::{init_test_logging, ScriptedPeer, Step};

fn address() -> ChannelAddress {
    decode("desktop.test:8765").unwrap()
}

fn config() -> TransferConfig {
    TransferConfig::default()
        .with_liveness_timeout(Duration::from_secs(1))
        .with_response_timeout(Duration::from_secs(2))
}

fn device() -> Device<MemoryStore> {
    Device::new(
        MemoryStore::new(),
        DeviceConfig {
            transfer: config(),
            ..DeviceConfig::default()
        },
    )
}

fn response(text: &str) -> Response {
    match classify(text) {
        Ok(Inbound::Response(response)) => response,
        other => panic!("expected a response envelope, got {:?}", other),
    }
}

fn id(s: &str) -> EntityId {
    EntityId::new(s)
}

async fn seeded_with(graph: EventGraph) -> Device<MemoryStore> {
    let device = device();
    device.import_graphs(&[graph]).await.unwrap();
    device
}

// ─────────────────────────────────────────────────────────────────────────────
// Receiving
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_same_event_received_twice_is_stored_once() {
    init_test_logging();
    let network = MemoryNetwork::new();
    let frame = r#"{"type":"event","data":{"id":"E1","name":"Fair","points":[{"id":"P1","x":1,"y":2}]}}"#;
    let peer = ScriptedPeer::listen(
        &network,
        &address(),
        vec![
            Step::Message(Message::Connected),
            Step::Send(frame.into()),
            Step::Expect,
            Step::Send(frame.into()),
            Step::Expect,
            Step::Message(Message::goodbye("done")),
        ],
    )
    .await;

    let device = device();
    let mut session = device.session(network.connector());
    let report = session.receive(&address(), None).await.unwrap();
    assert_eq!(report.graphs, 2);
    assert!(report.goodbye);
    assert_eq!(session.status().phase, TransferPhase::Completed);

    let store = device.store();
    assert_eq!(store.count(EntityKind::Event).await.unwrap(), 1);
    assert_eq!(store.count(EntityKind::Point).await.unwrap(), 1);
    let event = store.get_event(&id("E1")).await.unwrap().unwrap();
    assert_eq!(event.name, "Fair");

    let log = peer.finish().await.unwrap();
    assert_eq!(log.received.len(), 2);
    for text in &log.received {
        let ack = response(text);
        assert_eq!(ack.code, ResponseCode::Imported);
        assert!(ack.message.starts_with("1 event(s) imported."), "{}", ack.message);
    }
}

#[tokio::test]
async fn test_resent_equipment_replaces_its_coordinates() {
    let network = MemoryNetwork::new();
    let first = r#"{"type":"event","data":{"id":"E1","equipment":[{"id":"EQ1","coordinates":[{"id":"C1","x":0,"y":0,"orderIndex":0}]}]}}"#;
    let second = r#"{"type":"event","data":{"id":"E1","equipment":[{"id":"EQ1","coordinates":[{"id":"C2","x":1,"y":1,"orderIndex":0}]}]}}"#;
    let peer = ScriptedPeer::listen(
        &network,
        &address(),
        vec![
            Step::Send(first.into()),
            Step::Expect,
            Step::Send(second.into()),
            Step::Expect,
            Step::Message(Message::goodbye("done")),
        ],
    )
    .await;

    let device = device();
    device
        .session(network.connector())
        .receive(&address(), None)
        .await
        .unwrap();
    peer.finish().await.unwrap();

    let store = device.store();
    let coords = store.list_coordinates(&id("EQ1")).await.unwrap();
    assert_eq!(coords.len(), 1);
    assert_eq!(coords[0].id, id("C2"));
    assert!(store.exists(EntityKind::Point, &id("C1")).await.unwrap());
    assert!(store.exists(EntityKind::Point, &id("C2")).await.unwrap());
}

#[tokio::test]
async fn test_planning_for_another_event_writes_nothing() {
    let network = MemoryNetwork::new();
    let mut group = planning_group("T1", "EX");
    group.actions.push(action_record("A1", "T1", "EQ1"));
    let payload = PlanningPayload::new(vec![group]);
    let peer = ScriptedPeer::listen(
        &network,
        &address(),
        vec![
            Step::Message(Message::planning(&payload).unwrap()),
            Step::Message(Message::goodbye("done")),
        ],
    )
    .await;

    let device = seeded_with(event_graph("EY").build()).await;
    let report = device
        .session(network.connector())
        .receive(&address(), Some(id("EY")))
        .await
        .unwrap();
    let log = peer.finish().await.unwrap();

    assert_eq!(report.planning.len(), 1);
    let summary = report.planning[0].summary.as_ref().unwrap();
    assert_eq!(summary.skipped_groups, 1);
    assert_eq!(summary.teams.total() + summary.actions.total(), 0);
    assert_eq!(device.store().count(EntityKind::Team).await.unwrap(), 0);
    assert_eq!(device.store().count(EntityKind::Action).await.unwrap(), 0);
    // Planning is never acknowledged
    assert!(log.received.is_empty());
}

#[tokio::test]
async fn test_planning_without_selected_event_is_rejected() {
    let network = MemoryNetwork::new();
    let payload = PlanningPayload::new(vec![planning_group("T1", "EY")]);
    let peer = ScriptedPeer::listen(
        &network,
        &address(),
        vec![
            Step::Message(Message::planning(&payload).unwrap()),
            Step::Message(Message::goodbye("done")),
        ],
    )
    .await;

    let device = seeded_with(event_graph("EY").build()).await;
    let report = device
        .session(network.connector())
        .receive(&address(), None)
        .await
        .unwrap();
    peer.finish().await.unwrap();

    assert!(!report.planning[0].success);
    assert!(report.planning[0].message.contains("select an event first"));
    assert_eq!(device.store().count(EntityKind::Team).await.unwrap(), 0);
}

#[tokio::test]
async fn test_undecodable_payload_is_answered_and_session_continues() {
    let network = MemoryNetwork::new();
    let peer = ScriptedPeer::listen(
        &network,
        &address(),
        vec![
            Step::Send("not json at all".into()),
            Step::Send(r#"{"type":"event","data":42}"#.into()),
            Step::Expect,
            Step::Send(event_frame(&event_graph("E1").build())),
            Step::Expect,
            Step::Message(Message::goodbye("done")),
        ],
    )
    .await;

    let device = device();
    let report = device
        .session(network.connector())
        .receive(&address(), None)
        .await
        .unwrap();
    let log = peer.finish().await.unwrap();

    assert_eq!(report.graphs, 1);
    let invalid = response(&log.received[0]);
    assert_eq!(invalid.code, ResponseCode::Failed);
    assert!(invalid.message.starts_with("invalid payload"));
    assert_eq!(response(&log.received[1]).code, ResponseCode::Imported);
}

struct RefuseEvent(&'static str);

impl ImportGate for RefuseEvent {
    fn check(&self, graph: &EventGraph) -> GateDecision {
        if graph.id.as_str() == self.0 {
            GateDecision::Refuse(format!("{} is locked", graph.id))
        } else {
            GateDecision::Accept
        }
    }
}

#[tokio::test]
async fn test_malformed_children_do_not_sink_the_event() {
    let network = MemoryNetwork::new();
    let frame = r#"{"type":"event","data":{"id":"E1","name":"Fair",
        "points":[{"id":"P1","x":1,"y":2},{"id":"P2","x":"n/a","y":0}],
        "teams":[{"id":"T1"}],
        "actions":[{"id":"A1","teamId":"T1","equipementId":"EQ1","isDone":"yes"}]}}"#;
    let peer = ScriptedPeer::listen(
        &network,
        &address(),
        vec![
            Step::Send(frame.into()),
            Step::Expect,
            Step::Message(Message::goodbye("done")),
        ],
    )
    .await;

    let device = device();
    let report = device
        .session(network.connector())
        .receive(&address(), None)
        .await
        .unwrap();
    assert_eq!(report.graphs, 1);
    assert_eq!(report.summary.failed, 2);

    let store = device.store();
    assert!(store.exists(EntityKind::Event, &id("E1")).await.unwrap());
    assert!(store.exists(EntityKind::Point, &id("P1")).await.unwrap());
    assert!(store.exists(EntityKind::Team, &id("T1")).await.unwrap());
    assert!(!store.exists(EntityKind::Point, &id("P2")).await.unwrap());
    assert_eq!(store.count(EntityKind::Action).await.unwrap(), 0);

    let log = peer.finish().await.unwrap();
    let ack = response(&log.received[0]);
    assert_eq!(ack.code, ResponseCode::Imported);
    assert!(ack.message.contains("2 skipped"), "{}", ack.message);
}

#[tokio::test]
async fn test_gate_refusal_is_answered_with_code_1() {
    let network = MemoryNetwork::new();
    let peer = ScriptedPeer::listen(
        &network,
        &address(),
        vec![
            Step::Send(event_frame(&event_graph("E1").build())),
            Step::Expect,
            Step::Message(Message::goodbye("done")),
        ],
    )
    .await;

    let device = device();
    let report = device
        .session(network.connector())
        .with_gate(RefuseEvent("E1"))
        .receive(&address(), None)
        .await
        .unwrap();
    let log = peer.finish().await.unwrap();

    assert_eq!(report.refused, 1);
    assert_eq!(report.graphs, 0);
    let ack = response(&log.received[0]);
    assert_eq!(ack.code, ResponseCode::Refused);
    assert_eq!(ack.message, "E1 is locked");
    assert!(!device
        .store()
        .exists(EntityKind::Event, &id("E1"))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_unreachable_store_is_answered_with_code_2() {
    let network = MemoryNetwork::new();
    let peer = ScriptedPeer::listen(
        &network,
        &address(),
        vec![
            Step::Send(event_frame(&event_graph("E1").build())),
            Step::Expect,
            Step::Linger,
        ],
    )
    .await;

    let device = Device::new(
        FlakyStore::new(MemoryStore::new()),
        DeviceConfig {
            transfer: config(),
            ..DeviceConfig::default()
        },
    );
    device.store().set_unavailable(true);
    let mut session = device.session(network.connector());
    let err = session.receive(&address(), None).await.unwrap_err();
    assert!(err.is_store_fatal(), "{}", err);
    assert_eq!(session.status().phase, TransferPhase::Failed);

    let log = peer.finish().await.unwrap();
    assert_eq!(response(&log.received[0]).code, ResponseCode::Failed);
    assert_eq!(log.closed, Some(CLOSE_NORMAL));
}

#[tokio::test]
async fn test_receiver_reports_lost_connection() {
    let network = MemoryNetwork::new();
    let peer = ScriptedPeer::listen(&network, &address(), vec![Step::Abort]).await;

    let device = device();
    let mut session = device.session(network.connector());
    let err = session.receive(&address(), None).await.unwrap_err();
    assert!(matches!(err, TransferError::ConnectionLost(_)), "{}", err);
    assert_eq!(err.to_string(), "connection lost");
    peer.finish().await.unwrap();
}

#[tokio::test]
async fn test_goodbye_then_teardown_is_not_an_error() {
    let network = MemoryNetwork::new();
    let peer = ScriptedPeer::listen(
        &network,
        &address(),
        vec![Step::Message(Message::goodbye("bye")), Step::Abort],
    )
    .await;

    let device = device();
    let report = device
        .session(network.connector())
        .receive(&address(), None)
        .await
        .unwrap();
    assert!(report.goodbye);
    peer.finish().await.unwrap();
}

#[tokio::test]
async fn test_cancel_while_awaiting_peer() {
    let network = MemoryNetwork::new();
    let peer = ScriptedPeer::listen(&network, &address(), vec![Step::Linger]).await;

    let device = device();
    let mut session = device.session(network.connector());
    let cancel = session.cancel_handle();
    let mut status = session.subscribe();
    let canceller = tokio::spawn(async move {
        let _ = status
            .wait_for(|s| s.phase == TransferPhase::AwaitingPeer)
            .await;
        cancel.cancel();
    });

    let err = session.receive(&address(), None).await.unwrap_err();
    assert!(matches!(err, TransferError::Cancelled));
    assert_eq!(session.channel_state(), Some(ChannelState::Closed));
    canceller.await.unwrap();

    let log = peer.finish().await.unwrap();
    assert_eq!(log.closed, Some(CLOSE_NORMAL));
}

#[tokio::test]
async fn test_unresponsive_peer_fails_pairing() {
    let network = MemoryNetwork::new();
    // Listening but never accepting
    let _listener = network.listen(&address()).await;

    let device = Device::new(
        MemoryStore::new(),
        DeviceConfig {
            transfer: config().with_liveness_timeout(Duration::from_millis(100)),
            ..DeviceConfig::default()
        },
    );
    let mut session = device.session(network.connector());
    let err = session.receive(&address(), None).await.unwrap_err();
    assert!(
        matches!(err, TransferError::Sync(SyncError::LivenessTimeout(_))),
        "{}",
        err
    );
    assert_eq!(session.status().phase, TransferPhase::Failed);
}

#[tokio::test]
async fn test_nobody_listening_fails_pairing() {
    let network = MemoryNetwork::new();
    let device = device();
    let session = device.session(network.connector());
    assert!(session.probe(&address()).await.is_err());

    let _peer = ScriptedPeer::listen(&network, &address(), vec![]).await;
    session.probe(&address()).await.unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Sending
// ─────────────────────────────────────────────────────────────────────────────

fn exportable() -> EventGraph {
    event_graph("E1")
        .point("P1", 1.0, 2.0)
        .picture("P1", "aW1n")
        .team("T1")
        .equipment("EQ1", &[("C1", 1.0, 1.0)])
        .action("A1", "T1", "EQ1")
        .build()
}

#[tokio::test]
async fn test_legacy_fini_completes_the_export() {
    let network = MemoryNetwork::new();
    let peer = ScriptedPeer::listen(
        &network,
        &address(),
        vec![Step::Expect, Step::Send("fini".into())],
    )
    .await;

    let device = seeded_with(exportable()).await;
    let mut session = device.session(network.connector());
    let report = session.send_event(&address(), &id("E1")).await.unwrap();
    assert_eq!(report.message, "transfer complete");
    assert!(report.deleted);
    assert_eq!(session.status().phase, TransferPhase::Completed);
    for kind in EntityKind::ALL {
        if kind == EntityKind::EquipmentType {
            continue;
        }
        assert_eq!(device.store().count(kind).await.unwrap(), 0, "{}", kind);
    }

    let log = peer.finish().await.unwrap();
    let sent = match classify(&log.received[0]) {
        Ok(Inbound::Message(message)) => message,
        other => panic!("expected an event message, got {:?}", other),
    };
    let graphs = sent.graphs().unwrap().unwrap();
    assert_eq!(graphs.len(), 1);
    assert_eq!(graphs[0].id, id("E1"));
    assert_eq!(graphs[0].points.len(), 2);
    assert_eq!(report.entities, graphs[0].entity_count());
}

#[tokio::test]
async fn test_only_code_3_deletes_the_exported_event() {
    let cases = [
        (ResponseCode::Imported, true),
        (ResponseCode::Refused, false),
        (ResponseCode::Failed, false),
    ];
    for (code, deleted) in cases {
        let network = MemoryNetwork::new();
        let peer = ScriptedPeer::listen(
            &network,
            &address(),
            vec![
                Step::Expect,
                Step::Respond(Response::new(code, "peer says so")),
            ],
        )
        .await;

        let device = seeded_with(exportable()).await;
        let result = device
            .session(network.connector())
            .send_event(&address(), &id("E1"))
            .await;
        match code {
            ResponseCode::Imported => assert!(result.unwrap().deleted),
            ResponseCode::Refused => {
                assert!(matches!(result, Err(TransferError::Refused(m)) if m == "peer says so"))
            }
            ResponseCode::Failed => {
                assert!(matches!(result, Err(TransferError::PeerFailed(m)) if m == "peer says so"))
            }
        }
        let exists = device
            .store()
            .exists(EntityKind::Event, &id("E1"))
            .await
            .unwrap();
        assert_eq!(exists, !deleted, "{:?}", code);
        peer.finish().await.unwrap();
    }
}

#[tokio::test]
async fn test_export_keeps_event_when_configured() {
    let network = MemoryNetwork::new();
    let peer = ScriptedPeer::listen(
        &network,
        &address(),
        vec![Step::Expect, Step::Respond(Response::imported("ok"))],
    )
    .await;

    let device = Device::new(
        MemoryStore::new(),
        DeviceConfig {
            transfer: config().with_delete_after_export(false),
            ..DeviceConfig::default()
        },
    );
    device.import_graphs(&[exportable()]).await.unwrap();
    let report = device
        .session(network.connector())
        .send_event(&address(), &id("E1"))
        .await
        .unwrap();
    assert!(!report.deleted);
    assert!(device
        .store()
        .exists(EntityKind::Event, &id("E1"))
        .await
        .unwrap());
    peer.finish().await.unwrap();
}

#[tokio::test]
async fn test_response_timeout_fails_and_closes_the_channel() {
    let network = MemoryNetwork::new();
    let peer = ScriptedPeer::listen(&network, &address(), vec![Step::Expect, Step::Linger]).await;

    let device = Device::new(
        MemoryStore::new(),
        DeviceConfig {
            transfer: config().with_response_timeout(Duration::from_millis(100)),
            ..DeviceConfig::default()
        },
    );
    device.import_graphs(&[exportable()]).await.unwrap();
    let mut session = device.session(network.connector());
    let err = session.send_event(&address(), &id("E1")).await.unwrap_err();
    assert!(matches!(err, TransferError::ResponseTimeout(_)));
    assert_eq!(err.to_string(), "no response within 100ms");

    let status = session.status();
    assert_eq!(status.phase, TransferPhase::Failed);
    assert!(status.line.starts_with("no response within"), "{}", status.line);
    assert_eq!(session.channel_state(), Some(ChannelState::Closed));
    assert!(device
        .store()
        .exists(EntityKind::Event, &id("E1"))
        .await
        .unwrap());

    let log = peer.finish().await.unwrap();
    assert_eq!(log.closed, Some(CLOSE_NORMAL));
}

#[tokio::test]
async fn test_goodbye_before_response_is_distinct_from_success() {
    let network = MemoryNetwork::new();
    let peer = ScriptedPeer::listen(
        &network,
        &address(),
        vec![Step::Expect, Step::Message(Message::goodbye("closing"))],
    )
    .await;

    let device = seeded_with(exportable()).await;
    let err = device
        .session(network.connector())
        .send_event(&address(), &id("E1"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::PeerClosed));
    assert_eq!(err.to_string(), "peer closed without responding");
    assert!(device
        .store()
        .exists(EntityKind::Event, &id("E1"))
        .await
        .unwrap());
    peer.finish().await.unwrap();
}

#[tokio::test]
async fn test_server_stopping_mid_export_is_a_lost_connection() {
    let network = MemoryNetwork::new();
    let peer = ScriptedPeer::listen(
        &network,
        &address(),
        vec![Step::Expect, Step::Close(CLOSE_GOING_AWAY)],
    )
    .await;

    let device = seeded_with(exportable()).await;
    let err = device
        .session(network.connector())
        .send_event(&address(), &id("E1"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "connection lost: server stopped");
    peer.finish().await.unwrap();
}

#[tokio::test]
async fn test_sending_unknown_event_fails_before_transmitting() {
    let network = MemoryNetwork::new();
    let peer = ScriptedPeer::listen(&network, &address(), vec![Step::Linger]).await;

    let device = device();
    let err = device
        .session(network.connector())
        .send_event(&address(), &id("nope"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::EventNotFound(_)));

    let log = peer.finish().await.unwrap();
    assert!(log.received.is_empty());
}

#[tokio::test]
async fn test_session_is_reusable_after_a_transfer() {
    let network = MemoryNetwork::new();
    let device = seeded_with(exportable()).await;
    let mut session = device.session(network.connector());

    let peer = ScriptedPeer::listen(
        &network,
        &address(),
        vec![Step::Expect, Step::Respond(Response::refused("busy"))],
    )
    .await;
    assert!(session.send_event(&address(), &id("E1")).await.is_err());
    peer.finish().await.unwrap();

    let peer = ScriptedPeer::listen(
        &network,
        &address(),
        vec![Step::Expect, Step::Respond(Response::imported("ok"))],
    )
    .await;
    let report = session.send_event(&address(), &id("E1")).await.unwrap();
    assert!(report.deleted);
    peer.finish().await.unwrap();
}

#[tokio::test]
async fn test_import_during_export_is_not_deleted() {
    let network = MemoryNetwork::new();
    let peer = ScriptedPeer::listen(
        &network,
        &address(),
        vec![
            Step::Expect,
            Step::Sleep(Duration::from_millis(300)),
            Step::Respond(Response::imported("1 event(s) imported.")),
        ],
    )
    .await;
    let device = seeded_with(exportable()).await;
    let mut session = device.session(network.connector());

    let (addr, e1) = (address(), id("E1"));
    let send = session.send_event(&addr, &e1);
    let reimport = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        device.import_graphs(&[exportable()]).await.unwrap()
    };
    let (sent, reimported) = tokio::join!(send, reimport);

    // The import waited for the deletion, so it recreated the event
    assert!(sent.unwrap().deleted);
    assert_eq!(reimported.events.inserted, 1);
    assert!(device
        .store()
        .exists(EntityKind::Event, &id("E1"))
        .await
        .unwrap());
    peer.finish().await.unwrap();
}
