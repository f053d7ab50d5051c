use std::sync::Arc;
use std::time::Duration;

use flowsheet_client::{ClientConfig, FlowsheetSession, MemoryBackend, SyncEvent};
use flowsheet_graph::{Position, UnitType};

fn memory_session(debounce_ms: u64) -> (Arc<MemoryBackend>, FlowsheetSession) {
    let backend = Arc::new(MemoryBackend::new());
    let mut config = ClientConfig::in_memory();
    config.sync.debounce_ms = debounce_ms;
    let session = FlowsheetSession::with_backend(backend.clone(), &config);
    (backend, session)
}

#[tokio::test]
async fn test_rapid_commits_collapse_into_one_push() {
    let (backend, mut session) = memory_session(50);
    let id = session.create("Burst", "").await.unwrap();

    let pump = session.add_node(UnitType::Pump, Position::default());
    for i in 0..10 {
        session.rename_node(&pump.id, &format!("P-{}", i)).unwrap();
    }
    assert!(session.sync_status().in_flight);

    let (first, second) = futures::join!(session.flush(), session.flush());
    first.unwrap();
    second.unwrap();

    assert_eq!(backend.update_calls(), 1);
    let stored = backend.stored(&id).unwrap();
    assert_eq!(stored.units[0].name, "P-9");
    assert_eq!(session.sync_status().pushes, 1);
}

#[tokio::test]
async fn test_last_state_is_pushed_after_slow_request() {
    let (backend, mut session) = memory_session(5);
    let id = session.create("Slow", "").await.unwrap();
    backend.set_update_delay(Duration::from_millis(40));

    let reactor = session.add_node(UnitType::Reactor, Position::default());
    // let the first push get in flight
    tokio::time::sleep(Duration::from_millis(15)).await;
    let cooler = session.add_node(UnitType::Cooler, Position::default());
    session.add_edge(&reactor.id, "out1", &cooler.id, "in1").unwrap();

    session.flush().await.unwrap();
    let stored = backend.stored(&id).unwrap();
    assert_eq!(stored.units.len(), 2);
    assert_eq!(stored.connections.len(), 1);
    assert_eq!(stored.streams.len(), 1);
    assert!(backend.update_calls() <= 3);
}

#[tokio::test]
async fn test_failed_push_keeps_local_state() {
    let (backend, mut session) = memory_session(5);
    let id = session.create("Offline", "").await.unwrap();
    let events = session.subscribe_sync();

    backend.set_offline(true);
    session.add_node(UnitType::Heater, Position::default());

    let err = session.flush().await.unwrap_err();
    assert!(err.is_network());
    assert_eq!(session.graph().node_count(), 1);
    assert!(session.history().can_undo());

    let status = session.sync_status();
    assert!(status.unsent_failure);
    assert!(status.last_error.is_some());
    assert!(matches!(events.try_recv(), Ok(SyncEvent::Failed { flowsheet_id, .. }) if flowsheet_id == id));

    backend.set_offline(false);
    session.flush().await.unwrap();
    assert_eq!(backend.stored(&id).unwrap().units.len(), 1);

    let status = session.sync_status();
    assert!(!status.unsent_failure);
    assert_eq!(status.last_error, None);
}

#[tokio::test]
async fn test_undo_is_pushed_too() {
    let (backend, mut session) = memory_session(5);
    let id = session.create("Undo", "").await.unwrap();

    session.add_node(UnitType::Valve, Position::default());
    session.flush().await.unwrap();
    assert_eq!(backend.stored(&id).unwrap().units.len(), 1);

    assert!(session.undo());
    session.flush().await.unwrap();
    assert!(backend.stored(&id).unwrap().units.is_empty());
}

#[tokio::test]
async fn test_unbound_session_never_pushes() {
    let (backend, mut session) = memory_session(5);
    session.add_node(UnitType::Mixer, Position::default());
    session.flush().await.unwrap();

    assert_eq!(backend.update_calls(), 0);
    assert_eq!(session.sync_status(), Default::default());
}
