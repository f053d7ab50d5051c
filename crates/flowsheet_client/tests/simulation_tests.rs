use std::sync::Arc;

use flowsheet_client::{
    ClientConfig, ClientError, FlowsheetSession, MemoryBackend, RunState, SimulationStatus,
};
use flowsheet_graph::{Position, UnitType};

fn memory_session() -> (Arc<MemoryBackend>, FlowsheetSession) {
    let backend = Arc::new(MemoryBackend::new());
    let mut config = ClientConfig::in_memory();
    config.sync.debounce_ms = 5;
    let session = FlowsheetSession::with_backend(backend.clone(), &config);
    (backend, session)
}

#[tokio::test]
async fn test_trigger_without_flowsheet() {
    let (backend, mut session) = memory_session();
    session.add_node(UnitType::Reactor, Position::default());

    let err = session.run_simulation().await.unwrap_err();
    assert!(matches!(err, ClientError::NoFlowsheet));
    assert_eq!(session.simulation_state(), RunState::Idle);
    assert!(session.latest_result().is_none());
    assert_eq!(backend.simulate_calls(), 0);
}

#[tokio::test]
async fn test_second_trigger_while_running_is_rejected() {
    let (backend, mut session) = memory_session();
    let id = session.create("Busy", "").await.unwrap();
    session.add_node(UnitType::Reactor, Position::default());
    session.flush().await.unwrap();
    backend.hold_simulations();

    let orchestrator = session.simulation().clone();
    let first = tokio::spawn(async move { orchestrator.trigger().await });
    while !session.simulation().is_running(&id) {
        tokio::task::yield_now().await;
    }
    assert_eq!(session.simulation_state(), RunState::Running);
    assert_eq!(
        session.latest_result().map(|r| r.status),
        Some(SimulationStatus::Running)
    );

    let second = session.run_simulation().await.unwrap_err();
    assert!(matches!(second, ClientError::AlreadyRunning(ref running) if running == &id));

    backend.release_simulation();
    let first = first.await.unwrap().unwrap();
    assert!(first.is_completed());
    assert_eq!(session.simulation_state(), RunState::Completed);

    backend.release_simulation();
    let third = session.run_simulation().await.unwrap();
    assert!(third.is_completed());
    assert_eq!(backend.simulate_calls(), 2);
}

#[tokio::test]
async fn test_completed_run_fills_stream_results() {
    let (_backend, mut session) = memory_session();
    session.create("Reactor train", "").await.unwrap();
    let reactor = session.add_node(UnitType::Reactor, Position::default());
    let column = session.add_node(UnitType::DistillationColumn, Position::default());
    let edge = session.add_edge(&reactor.id, "out1", &column.id, "in1").unwrap();
    let history_len = session.history().len();

    let result = session.run_simulation().await.unwrap();
    assert_eq!(result.unit_results[&reactor.id]["heat_duty"], 1250.5);
    assert_eq!(result.unit_results[&column.id]["distillate_purity"], 0.95);
    assert!(result.stream_results.contains_key(&edge.stream_id));
    assert!(result.convergence.is_some());

    let stream = session.graph().get_stream(&edge.stream_id).unwrap();
    assert!(stream.has_results());
    assert_eq!(stream.composition.get("component_1"), Some(&0.6));
    assert!(stream.properties.contains_key("enthalpy"));
    assert_eq!(session.history().len(), history_len);

    session.simulation().acknowledge();
    assert_eq!(session.simulation_state(), RunState::Idle);
    assert!(session.latest_result().unwrap().is_completed());
}

#[tokio::test]
async fn test_engine_failure_leaves_no_numbers() {
    let (backend, mut session) = memory_session();
    session.create("Diverging", "").await.unwrap();
    session.add_node(UnitType::Flash, Position::default());
    backend.fail_next_simulation("Solver did not converge");

    let err = session.run_simulation().await.unwrap_err();
    assert!(matches!(err, ClientError::SimulationFailure(ref message) if message.contains("converge")));
    assert_eq!(session.simulation_state(), RunState::Failed);

    let latest = session.latest_result().unwrap();
    assert_eq!(latest.status, SimulationStatus::Failed);
    assert!(latest.unit_results.is_empty());
    assert!(latest.stream_results.is_empty());
    assert_eq!(latest.error.as_deref(), Some("Solver did not converge"));
}

#[tokio::test]
async fn test_empty_flowsheet_fails_to_simulate() {
    let (_backend, mut session) = memory_session();
    session.create("Empty", "").await.unwrap();

    let err = session.run_simulation().await.unwrap_err();
    assert!(matches!(err, ClientError::SimulationFailure(_)));
    assert_eq!(session.simulation_state(), RunState::Failed);
}

#[tokio::test]
async fn test_unsent_edits_fail_the_run_when_offline() {
    let (backend, mut session) = memory_session();
    session.create("Offline run", "").await.unwrap();
    let reactor = session.add_node(UnitType::Reactor, Position::default());
    let heater = session.add_node(UnitType::Heater, Position::default());
    let edge = session.add_edge(&reactor.id, "out1", &heater.id, "in1").unwrap();
    session.run_simulation().await.unwrap();
    assert!(session.graph().get_stream(&edge.stream_id).unwrap().has_results());

    backend.set_offline(true);
    session.rename_node(&reactor.id, "R-201").unwrap();

    let err = session.run_simulation().await.unwrap_err();
    assert!(err.is_network());
    assert_eq!(backend.simulate_calls(), 1);
    assert_eq!(session.simulation_state(), RunState::Failed);

    let latest = session.latest_result().unwrap();
    assert_eq!(latest.status, SimulationStatus::Failed);
    assert!(latest.unit_results.is_empty());
    assert!(latest.stream_results.is_empty());
    assert!(latest.error.unwrap().contains("backend unreachable"));
    assert!(!session.graph().get_stream(&edge.stream_id).unwrap().has_results());

    // the local edit survives the failed run
    assert_eq!(session.graph().get_node(&reactor.id).unwrap().name, "R-201");
}

#[tokio::test]
async fn test_offline_without_previous_run() {
    let (backend, mut session) = memory_session();
    session.create("Offline start", "").await.unwrap();
    backend.set_offline(true);
    session.add_node(UnitType::Compressor, Position::default());

    let err = session.run_simulation().await.unwrap_err();
    assert!(err.is_network());
    assert_eq!(backend.simulate_calls(), 0);
    assert_eq!(session.simulation_state(), RunState::Failed);
    assert_eq!(
        session.latest_result().map(|r| r.status),
        Some(SimulationStatus::Failed)
    );
}
