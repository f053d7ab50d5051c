use std::sync::Arc;

use flowsheet_client::{ChatResponse, ClientConfig, ClientError, FlowsheetSession, MemoryBackend};
use flowsheet_graph::{ParamValue, Position, UnitType};
use serde_json::json;

fn memory_session() -> (Arc<MemoryBackend>, FlowsheetSession) {
    let backend = Arc::new(MemoryBackend::new());
    let mut config = ClientConfig::in_memory();
    config.sync.debounce_ms = 5;
    let session = FlowsheetSession::with_backend(backend.clone(), &config);
    (backend, session)
}

fn scripted(body: serde_json::Value) -> ChatResponse {
    serde_json::from_value(body).unwrap()
}

#[tokio::test]
async fn test_message_validation() {
    let (backend, mut session) = memory_session();

    let err = session.send_message("   ", None).await.unwrap_err();
    assert!(matches!(err, ClientError::Validation(_)));

    let long = "x".repeat(5001);
    let err = session.send_message(&long, None).await.unwrap_err();
    assert!(matches!(err, ClientError::Validation(_)));
    assert!(backend.last_chat().is_none());

    let exact = "y".repeat(5000);
    session.send_message(&exact, None).await.unwrap();
    assert_eq!(backend.last_chat().unwrap().message, exact);
}

#[tokio::test]
async fn test_text_reply_leaves_graph_alone() {
    let (backend, mut session) = memory_session();
    let id = session.create("Chat", "").await.unwrap();
    let history_len = session.history().len();

    let outcome = session.send_message("  What is a flash drum?  ", None).await.unwrap();
    assert!(outcome.text.contains("What is a flash drum?"));
    assert!(!outcome.report.changed());
    assert_eq!(session.history().len(), history_len);

    let request = backend.last_chat().unwrap();
    assert_eq!(request.message, "What is a flash drum?");
    assert_eq!(request.flowsheet_id.as_deref(), Some(id.as_str()));
    assert!(request.context.is_some());
}

#[tokio::test]
async fn test_partial_update_reports_failures_as_text() {
    let (backend, mut session) = memory_session();
    let id = session.create("Methanol", "").await.unwrap();
    let history_len = session.history().len();

    backend.script_reply(scripted(json!({
        "message": "I've created a methanol synthesis flowsheet.",
        "action": "create_flowsheet",
        "flowsheet_update": {
            "units": [
                {
                    "id": "reactor_1",
                    "type": "Reactor",
                    "name": "Methanol Reactor",
                    "position": {"x": 300, "y": 200},
                    "parameters": {"temperature": 523, "pressure": 50}
                },
                {
                    "id": "column_1",
                    "type": "DistillationColumn",
                    "name": "Methanol Column",
                    "position": {"x": 500, "y": 200},
                    "inlet_ports": ["feed"],
                    "outlet_ports": ["distillate", "bottoms"]
                }
            ],
            "streams": [
                {"id": "S1", "name": "Syngas feed"},
                {"id": "S2", "name": "Crude methanol", "temperature": 350}
            ],
            "connections": [
                {"from_unit": "Feed", "to_unit": "reactor_1", "stream_id": "S1"},
                {
                    "from_unit": "reactor_1",
                    "from_port": "out1",
                    "to_unit": "column_1",
                    "to_port": "feed",
                    "stream_id": "S2"
                }
            ]
        }
    })));

    let outcome = session
        .send_message("Create a methanol synthesis flowsheet", None)
        .await
        .unwrap();

    assert_eq!(outcome.report.applied.len(), 3);
    assert_eq!(outcome.report.failures.len(), 1);
    assert!(outcome.report.failures[0].error.is_not_found());
    assert!(outcome.text.starts_with("I've created a methanol synthesis flowsheet."));
    assert!(outcome.text.contains("Feed"));
    assert_eq!(session.history().len(), history_len + 1);

    let graph = session.graph();
    assert_eq!(graph.node_count(), 2);
    assert_eq!(graph.edge_count(), 1);
    let reactor = graph.get_node("reactor_1").unwrap();
    assert_eq!(reactor.name, "Methanol Reactor");
    assert_eq!(reactor.position, Position::new(300.0, 200.0));
    assert_eq!(reactor.parameters.get("temperature"), Some(&ParamValue::Number(523.0)));
    let column = graph.get_node("column_1").unwrap();
    assert_eq!(column.inlet_ports, vec!["feed"]);

    let edge = graph.find_edge_between("reactor_1", "column_1").unwrap();
    assert_eq!(edge.target_port, "feed");
    assert_eq!(graph.get_stream(&edge.stream_id).unwrap().name, "Crude methanol");

    session.flush().await.unwrap();
    let stored = backend.stored(&id).unwrap();
    assert_eq!(stored.units.len(), 2);
    assert_eq!(stored.connections.len(), 1);

    // one undo reverts the whole assistant batch
    assert!(session.undo());
    assert!(session.graph().is_empty());
}

#[tokio::test]
async fn test_update_removes_units_missing_from_reply() {
    let (backend, mut session) = memory_session();
    session.create("Trim", "").await.unwrap();
    let reactor = session.add_node(UnitType::Reactor, Position::default());
    let heater = session.add_node(UnitType::Heater, Position::default());
    let pump = session.add_node(UnitType::Pump, Position::default());
    session.add_edge(&reactor.id, "out1", &heater.id, "in1").unwrap();
    session.add_edge(&heater.id, "out1", &pump.id, "in1").unwrap();

    backend.script_reply(scripted(json!({
        "message": "Removed the pump.",
        "action": "update_flowsheet",
        "flowsheet_update": {
            "units": [
                {"id": reactor.id, "type": "Reactor"},
                {"id": heater.id, "type": "Heater", "parameters": {"outlet_temperature": 180}}
            ]
        }
    })));

    let outcome = session.send_message("Drop the pump", None).await.unwrap();
    assert!(outcome.report.is_clean());

    let graph = session.graph();
    assert!(graph.get_node(&pump.id).is_none());
    assert_eq!(graph.edge_count(), 1);
    assert!(graph.find_edge_between(&reactor.id, &heater.id).is_some());
    assert_eq!(
        graph.get_node(&heater.id).unwrap().parameters.get("outlet_temperature"),
        Some(&ParamValue::Number(180.0))
    );
    assert!(graph.validate().is_empty());
}

#[tokio::test]
async fn test_create_unit_action() {
    let (backend, mut session) = memory_session();
    session.create("Actions", "").await.unwrap();

    backend.script_reply(scripted(json!({
        "response": "Added a compressor.",
        "actions": [
            {"type": "create_unit", "unit_type": "Compressor", "position": {"x": 120, "y": 60}},
            {"type": "optimize_parameters", "target": "energy"}
        ]
    })));

    let outcome = session.send_message("Add a compressor", None).await.unwrap();
    assert_eq!(outcome.report.applied.len(), 1);
    assert_eq!(outcome.notes, vec!["Unsupported assistant action: optimize_parameters"]);
    assert!(outcome.text.contains("optimize_parameters"));

    let node = session.graph().nodes().next().unwrap();
    assert_eq!(node.unit_type, UnitType::Compressor);
    assert_eq!(node.name, "Compressor (AI)");
    assert_eq!(node.position, Position::new(120.0, 60.0));
    assert_eq!(node.parameters.get("efficiency"), Some(&ParamValue::Number(0.8)));
}

#[tokio::test]
async fn test_backend_error_is_returned() {
    let (backend, mut session) = memory_session();
    backend.script_error(500, "LLM service unavailable");

    let err = session.send_message("Hello", None).await.unwrap_err();
    assert!(matches!(err, ClientError::Api { status: 500, .. }));
    assert!(session.graph().is_empty());
}
