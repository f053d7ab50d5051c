use std::io::Write;

use flowsheet_client::{BackendFactory, ClientConfig, FlowsheetSession};

#[test]
fn test_defaults() {
    let config = ClientConfig::default();
    assert_eq!(config.backend.kind, "http");
    assert_eq!(config.backend.base_url, "http://localhost:8000");
    assert_eq!(config.sync.debounce_ms, 300);
    assert_eq!(config.assistant.max_message_len, 5000);
    assert_eq!(config.history.max_snapshots, None);
    assert!(config.validate().is_ok());
}

#[test]
fn test_partial_toml_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[backend]
kind = "memory"

[sync]
debounce_ms = 25

[history]
max_snapshots = 50
"#
    )
    .unwrap();

    let config = ClientConfig::from_file(file.path()).unwrap();
    assert_eq!(config.backend.kind, "memory");
    assert_eq!(config.backend.timeout_secs, 30);
    assert_eq!(config.sync.debounce_ms, 25);
    assert_eq!(config.history.max_snapshots, Some(50));
    assert!(config.validate().is_ok());
}

#[test]
fn test_validation_rejections() {
    let mut config = ClientConfig::default();
    config.backend.base_url = "  ".to_string();
    assert!(config.validate().is_err());

    let mut config = ClientConfig::default();
    config.backend.kind = "grpc".to_string();
    assert!(config.validate().is_err());
    assert!(BackendFactory::create(&config).is_err());

    let mut config = ClientConfig::in_memory();
    config.backend.timeout_secs = 0;
    assert!(config.validate().is_err());

    let mut config = ClientConfig::in_memory();
    config.assistant.max_message_len = 0;
    assert!(config.validate().is_err());
    assert!(FlowsheetSession::new(config).is_err());

    let mut config = ClientConfig::in_memory();
    config.history.max_snapshots = Some(0);
    assert!(config.validate().is_err());
}

#[test]
fn test_load_from_env_json() {
    std::env::set_var(
        "FLOWSHEET_CONFIG",
        r#"{"backend": {"kind": "memory"}, "assistant": {"max_message_len": 200}}"#,
    );
    let config = ClientConfig::load().unwrap();
    std::env::remove_var("FLOWSHEET_CONFIG");

    assert_eq!(config.backend.kind, "memory");
    assert_eq!(config.assistant.max_message_len, 200);
    assert_eq!(config.sync.debounce_ms, 300);
}

#[test]
fn test_in_memory_session_builds_without_runtime() {
    let session = FlowsheetSession::new(ClientConfig::in_memory()).unwrap();
    assert!(session.flowsheet_id().is_none());
    assert!(session.graph().is_empty());
}
