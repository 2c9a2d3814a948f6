#![cfg(feature = "peer")]

use std::path::PathBuf;
use std::time::Duration;

use thingwire::peer::{Client, ClientConfig, PeerError, StatusCode};
use thingwire::transport::MemoryTransport;

fn temp_config(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "thingwire-{}-{}.json",
        name,
        std::process::id()
    ));
    std::fs::write(&path, contents).expect("write temp config");
    path
}

#[test]
fn loads_file_with_defaults_for_missing_keys() {
    let path = temp_config(
        "device",
        r#"{
            "host": "iot.example.com",
            "port": 8443,
            "app_key": "k-123",
            "gateway_name": "edge-gw",
            "ping_rate_ms": 30000,
            "duty_cycle": 40,
            "duty_cycle_period_ms": 60000
        }"#,
    );
    let config = ClientConfig::from_json_file(&path).expect("load config");
    let _ = std::fs::remove_file(&path);

    assert_eq!(config.host, "iot.example.com");
    assert_eq!(config.port, 8443);
    assert_eq!(config.gateway_name.as_deref(), Some("edge-gw"));
    assert_eq!(config.ping_rate, Duration::from_secs(30));
    assert_eq!(config.duty_cycle_period, Duration::from_secs(60));
    assert_eq!(config.chunk_size, ClientConfig::default().chunk_size);
    assert_eq!(config.message_timeout, ClientConfig::default().message_timeout);
}

#[test]
fn missing_file_is_an_io_error() {
    let path = std::env::temp_dir().join("thingwire-does-not-exist.json");
    let err = ClientConfig::from_json_file(&path).expect_err("missing file");
    assert!(matches!(err, PeerError::Io(_)));
}

#[test]
fn rejects_out_of_range_values() {
    let cases = [
        r#"{"host": ""}"#,
        r#"{"port": 0}"#,
        r#"{"chunk_size": 16}"#,
        r#"{"chunk_size": 70000, "max_message_size": 100000}"#,
        r#"{"chunk_size": 4096, "max_message_size": 1024}"#,
        r#"{"duty_cycle": 101}"#,
    ];
    for json in cases {
        let err = ClientConfig::from_json_str(json).expect_err(json);
        assert!(matches!(err, PeerError::InvalidConfig(_)), "{json}: {err}");
        assert_eq!(err.status(), StatusCode::BadRequest);
    }
}

#[test]
fn malformed_json_is_reported() {
    let err = ClientConfig::from_json_str("{ not json").expect_err("malformed");
    assert!(matches!(err, PeerError::Json(_)));
}

#[test]
fn client_rejects_invalid_config() {
    let (transport, _peer) = MemoryTransport::pair();
    let config = ClientConfig {
        chunk_size: 0,
        ..ClientConfig::new("localhost", 80, "key")
    };
    let err = Client::new(config, transport).expect_err("invalid chunk size");
    assert!(matches!(err, PeerError::InvalidConfig(_)));
}

#[test]
fn debug_output_hides_app_key() {
    let config = ClientConfig::new("localhost", 80, "super-secret-key");
    let rendered = format!("{config:?}");
    assert!(!rendered.contains("super-secret-key"));
}
