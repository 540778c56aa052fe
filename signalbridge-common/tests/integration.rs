//! Integration tests for signalbridge-common library.

use std::io::Write;

use signalbridge_common::{BaseConfig, Event, LogFormat, load_config};

#[test]
fn test_load_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    write!(
        file,
        r#"{{
            // comments are allowed in JSON5
            webhook: {{ base_url: "http://172.30.1.29:80", timeout_ms: 3000 }},
            logging: {{ level: "warn", format: "json" }},
        }}"#
    )
    .expect("write config");

    let config: BaseConfig = load_config(file.path()).expect("load failed");

    assert_eq!(config.webhook.base_url, "http://172.30.1.29:80");
    assert_eq!(config.webhook.timeout_ms, 3000);
    assert_eq!(config.logging.level, "warn");
    assert_eq!(config.logging.format, LogFormat::Json);
}

#[test]
fn test_event_to_webhook_request() {
    let config = BaseConfig::default();
    let event = Event::new(
        "robotarm_sensor_check",
        true,
        "/api/v1/plc/robotarm_sensor_check",
    );

    let url = config
        .webhook
        .resolve_url(&event.destination_path)
        .expect("url");
    let body = serde_json::to_string(&event.payload()).expect("encode");

    assert_eq!(url, "http://127.0.0.1:80/api/v1/plc/robotarm_sensor_check");
    assert_eq!(body, r#"{"event":"robotarm_sensor_check","value":true}"#);
}

#[test]
fn test_event_serde_roundtrip_keeps_all_fields() {
    let event = Event::new("arm_img", serde_json::json!({ "file": "a.png" }), "/api/v1/arm/arm_img")
        .with_timestamp(1_700_000_000_000);

    let json = serde_json::to_string(&event).expect("encode");
    let decoded: Event = serde_json::from_str(&json).expect("decode");

    assert_eq!(decoded, event);
}
