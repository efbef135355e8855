use domain::ProtocolConfig;
use gw_config::{ConfigDefaults, ConfigSource, FileConfigSource, StaticConfigSource};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_path(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    std::env::temp_dir().join(format!("gw-config-{}-{}-{}.json", name, std::process::id(), nanos))
}

fn protocol(id: &str) -> ProtocolConfig {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "protocolType": "modbustcp",
        "collectCycleMs": 500,
    }))
    .expect("protocol")
}

#[tokio::test]
async fn file_source_applies_defaults() {
    let path = temp_path("defaults");
    std::fs::write(
        &path,
        r#"{
            "savedAt": 1700000000000,
            "protocols": [
                {"id": "p1", "protocolType": "modbustcp", "collectCycleMs": 250,
                 "devices": [{"equipmentId": "m1", "points": [
                    {"label": "v", "address": "40001", "dataType": "int16"}
                 ]}]},
                {"id": "p2", "protocolType": "modbusrtu"}
            ]
        }"#,
    )
    .expect("write");

    let defaults = ConfigDefaults {
        collect_cycle_ms: 2000,
        connect_timeout_ms: 1500,
        receive_timeout_ms: 800,
    };
    let source = FileConfigSource::new(&path, defaults);
    let snapshot = source.latest().await.expect("latest").expect("snapshot");
    assert_eq!(snapshot.saved_at, 1_700_000_000_000);
    assert_eq!(snapshot.protocols.len(), 2);

    let p1 = snapshot.find("p1").expect("p1");
    assert_eq!(p1.collect_cycle_ms, 250);
    assert_eq!(p1.receive_timeout_ms, 800);
    assert_eq!(p1.total_points(), 1);
    let p2 = snapshot.find("p2").expect("p2");
    assert_eq!(p2.collect_cycle_ms, 2000);
    assert_eq!(p2.connect_timeout_ms, 1500);
    assert!(snapshot.find("p3").is_none());

    assert!(!source.has_changed(1_700_000_000_000).await.expect("changed"));
    assert!(source.has_changed(1).await.expect("changed"));
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn file_source_without_saved_at_uses_mtime() {
    let path = temp_path("mtime");
    std::fs::write(&path, r#"{"protocols": []}"#).expect("write");
    let source = FileConfigSource::new(&path, ConfigDefaults::default());
    let snapshot = source.latest().await.expect("latest").expect("snapshot");
    assert!(snapshot.saved_at > 0);
    assert!(snapshot.protocols.is_empty());
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn missing_file_has_no_config() {
    let source = FileConfigSource::new(temp_path("missing"), ConfigDefaults::default());
    assert!(source.latest().await.expect("latest").is_none());
    assert!(!source.has_changed(0).await.expect("changed"));
}

#[tokio::test]
async fn malformed_file_is_parse_error() {
    let path = temp_path("broken");
    std::fs::write(&path, "{not json").expect("write");
    let source = FileConfigSource::new(&path, ConfigDefaults::default());
    let err = source.latest().await.expect_err("parse error");
    assert!(matches!(err, gw_config::ConfigError::Parse(_)));
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn static_source_versions_increase() {
    let source = StaticConfigSource::new(vec![protocol("a")]);
    let first = source.latest().await.expect("latest").expect("snapshot");
    assert!(first.find("a").is_some());

    let second = source.replace(vec![protocol("b")]);
    assert!(second > first.saved_at);
    assert!(source.has_changed(first.saved_at).await.expect("changed"));
    assert!(!source.has_changed(second).await.expect("changed"));

    source.clear();
    assert!(source.latest().await.expect("latest").is_none());
}
