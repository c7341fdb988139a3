use common::{
    current_owner,
    init_structured_logging,
    ConfigLoader,
    LoggingConfig,
    OperationTimer,
    StructuredLogEntry,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[test]
fn test_structured_log_entry_roundtrip_flattens_fields() {
    let mut fields = BTreeMap::new();
    fields.insert("resource".to_string(), Value::String("bench-vm-0".to_string()));

    let entry = StructuredLogEntry {
        timestamp: chrono::Utc::now().to_rfc3339(),
        level: "INFO".to_string(),
        target: "lifecycle".to_string(),
        message: "Resource ready".to_string(),
        fields,
        context: None,
    };

    let json: Value = serde_json::to_value(&entry).unwrap();
    assert_eq!(json["resource"], "bench-vm-0");
    assert!(json.get("context").is_none());
}

#[test]
fn test_logging_config_partial_toml() {
    let config: LoggingConfig = ConfigLoader::parse_str(
        "level = \"debug\"\njson_output = true\n",
        Some(common::ConfigFormat::Toml),
    )
    .unwrap();

    assert_eq!(config.level, "debug");
    assert!(config.json_output);
    assert!(config.include_context);
}

#[test]
fn test_init_twice_fails() {
    let first = init_structured_logging(LoggingConfig::default());
    assert!(first.is_ok());
    let second = init_structured_logging(LoggingConfig {
        json_output: true,
        ..LoggingConfig::default()
    });
    assert!(second.is_err());

    let mut timer = OperationTimer::new("after_init");
    timer.add_field("count", 2);
    timer.finish();
}

#[test]
fn test_current_owner_not_empty() {
    assert!(!current_owner().is_empty());
}

#[derive(Debug, Deserialize)]
struct Budget {
    poll_interval_secs: f64,
}

#[tokio::test]
async fn test_load_missing_file_has_context() {
    let loader = ConfigLoader::new("COMMON_IT_");
    let err = loader
        .load::<Budget>(std::path::Path::new("/nonexistent/run.toml"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("/nonexistent/run.toml"));
}

#[tokio::test]
async fn test_load_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("budget.toml");
    std::fs::write(&path, "poll_interval_secs = 2.5\n").unwrap();

    let budget: Budget = ConfigLoader::new("COMMON_IT_").load(&path).await.unwrap();
    assert_eq!(budget.poll_interval_secs, 2.5);
}
