use agent_hub::HubError;
use agent_hub::config::{HubConfig, OverflowPolicy};
use tempfile::TempDir;

#[test]
fn test_default_config() {
    let config = HubConfig::default();

    assert_eq!(config.scheduler.max_pending, 5);
    assert_eq!(config.scheduler.retained_terminal, 10);
    assert_eq!(config.scheduler.tick_interval_ms, 100);
    assert!(!config.scheduler.validate_params);
    assert_eq!(config.scheduler.shutdown_grace_ms, 2000);

    assert_eq!(config.bus.inbox_capacity, 256);
    assert_eq!(config.bus.overflow, OverflowPolicy::Reject);

    assert_eq!(config.reporting.collaborator, "master");
    assert_eq!(config.reporting.message_type, "task_completed");
    assert!(config.reporting.report_failures);
    assert_eq!(config.reporting.send_timeout_ms, 500);
}

#[tokio::test]
async fn test_missing_file_yields_defaults() {
    let dir = TempDir::new().unwrap();
    let config = HubConfig::load(&dir.path().join("absent.toml")).await.unwrap();

    assert_eq!(config.scheduler.max_pending, 5);
}

#[tokio::test]
async fn test_save_then_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("agent-hub.toml");

    let mut config = HubConfig::default();
    config.scheduler.max_pending = 8;
    config.bus.overflow = OverflowPolicy::Block;
    config.reporting.collaborator = "orchestrator".into();
    config.save(&path).await.unwrap();

    let loaded = HubConfig::load(&path).await.unwrap();
    assert_eq!(loaded.scheduler.max_pending, 8);
    assert_eq!(loaded.bus.overflow, OverflowPolicy::Block);
    assert_eq!(loaded.reporting.collaborator, "orchestrator");
    assert_eq!(loaded.scheduler.retained_terminal, 10);
}

#[tokio::test]
async fn test_load_rejects_invalid_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("agent-hub.toml");
    std::fs::write(
        &path,
        r#"
[scheduler]
max_pending = 0
tick_interval_ms = 0
"#,
    )
    .unwrap();

    match HubConfig::load(&path).await {
        Err(HubError::Config(msg)) => {
            assert!(msg.contains("max_pending"));
            assert!(msg.contains("tick_interval_ms"));
        }
        other => panic!("Expected config error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_load_rejects_malformed_toml() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("agent-hub.toml");
    std::fs::write(&path, "[scheduler\nmax_pending = 3").unwrap();

    assert!(matches!(
        HubConfig::load(&path).await,
        Err(HubError::Toml(_))
    ));
}

#[tokio::test]
async fn test_save_refuses_invalid_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("agent-hub.toml");

    let mut config = HubConfig::default();
    config.reporting.message_type = "  ".into();

    assert!(config.save(&path).await.is_err());
    assert!(!path.exists());
}

#[test]
fn test_to_toml_contains_sections() {
    let toml = HubConfig::default().to_toml().unwrap();

    assert!(toml.contains("[scheduler]"));
    assert!(toml.contains("[bus]"));
    assert!(toml.contains("overflow = \"reject\""));
    assert!(toml.contains("[reporting]"));
}
