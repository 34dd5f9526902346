use dimse::StorageClass;
use pacsai::config::{Backpressure, Config, ConfigError};
use pacsai::state::StateBackend;
use std::time::Duration;

fn load_config_from_str(toml: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(toml).expect("TOML parse error");
    config.validate()?;
    Ok(config)
}

#[test]
fn test_full_config() {
    let toml = r#"
        [service]
        id = "pacsai-ward-3"
        log_level = "debug"

        [logging]
        log_to_file = true
        log_file_path = "/var/log/pacsai.log"

        [dimse]
        local_aet = "IA_SERVER"
        bind_addr = "0.0.0.0"
        port = 11112
        max_associations = 8

        [destination]
        ae_title = "PACS_INTERNE"
        host = "pacs.hospital.local"
        port = 104
        connect_timeout_ms = 3000

        [pipeline]
        max_concurrent_analyses = 2
        analysis_timeout_ms = 0
        shutdown_grace_ms = 500
        backpressure = "reject"

        [storage]
        backend = "filesystem"
        [storage.options]
        path = "/var/lib/pacsai"

        [state]
        backend = "redb"
        path = "/var/lib/pacsai/state.redb"

        [analyzer]
        confidence_threshold = 0.75
        model_version = "chest-v2"
    "#;

    let config = load_config_from_str(toml).expect("valid config");
    assert_eq!(config.service.id, "pacsai-ward-3");
    assert!(config.logging.log_to_file);
    assert_eq!(config.dimse.local_aet, "IA_SERVER");
    assert_eq!(config.dimse.max_associations, 8);
    assert_eq!(config.destination.descriptor(), "PACS_INTERNE@pacs.hospital.local:104");
    assert_eq!(config.destination.connect_timeout_ms, Some(3000));
    assert_eq!(config.pipeline.backpressure, Backpressure::Reject);
    assert_eq!(config.pipeline.analysis_timeout(), None);
    assert_eq!(config.pipeline.shutdown_grace(), Duration::from_millis(500));
    assert_eq!(config.state.backend, StateBackend::Redb);
    assert_eq!(config.analyzer.confidence_threshold, 0.75);
}

#[test]
fn test_defaults_fill_missing_sections() {
    let config = load_config_from_str("").expect("empty config is valid");
    assert_eq!(config.service.id, "pacsai");
    assert_eq!(config.destination.descriptor(), "PACS_INTERNE@localhost:11111");
    assert_eq!(config.dimse.storage_classes, StorageClass::IMAGE_CLASSES.to_vec());
    assert_eq!(config.pipeline.max_concurrent_analyses, 4);
    assert_eq!(config.pipeline.analysis_timeout(), Some(Duration::from_secs(60)));
    assert_eq!(config.pipeline.backpressure, Backpressure::Wait);
    assert_eq!(config.state.backend, StateBackend::Memory);
    assert_eq!(config.analyzer.confidence_threshold, 0.8);
}

#[test]
fn test_empty_service_id_rejected() {
    let toml = r#"
        [service]
        id = "  "
    "#;
    assert!(matches!(load_config_from_str(toml), Err(ConfigError::InvalidServiceId)));
}

#[test]
fn test_invalid_destination_ae_rejected() {
    let toml = r#"
        [destination]
        ae_title = "THIS_AE_TITLE_IS_TOO_LONG"
        host = "pacs"
        port = 104
    "#;
    assert!(matches!(
        load_config_from_str(toml),
        Err(ConfigError::InvalidSection { section: "destination", .. })
    ));
}

#[test]
fn test_redb_without_path_rejected() {
    let toml = r#"
        [state]
        backend = "redb"
    "#;
    assert!(matches!(
        load_config_from_str(toml),
        Err(ConfigError::InvalidSection { section: "state", .. })
    ));
}

#[test]
fn test_threshold_outside_unit_interval_rejected() {
    let toml = r#"
        [analyzer]
        confidence_threshold = 1.5
    "#;
    assert!(matches!(
        load_config_from_str(toml),
        Err(ConfigError::InvalidSection { section: "analyzer", .. })
    ));
}

#[test]
fn test_unknown_storage_backend_rejected() {
    let toml = r#"
        [storage]
        backend = "s3"
    "#;
    assert!(matches!(
        load_config_from_str(toml),
        Err(ConfigError::InvalidSection { section: "storage", .. })
    ));
}

#[test]
fn test_from_path_reads_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[service]\nid = \"from-file\"\n").unwrap();
    assert_eq!(Config::from_path(&path).unwrap().service.id, "from-file");

    assert!(matches!(
        Config::from_path(dir.path().join("missing.toml")),
        Err(ConfigError::Read { .. })
    ));
}
