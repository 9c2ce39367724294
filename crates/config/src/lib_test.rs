use super::*;

#[test]
fn test_defaults() {
    let config = DaemonConfig::default();
    assert_eq!(config.log.level, "info");
    assert_eq!(config.check_interval_secs, 5);
    assert!(config.stores.is_empty());
    assert!(config.sources.is_empty());
}

#[test]
fn test_minimal_config() {
    let config: DaemonConfig = "[[store]]\ncategory = \"default\"\ntype = \"null\""
        .parse()
        .expect("minimal config should parse");

    assert_eq!(config.stores.len(), 1);
    assert_eq!(config.stores[0].get_string("category"), Some("default"));
    assert_eq!(config.stores[0].get_string("type"), Some("null"));
}

#[test]
fn test_full_config() {
    let config: DaemonConfig = r#"
        check_interval_secs = 2

        [log]
        level = "debug"

        [[source]]
        type = "tail"
        category = "apache"
        file = "/var/log/apache/access.log"

        [[store]]
        category = "apache"
        type = "buffer"

        [store.primary]
        type = "network"
        remote_host = "upstream"
        remote_port = 1463

        [store.secondary]
        type = "file"
        file_path = "/var/spool/chute"
    "#
    .parse()
    .expect("full config should parse");

    assert_eq!(config.check_interval_secs, 2);
    assert_eq!(config.log.level, "debug");
    assert_eq!(config.sources.len(), 1);
    assert_eq!(config.sources[0].get_string("type"), Some("tail"));

    let store = &config.stores[0];
    assert_eq!(store.get_string("type"), Some("buffer"));
    assert!(store.get_store("primary").is_some());
    assert!(store.get_store("secondary").is_some());
}

#[test]
fn test_invalid_toml_is_rejected() {
    let result: std::result::Result<DaemonConfig, _> = "[[store".parse();
    assert!(result.is_err());
}

#[test]
fn test_from_file_missing() {
    let err = DaemonConfig::from_file("/nonexistent/chute.toml").unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}
