use super::*;

fn parse(s: &str) -> StoreConfig {
    toml::from_str(s).expect("failed to parse store config")
}

#[test]
fn test_scalar_accessors() {
    let config = parse(
        r#"
        type = "file"
        max_size = 1024
        rotate_hour = 1
        timeout = -5
        "#,
    );

    assert_eq!(config.get_string("type"), Some("file"));
    assert_eq!(config.get_unsigned("max_size"), Some(1024));
    assert_eq!(config.get_int("timeout"), Some(-5));
    assert_eq!(config.get_string("missing"), None);
    assert_eq!(config.get_unsigned("missing"), None);
}

#[test]
fn test_unsigned_rejects_garbage() {
    let config = parse(r#"max_size = "plenty""#);
    assert_eq!(config.get_unsigned("max_size"), None);
}

#[test]
fn test_flag_dialects() {
    let config = parse(
        r#"
        write_meta = "yes"
        create_symlink = false
        use_tree = true
        add_newlines = "no"
        chunked = "maybe"
        "#,
    );

    assert_eq!(config.get_flag("write_meta"), Some(true));
    assert_eq!(config.get_flag("create_symlink"), Some(false));
    assert_eq!(config.get_flag("use_tree"), Some(true));
    assert_eq!(config.get_flag("add_newlines"), Some(false));
    assert_eq!(config.get_flag("chunked"), None);
    assert_eq!(config.get_flag("missing"), None);
}

#[test]
fn test_nested_subtrees() {
    let config = parse(
        r#"
        type = "buffer"
        retry_interval = 30

        [primary]
        type = "network"
        remote_host = "upstream"
        remote_port = 1463

        [secondary]
        type = "file"
        file_path = "/var/spool/chute"
        "#,
    );

    let primary = config.get_store("primary").expect("primary subtree");
    assert_eq!(primary.get_string("type"), Some("network"));
    assert_eq!(primary.get_unsigned("remote_port"), Some(1463));

    let secondary = config.get_store("secondary").expect("secondary subtree");
    assert_eq!(secondary.get_string("file_path"), Some("/var/spool/chute"));

    assert!(config.get_store("tertiary").is_none());
    let mut keys: Vec<_> = config.store_keys().collect();
    keys.sort_unstable();
    assert_eq!(keys, ["primary", "secondary"]);
}

#[test]
fn test_set_string_overrides() {
    let mut config = parse(r#"file_path = "/data""#);
    config.set_string("file_path", "/data/bucket000");
    assert_eq!(config.get_string("file_path"), Some("/data/bucket000"));
}

#[test]
fn test_has_key() {
    let config = parse(
        r#"
        type = "bucket"
        [bucket]
        type = "file"
        "#,
    );
    assert!(config.has_key("type"));
    assert!(config.has_key("bucket"));
    assert!(!config.has_key("bucket0"));
}
