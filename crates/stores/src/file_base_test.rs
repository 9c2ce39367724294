use super::*;
use chrono::TimeZone;

fn fixed_time() -> chrono::DateTime<Local> {
    Local.with_ymd_and_hms(2025, 3, 9, 14, 30, 0).unwrap()
}

#[test]
fn test_parse_roll_period_keywords() {
    assert_eq!(parse_roll_period("hourly"), Some(RollPeriod::Hourly));
    assert_eq!(parse_roll_period("daily"), Some(RollPeriod::Daily));
    assert_eq!(parse_roll_period("never"), Some(RollPeriod::Never));
}

#[test]
fn test_parse_roll_period_intervals() {
    assert_eq!(parse_roll_period("30"), Some(RollPeriod::Interval(30)));
    assert_eq!(parse_roll_period("45s"), Some(RollPeriod::Interval(45)));
    assert_eq!(parse_roll_period("10m"), Some(RollPeriod::Interval(600)));
    assert_eq!(parse_roll_period("2h"), Some(RollPeriod::Interval(7200)));
    assert_eq!(parse_roll_period("1d"), Some(RollPeriod::Interval(86400)));
    assert_eq!(parse_roll_period("1w"), Some(RollPeriod::Interval(604800)));
}

#[test]
fn test_parse_roll_period_rejects_garbage() {
    assert_eq!(parse_roll_period(""), None);
    assert_eq!(parse_roll_period("0"), None);
    assert_eq!(parse_roll_period("h"), None);
    assert_eq!(parse_roll_period("5x"), None);
    assert_eq!(parse_roll_period("5hh"), None);
    assert_eq!(parse_roll_period("sometimes"), None);
}

#[test]
fn test_file_suffix_parsing() {
    assert_eq!(file_suffix("web-2025-03-09_00042", "web-2025-03-09"), Some(42));
    assert_eq!(file_suffix("web_00007", "web"), Some(7));
    assert_eq!(file_suffix("web_00007.lzo", "web"), Some(7));
    // Files for other bases are ignored.
    assert_eq!(file_suffix("app-2025-03-09_00001", "web-2025-03-09"), None);
    assert_eq!(file_suffix("web-2025-03-10_00001", "web-2025-03-09"), None);
    assert_eq!(file_suffix("no_suffix_here", "web"), None);
    assert_eq!(file_suffix("web", "web"), None);
}

#[test]
fn test_file_suffix_with_tree_base() {
    // Tree-layout base names carry the dated directories; listings do not.
    assert_eq!(
        file_suffix(
            "web-2025-03-09-14_00003",
            "2025/03/09/14/web-2025-03-09-14"
        ),
        Some(3)
    );
}

#[test]
fn test_make_base_filename() {
    let mut base = FileBase::new("web");
    assert_eq!(base.make_base_filename(fixed_time()), "web");

    base.roll_period = RollPeriod::Daily;
    assert_eq!(base.make_base_filename(fixed_time()), "web-2025-03-09");

    base.roll_period = RollPeriod::Hourly;
    base.store_tree = true;
    assert_eq!(
        base.make_base_filename(fixed_time()),
        "2025/03/09/14/web-2025-03-09-14"
    );
}

#[test]
fn test_make_full_filename_zero_pads() {
    let mut base = FileBase::new("web");
    base.file_path = "/data/logs".into();
    base.roll_period = RollPeriod::Daily;
    assert_eq!(
        base.make_full_filename(3, fixed_time()),
        std::path::PathBuf::from("/data/logs/web-2025-03-09_00003")
    );

    base.lzo_level = 3;
    assert_eq!(
        base.make_full_filename(123456, fixed_time()),
        std::path::PathBuf::from("/data/logs/web-2025-03-09_123456.lzo")
    );
}

#[test]
fn test_symlink_names() {
    let mut base = FileBase::new("web");
    base.file_path = "/data/logs".into();
    assert_eq!(base.make_base_symlink(), "web_current");

    base.base_symlink_name = "latest".into();
    assert_eq!(
        base.make_full_symlink(),
        std::path::PathBuf::from("/data/logs/latest_current")
    );
}

#[test]
fn test_should_roll_by_size() {
    let mut base = FileBase::new("web");
    base.max_size = 100;
    base.current_size = 100;
    assert!(!base.should_roll(fixed_time()));
    base.current_size = 101;
    assert!(base.should_roll(fixed_time()));

    // max_size of zero disables the size trigger.
    base.max_size = 0;
    assert!(!base.should_roll(fixed_time()));
}

#[test]
fn test_should_roll_hourly() {
    let mut base = FileBase::new("web");
    base.roll_period = RollPeriod::Hourly;
    base.roll_minute = 15;

    base.record_roll(fixed_time());
    assert_eq!(base.last_roll, 14);
    assert!(!base.should_roll(fixed_time()));

    // Next hour but before the roll minute.
    let early = Local.with_ymd_and_hms(2025, 3, 9, 15, 10, 0).unwrap();
    assert!(!base.should_roll(early));

    let due = Local.with_ymd_and_hms(2025, 3, 9, 15, 20, 0).unwrap();
    assert!(base.should_roll(due));
}

#[test]
fn test_should_roll_daily() {
    let mut base = FileBase::new("web");
    base.roll_period = RollPeriod::Daily;
    base.roll_hour = 1;
    base.roll_minute = 15;
    base.record_roll(fixed_time());
    assert_eq!(base.last_roll, 9);

    let next_day_early = Local.with_ymd_and_hms(2025, 3, 10, 0, 30, 0).unwrap();
    assert!(!base.should_roll(next_day_early));

    let next_day_due = Local.with_ymd_and_hms(2025, 3, 10, 1, 20, 0).unwrap();
    assert!(base.should_roll(next_day_due));
}

#[test]
fn test_should_roll_interval() {
    let mut base = FileBase::new("web");
    base.roll_period = RollPeriod::Interval(3600);
    base.record_roll(fixed_time());

    let within = Local.with_ymd_and_hms(2025, 3, 9, 15, 29, 59).unwrap();
    assert!(!base.should_roll(within));

    let past = Local.with_ymd_and_hms(2025, 3, 9, 15, 30, 0).unwrap();
    assert!(base.should_roll(past));
}

#[test]
fn test_bytes_to_pad() {
    // No chunking.
    assert_eq!(FileBase::bytes_to_pad(100, 50, 0), 0);
    // Record fits in the space left.
    assert_eq!(FileBase::bytes_to_pad(10, 50, 64), 0);
    // Record would straddle the boundary; pad to the next chunk.
    assert_eq!(FileBase::bytes_to_pad(20, 50, 64), 14);
    // Exactly at a boundary, a full chunk is available.
    assert_eq!(FileBase::bytes_to_pad(64, 64, 64), 0);
    assert_eq!(FileBase::bytes_to_pad(65, 64, 64), 64);
}

#[test]
fn test_suffix_scan() {
    let dir = tempfile::TempDir::new().unwrap();
    for name in ["web_00001", "web_00005", "web_00003", "app_00009", "junk"] {
        std::fs::write(dir.path().join(name), "x").unwrap();
    }

    let mut base = FileBase::new("web");
    base.file_path = dir.path().display().to_string();

    assert_eq!(base.find_newest_suffix("web"), 5);
    assert_eq!(base.find_oldest_suffix("web"), 1);
    assert_eq!(base.find_newest_suffix("db"), -1);
    assert_eq!(base.find_oldest_suffix("db"), -1);
}

#[test]
fn test_configure_from_tree() {
    let config: chute_config::StoreConfig = toml::from_str(
        r#"
        file_path = "/data"
        base_filename = "events"
        rotate_period = "hourly"
        rotate_minute = 5
        max_size = 4096
        chunk_size = 512
        write_meta = "yes"
        create_symlink = "no"
        "#,
    )
    .unwrap();

    let mut base = FileBase::new("web");
    base.configure(&config, "web");

    assert_eq!(base.base_file_path, "/data");
    assert_eq!(base.file_path, "/data");
    assert_eq!(base.base_file_name, "events");
    assert_eq!(base.roll_period, RollPeriod::Hourly);
    assert_eq!(base.roll_minute, 5);
    assert_eq!(base.max_size, 4096);
    assert_eq!(base.chunk_size, 512);
    assert!(base.write_meta);
    assert!(!base.create_symlink);
}

#[test]
fn test_configure_use_tree_forces_hourly() {
    let config: chute_config::StoreConfig = toml::from_str(
        r#"
        rotate_period = "daily"
        use_tree = "yes"
        "#,
    )
    .unwrap();

    let mut base = FileBase::new("web");
    base.configure(&config, "web");
    assert!(base.store_tree);
    assert_eq!(base.roll_period, RollPeriod::Hourly);
}

#[test]
fn test_configure_bad_rotate_period_disables_rotation() {
    let config: chute_config::StoreConfig =
        toml::from_str(r#"rotate_period = "fortnightly""#).unwrap();
    let mut base = FileBase::new("web");
    base.roll_period = RollPeriod::Hourly;
    base.configure(&config, "web");
    assert_eq!(base.roll_period, RollPeriod::Never);
}

#[test]
fn test_configure_sub_directory() {
    let config: chute_config::StoreConfig = toml::from_str(
        r#"
        file_path = "/data"
        sub_directory = "relay"
        "#,
    )
    .unwrap();
    let mut base = FileBase::new("web");
    base.configure(&config, "web");
    assert_eq!(base.file_path, "/data/relay");
}

#[test]
fn test_copy_from_rebases_path_on_category() {
    let mut original = FileBase::new("web");
    original.base_file_path = "/data".into();
    original.file_path = "/data".into();
    original.chunk_size = 512;
    original.roll_period = RollPeriod::Daily;

    let mut copied = FileBase::new("app");
    copied.copy_from(&original, "app");

    assert_eq!(copied.base_file_path, "/data/app");
    assert_eq!(copied.file_path, "/data/app");
    assert_eq!(copied.base_file_name, "app");
    assert_eq!(copied.chunk_size, 512);
    assert_eq!(copied.roll_period, RollPeriod::Daily);
    // Rotation state does not travel.
    assert_eq!(copied.current_size, 0);
}

#[test]
fn test_stats_line_written_on_demand() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut base = FileBase::new("web");
    base.file_path = dir.path().display().to_string();
    base.current_size = 1234;
    base.events_written = 10;
    base.current_filename = "web_00000".into();

    base.write_stats_line("web");
    let stats = std::fs::read_to_string(dir.path().join("scribe_stats")).unwrap();
    assert!(stats.contains("wrote <1234> bytes in <10> events to file <web_00000>"));

    base.write_stats = false;
    base.write_stats_line("web");
    let stats_after = std::fs::read_to_string(dir.path().join("scribe_stats")).unwrap();
    assert_eq!(stats, stats_after);
}
