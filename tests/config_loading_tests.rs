//! Loading `AppConfig` from files
use std::io::Write;
use std::time::Duration;

use chrono::NaiveDate;
use fare_sweep::domain::Market;
use fare_sweep::infrastructure::{AppConfig, ConfigError};
use tempfile::NamedTempFile;

fn write_config(extension: &str, body: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(extension).tempfile().unwrap();
    file.write_all(body.as_bytes()).unwrap();
    file
}

#[test]
fn full_toml_file_is_loaded() {
    let file = write_config(
        ".toml",
        r#"
[search]
origin = "yyz"
destination = "lhr"
return_origin = "cdg"
return_destination = "yyz"
date_from = "2025-06-01"
date_to = "2025-06-10"
stay_nights = 10
max_duration_hours = 18
stops = [1, 0]
market = "canada"

[run]
concurrency = 3
reconcile = false
retry_join_timeout_secs = 90

[session]
recovery_cooldown_secs = 30

[timing]
extract_attempts = 2

[output]
directory = "/tmp/fares"
pretty = true
"#,
    );

    let config = AppConfig::from_file(file.path()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.search.origin, "yyz");
    assert_eq!(config.search.market, Market::Canada);
    assert_eq!(config.search.date_from, NaiveDate::from_ymd_opt(2025, 6, 1).unwrap());
    assert!(config.search.is_open_jaw());
    assert_eq!(config.search.route_label(), "YYZ - LHR x CDG");
    assert_eq!(config.search.adults, 2);

    assert_eq!(config.run.concurrency, 3);
    assert!(!config.run.reconcile);
    assert_eq!(config.run.retry_join_timeout(), Duration::from_secs(90));
    assert_eq!(config.session.policy().recovery_cooldown, Duration::from_secs(30));
    // 지정하지 않은 값은 기본값 유지
    assert_eq!(config.session.init_attempts, 3);
    assert_eq!(config.timing.extract_attempts, 2);
    assert!(config.output.pretty);
}

#[test]
fn json_file_is_loaded_by_extension() {
    let file = write_config(
        ".json",
        r#"{ "search": { "origin": "JFK", "destination": "LAX", "date_from": "2025-01-01", "date_to": "2025-01-02" } }"#,
    );

    let config = AppConfig::from_file(file.path()).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.search.expected_dates().len(), 2);
}

#[test]
fn invalid_settings_are_rejected_at_load() {
    let file = write_config(
        ".toml",
        r#"
[run]
concurrency = 0
"#,
    );

    assert!(matches!(AppConfig::from_file(file.path()), Err(ConfigError::Invalid(_))));
}

#[test]
fn incomplete_open_jaw_fails_validation() {
    let file = write_config(
        ".toml",
        r#"
[search]
origin = "JFK"
destination = "LAX"
return_origin = "SFO"
date_from = "2025-01-01"
date_to = "2025-01-02"
"#,
    );

    let config = AppConfig::from_file(file.path()).unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn missing_file_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = AppConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::FileLoad { .. }));
}
