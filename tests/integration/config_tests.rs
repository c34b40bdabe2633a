use std::fs;

use catalog_scan::config::{Config, ConfigError};
use catalog_scan::walker::RetryPolicy;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use tempfile::tempdir;

#[test]
fn test_config_defaults() {
    // Figment directly, without Env, so other tests' variables cannot leak in.
    let figment = Figment::from(Serialized::defaults(Config::default()));
    let config = Config::from_figment(&figment).unwrap();
    assert_eq!(config.workers, 4);
    assert_eq!(config.default_max_depth, 10);
    assert_eq!(config.retry, RetryPolicy::default());
    assert!(config.database.is_none());
}

#[test]
fn test_config_load_from_toml() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(
        &config_path,
        r#"
database = ":memory:"
workers = 8
job_timeout_secs = 600

[retry]
max_attempts = 5
base_delay_ms = 50
"#,
    )
    .unwrap();

    let figment = Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(&config_path));
    let config = Config::from_figment(&figment).unwrap();

    assert_eq!(config.workers, 8);
    assert!(config.is_in_memory());
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.retry.base_delay_ms, 50);
    // Unset nested keys keep their defaults.
    assert_eq!(config.retry.max_delay_ms, RetryPolicy::default().max_delay_ms);
    assert_eq!(
        config.scheduler_options().job_timeout,
        Some(std::time::Duration::from_secs(600))
    );
}

#[test]
fn test_config_env_overrides_toml() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "default_max_depth = 3\nretained_statuses = 16\n").unwrap();

    std::env::set_var("CATALOG_SCAN_TEST_DEFAULT_MAX_DEPTH", "7");
    std::env::set_var("CATALOG_SCAN_TEST_RETRY__MAX_ATTEMPTS", "9");

    let figment = Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(&config_path))
        .merge(Env::prefixed("CATALOG_SCAN_TEST_").split("__"));
    let config = Config::from_figment(&figment).unwrap();

    assert_eq!(config.default_max_depth, 7);
    assert_eq!(config.retained_statuses, 16);
    assert_eq!(config.retry.max_attempts, 9);

    std::env::remove_var("CATALOG_SCAN_TEST_DEFAULT_MAX_DEPTH");
    std::env::remove_var("CATALOG_SCAN_TEST_RETRY__MAX_ATTEMPTS");
}

#[test]
fn test_invalid_values_are_rejected() {
    let figment = Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::string("workers = 0"));
    assert!(matches!(
        Config::from_figment(&figment),
        Err(ConfigError::Invalid(msg)) if msg.contains("workers")
    ));

    let figment = Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::string("[retry]\nbase_delay_ms = 5000\nmax_delay_ms = 10"));
    assert!(Config::from_figment(&figment).is_err());

    let figment = Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::string("workers = \"many\""));
    assert!(matches!(Config::from_figment(&figment), Err(ConfigError::Load(_))));
}

#[test]
fn test_saved_config_loads_back() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("nested/config.toml");
    let config = Config {
        database: Some("/var/lib/catalog.db".into()),
        workers: 2,
        job_timeout_secs: Some(30),
        ..Config::default()
    };
    config.save_to(&path).unwrap();

    let figment = Figment::from(Serialized::defaults(Config::default())).merge(Toml::file(&path));
    assert_eq!(Config::from_figment(&figment).unwrap(), config);
}
