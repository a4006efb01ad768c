//! Integration tests for ConfigManager and configuration file handling
//!
//! These tests verify:
//! - Configuration loading and saving
//! - Default configuration for missing files and sections
//! - Environment overrides on top of the file
//! - Conversion into engine settings

use camino::{Utf8Path, Utf8PathBuf};
use imgload::models::LoaderConfig;
use imgload::{ConfigManager, EngineSettings};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

fn create_test_config_dir() -> (TempDir, Utf8PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    (temp_dir, config_path)
}

fn manager(dir: &Utf8Path, prefix: &str) -> ConfigManager {
    ConfigManager::new(dir).unwrap().with_env_prefix(prefix)
}

#[test]
fn test_create_config_manager_creates_directory() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let nested = config_path.join("nested/config");

    let manager = ConfigManager::new(&nested).unwrap();

    assert_eq!(manager.config_dir(), &nested);
    assert!(nested.exists());
}

#[test]
fn test_load_defaults_without_file() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let config = manager(&config_path, "IMGLOAD_IT_DEFAULTS").load().unwrap();

    assert_eq!(config.engine.poll_interval_ms, 5);
    assert_eq!(config.engine.worker_stack_size, 512 * 1024);
    assert_eq!(config.thumbnails.cache_dir, "thumbnails");
    assert_eq!(config.logging.prefix, "imgload");
}

#[test]
fn test_partial_file_keeps_other_defaults() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let manager = manager(&config_path, "IMGLOAD_IT_PARTIAL");
    fs::write(
        manager.config_path(),
        "thumbnails:\n  size: 256\nlogging:\n  debug: true\n",
    )
    .unwrap();

    let config = manager.load().unwrap();

    assert_eq!(config.thumbnails.size, 256);
    assert_eq!(config.thumbnails.cache_dir, "thumbnails");
    assert!(config.logging.debug);
    assert_eq!(config.engine.event_capacity, 100);
}

#[test]
fn test_save_and_load_round_trip() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let manager = manager(&config_path, "IMGLOAD_IT_ROUND_TRIP");

    let mut config = LoaderConfig::default();
    config.engine.event_capacity = 8;
    config.logging.console = false;
    manager.save(&config).unwrap();

    let contents = fs::read_to_string(manager.config_path()).unwrap();
    assert!(contents.contains("event_capacity: 8"));
    assert_eq!(manager.load().unwrap(), config);
}

#[test]
fn test_environment_overrides_file() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let manager = manager(&config_path, "IMGLOAD_IT_ENV");
    fs::write(manager.config_path(), "engine:\n  poll_interval_ms: 10\n").unwrap();

    // Unique prefix, so no other test reads this variable
    unsafe {
        std::env::set_var("IMGLOAD_IT_ENV_ENGINE__POLL_INTERVAL_MS", "25");
    }
    let config = manager.load();
    unsafe {
        std::env::remove_var("IMGLOAD_IT_ENV_ENGINE__POLL_INTERVAL_MS");
    }

    assert_eq!(config.unwrap().engine.poll_interval_ms, 25);
}

#[test]
fn test_engine_settings_from_loaded_config() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let manager = manager(&config_path, "IMGLOAD_IT_SETTINGS");
    fs::write(manager.config_path(), "engine:\n  poll_interval_ms: 12\n").unwrap();

    let config = manager.load().unwrap();
    let settings = EngineSettings::from(&config.engine);

    assert_eq!(settings.poll_interval, Duration::from_millis(12));
    assert_eq!(settings.event_capacity, 100);
}
