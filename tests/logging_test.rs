// Integration test for the logging bootstrap
// Lives in its own test binary because it installs the global subscriber

use std::fs;
use std::path::Path;

use tempfile::TempDir;
use trellis::startup::LogSettings;
use trellis::{LoggingConfig, Settings, init_logging};

/// Concatenate every rolled file whose name starts with `file_name`
fn read_log(dir: &Path, file_name: &str) -> String {
    let mut contents = String::new();
    for entry in fs::read_dir(dir).unwrap() {
        let entry = entry.unwrap();
        if entry.file_name().to_string_lossy().starts_with(file_name) {
            contents.push_str(&fs::read_to_string(entry.path()).unwrap());
        }
    }
    contents
}

#[test]
fn test_component_events_reach_their_files() {
    let log_dir = TempDir::new().unwrap();
    let settings = Settings {
        logging: LogSettings {
            log_dir: Some(log_dir.path().to_path_buf()),
            console: false,
            file: true,
            level: "info".to_string(),
        },
        ..Settings::default()
    };
    let config = LoggingConfig::from_settings(&settings.logging);
    let guard = init_logging(&config).unwrap();

    tracing::info!(target: "trellis_clustering::membership", "membership event");
    tracing::info!(target: "trellis_reminders::reminders", "reminder event");
    tracing::debug!(target: "trellis_reminders::reminders", "reminder detail");
    tracing::info!(target: "trellis_persistence::embedded", "storage event");

    // The global subscriber is installed once per process
    assert!(init_logging(&config).is_err());

    // Dropping the guard flushes the non-blocking writers
    drop(guard);

    let membership = read_log(log_dir.path(), "membership.log");
    assert!(membership.contains("membership event"));
    assert!(!membership.contains("reminder event"));

    let reminders = read_log(log_dir.path(), "reminders.log");
    assert!(reminders.contains("reminder event"));
    assert!(reminders.contains("reminder detail"));
    assert!(!reminders.contains("storage event"));

    let persistence = read_log(log_dir.path(), "persistence.log");
    assert!(persistence.contains("storage event"));
    assert!(!persistence.contains("membership event"));

    let root = read_log(log_dir.path(), "trellis.log");
    for event in ["membership event", "reminder event", "storage event"] {
        assert!(root.contains(event), "root log is missing '{}'", event);
    }
}
