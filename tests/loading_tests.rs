//! Tests for loading inventories, playbooks and configuration from disk.

mod common;

use std::path::PathBuf;
use std::time::Duration;

use common::write_fixture;
use ferry::actions::{Action, AptState};
use ferry::config::Settings;
use ferry::error::Error;
use ferry::inventory::Inventory;
use ferry::playbook::Playbook;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

// ============================================================================
// Inventory
// ============================================================================

#[test]
fn test_inventory_from_file() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(
        dir.path(),
        "inventory.yaml",
        r#"
- host: gondor
  username: isildur
  password: secret
- host: mordor
  port: 4444
  username: sauron
  password: "thou shalt not pass"
"#,
    );

    let inventory = Inventory::from_file(&path).unwrap();

    assert_eq!(inventory.addresses(), vec!["gondor:22", "mordor:4444"]);
    assert_eq!(inventory.hosts()[1].username, "sauron");
    assert_eq!(inventory.pending().len(), 2);
}

#[test]
fn test_missing_inventory_file() {
    let dir = TempDir::new().unwrap();
    let err = Inventory::from_file(dir.path().join("nope.yaml")).unwrap_err();

    assert!(matches!(err, Error::InventoryLoad { .. }));
    assert_eq!(err.exit_code(), 5);
}

#[test]
fn test_malformed_inventory_names_file() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(dir.path(), "hosts.yaml", "host: gondor\n");

    let err = Inventory::from_file(&path).unwrap_err();
    assert!(err.to_string().contains("hosts.yaml"), "{}", err);
}

// ============================================================================
// Playbook
// ============================================================================

const PLAYBOOK: &str = r#"
- name: Install web server
  apt:
    state: present
    pkg:
      - apache2
      - libapache2-mod-php
- name: Deploy
  file:
    src: files/index.php
    dest: /var/www/html/index.php
  shell: rm -f /var/www/html/index.html
"#;

#[tokio::test]
async fn test_playbook_from_file() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(dir.path(), "site.yaml", PLAYBOOK);

    let playbook = Playbook::from_file(&path).await.unwrap();

    assert_eq!(playbook.name.as_deref(), Some("site"));
    assert_eq!(playbook.source_path, Some(path));
    assert_eq!(playbook.tasks[0].name, "Install web server");
    match &playbook.tasks[0].actions[0] {
        Action::Apt(apt) => {
            assert_eq!(apt.state, AptState::Install);
            assert_eq!(apt.pkg, vec!["apache2", "libapache2-mod-php"]);
        }
        other => panic!("unexpected action {:?}", other),
    }

    let kinds: Vec<_> = playbook.tasks[1].actions.iter().map(Action::kind).collect();
    assert_eq!(kinds, vec!["file", "shell"]);
}

#[tokio::test]
async fn test_missing_playbook_file() {
    let err = Playbook::from_file("/nonexistent/site.yaml").await.unwrap_err();

    assert!(matches!(err, Error::PlaybookParse { .. }));
    assert_eq!(err.exit_code(), 4);
}

#[tokio::test]
async fn test_bad_action_parameters_name_task() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(
        dir.path(),
        "site.yaml",
        "- name: Restart\n  service:\n    name: apache2\n    state: bounce\n",
    );

    let err = Playbook::from_file(&path).await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Restart"), "{}", message);
    assert!(message.contains("service"), "{}", message);
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_config_file_merged_under_flags() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(
        dir.path(),
        "ferry.toml",
        r#"
inventory = "hosts.yaml"
connect_timeout = "10s"
max_concurrent_connections = 8
"#,
    );

    let flags = Settings {
        max_concurrent_connections: Some(3),
        ..Default::default()
    };
    let config = Settings::from_file(&path)
        .unwrap()
        .merge(flags)
        .into_run_config("deploy/site.yaml")
        .unwrap();

    assert_eq!(config.inventory, PathBuf::from("hosts.yaml"));
    assert_eq!(config.connect_timeout, Duration::from_secs(10));
    assert_eq!(config.exec_timeout, Duration::from_secs(300));
    assert_eq!(config.max_concurrent_connections.get(), 3);
    assert_eq!(config.playbook_folder, PathBuf::from("deploy"));
}

#[test]
fn test_bad_config_file() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(dir.path(), "ferry.toml", "connect_timeout = \"soon\"\n");

    let err = Settings::from_file(&path).unwrap_err();
    assert!(matches!(err, Error::ConfigLoad { .. }));
    assert_eq!(err.exit_code(), 6);
}
