//! Playbook definitions and parsing.
//!
//! A playbook is a YAML sequence of tasks. Each task is a mapping with a
//! `name` and one or more action keys, run in document order:
//!
//! ```yaml
//! - name: Deploy and restart
//!   file:
//!     src: files/index.php
//!     dest: /var/www/html/index.php
//!   service:
//!     name: apache2
//!     state: restart
//!   shell: rm -f /var/www/html/index.html
//! ```
//!
//! A playbook runs end-to-end against one host at a time and stops at the
//! first failed action.

use std::path::{Path, PathBuf};

use serde::de::{self, Deserializer};
use serde::Deserialize;
use tracing::{info, warn};

use crate::actions::Action;
use crate::config::RunConfig;
use crate::connection::Connection;
use crate::context::ExecContext;
use crate::error::{Error, Result};

/// A named, ordered list of actions.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    /// Task name, shown in progress logs
    pub name: String,

    /// Actions in document order
    pub actions: Vec<Action>,
}

impl Task {
    fn from_mapping(mapping: serde_yaml::Mapping) -> std::result::Result<Self, String> {
        let mut name = None;
        let mut actions = Vec::new();

        for (key, value) in mapping {
            let key = match key {
                serde_yaml::Value::String(key) => key,
                other => return Err(format!("task keys must be strings, found {:?}", other)),
            };

            if key == "name" {
                match value {
                    serde_yaml::Value::String(n) if !n.trim().is_empty() => name = Some(n),
                    _ => return Err("task 'name' must be a non-empty string".to_string()),
                }
                continue;
            }

            actions.push((key, value));
        }

        let name = name.ok_or_else(|| "task is missing a 'name'".to_string())?;
        if actions.is_empty() {
            return Err(format!("task {:?} has no actions", name));
        }

        let actions = actions
            .into_iter()
            .map(|(kind, value)| {
                Action::decode(&kind, value).map_err(|e| format!("task {:?}: {}", name, e))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self { name, actions })
    }
}

impl<'de> Deserialize<'de> for Task {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mapping = serde_yaml::Mapping::deserialize(deserializer)?;
        Task::from_mapping(mapping).map_err(de::Error::custom)
    }
}

/// An ordered list of tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct Playbook {
    /// Name of the playbook, derived from the file name
    pub name: Option<String>,

    /// Tasks in document order
    pub tasks: Vec<Task>,

    /// Path to the playbook file (set during loading)
    pub source_path: Option<PathBuf>,
}

impl Playbook {
    /// Create a playbook from tasks.
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            name: None,
            tasks,
            source_path: None,
        }
    }

    /// Loads a playbook from a YAML file.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::playbook_parse(path, format!("Failed to read file: {}", e)))?;

        Self::from_yaml(&content, Some(path.to_path_buf()))
    }

    /// Parses a playbook from a YAML string.
    pub fn from_yaml(yaml: &str, source_path: Option<PathBuf>) -> Result<Self> {
        let origin = || {
            source_path
                .clone()
                .unwrap_or_else(|| PathBuf::from("<string>"))
        };

        let tasks: Vec<Task> = if yaml.trim().is_empty() {
            Vec::new()
        } else {
            serde_yaml::from_str(yaml).map_err(|e| Error::playbook_parse(origin(), e.to_string()))?
        };

        if tasks.is_empty() {
            return Err(Error::PlaybookValidation(format!(
                "playbook '{}' has no tasks",
                origin().display()
            )));
        }

        let name = source_path
            .as_ref()
            .and_then(|p| p.file_stem())
            .map(|s| s.to_string_lossy().into_owned());

        Ok(Self {
            name,
            tasks,
            source_path,
        })
    }

    /// Total number of actions across all tasks.
    pub fn action_count(&self) -> usize {
        self.tasks.iter().map(|t| t.actions.len()).sum()
    }

    /// Run every task against `conn`, stopping at the first failed action.
    ///
    /// Each action runs under a child of `ctx` bounded by the configured
    /// execution timeout.
    pub async fn run(
        &self,
        ctx: &ExecContext,
        conn: &dyn Connection,
        config: &RunConfig,
    ) -> Result<()> {
        let address = conn.address();
        let total = self.tasks.len();

        for (idx, task) in self.tasks.iter().enumerate() {
            info!(
                host = %address,
                task = %task.name,
                "Running task [{}/{}] on {}: {}",
                idx + 1,
                total,
                address,
                task.name
            );

            for action in &task.actions {
                let action_ctx = ctx.with_timeout(config.exec_timeout);
                let result = action.run(&action_ctx, conn, config).await;
                drop(action_ctx);

                if let Err(source) = result {
                    warn!(
                        host = %address,
                        task = %task.name,
                        action = action.kind(),
                        error = %source,
                        "Failed to run action"
                    );
                    return Err(Error::ActionFailed {
                        task: task.name.clone(),
                        action: action.kind(),
                        host: address,
                        source,
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{AptState, ServiceState, ShellAction};
    use pretty_assertions::assert_eq;

    const PLAYBOOK: &str = r#"
- name: Install web server
  apt:
    state: install
    pkg: [apache2, php]
- name: Deploy and restart
  file:
    src: files/index.php
    dest: /var/www/html/index.php
    owner: www-data
    group: www-data
  service:
    name: apache2
    state: restart
  shell: rm -f /var/www/html/index.html
  validate:
    port: 80
    url_path: /index.php
    retries: 3
    timeout: 2s
    body_content: Hello
"#;

    #[test]
    fn test_parse_playbook() {
        let playbook =
            Playbook::from_yaml(PLAYBOOK, Some(PathBuf::from("deploy/site.yaml"))).unwrap();

        assert_eq!(playbook.name.as_deref(), Some("site"));
        assert_eq!(playbook.tasks.len(), 2);
        assert_eq!(playbook.action_count(), 5);

        let kinds: Vec<_> = playbook.tasks[1].actions.iter().map(Action::kind).collect();
        assert_eq!(kinds, vec!["file", "service", "shell", "validate"]);

        match &playbook.tasks[0].actions[0] {
            Action::Apt(apt) => assert_eq!(apt.state, AptState::Install),
            other => panic!("unexpected action {:?}", other),
        }
        match &playbook.tasks[1].actions[1] {
            Action::Service(service) => assert_eq!(service.state, ServiceState::Restart),
            other => panic!("unexpected action {:?}", other),
        }
        assert_eq!(
            playbook.tasks[1].actions[2],
            Action::Shell(ShellAction::new("rm -f /var/www/html/index.html"))
        );
    }

    #[test]
    fn test_missing_name_rejected() {
        let err = Playbook::from_yaml("- shell: ls\n", None).unwrap_err();
        assert!(err.to_string().contains("missing a 'name'"), "{}", err);
    }

    #[test]
    fn test_empty_name_rejected() {
        let err = Playbook::from_yaml("- name: ''\n  shell: ls\n", None).unwrap_err();
        assert!(err.to_string().contains("non-empty string"), "{}", err);
    }

    #[test]
    fn test_task_without_actions_rejected() {
        let err = Playbook::from_yaml("- name: idle\n", None).unwrap_err();
        assert!(err.to_string().contains("has no actions"), "{}", err);
    }

    #[test]
    fn test_unknown_action_rejected() {
        let err = Playbook::from_yaml("- name: t\n  copy: {}\n", None).unwrap_err();
        assert!(err.to_string().contains("unrecognised action: copy"), "{}", err);
    }

    #[test]
    fn test_non_string_shell_rejected() {
        let err = Playbook::from_yaml("- name: t\n  shell: [ls, -l]\n", None).unwrap_err();
        assert!(matches!(err, Error::PlaybookParse { .. }));
    }

    #[test]
    fn test_empty_playbook_rejected() {
        let err = Playbook::from_yaml("[]", None).unwrap_err();
        assert!(matches!(err, Error::PlaybookValidation(_)));
    }
}
