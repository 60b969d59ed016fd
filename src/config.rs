//! Configuration module for ferry
//!
//! Handles loading and merging configuration from multiple sources:
//! - Default values
//! - An optional TOML configuration file (`--config` / `FERRY_CONFIG`)
//! - Command-line arguments
//!
//! Later sources win. The merged [`Settings`] are validated into a
//! [`RunConfig`], the immutable configuration every run component reads.
//!
//! ```toml
//! inventory = "hosts.yaml"
//! connect_timeout = "10s"
//! exec_timeout = "15m"
//! max_concurrent_connections = 8
//! ```

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default inventory file.
pub const DEFAULT_INVENTORY: &str = "inventory.yaml";

/// Default bound on dialing one host.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on one action.
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default batch size.
pub const DEFAULT_MAX_CONCURRENT_CONNECTIONS: usize = 2;

/// Optional settings from one source. Unset fields fall through to the next
/// source, then to the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Inventory file
    pub inventory: Option<PathBuf>,

    /// Dial timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Option<Duration>,

    /// Per-action timeout
    #[serde(with = "humantime_serde")]
    pub exec_timeout: Option<Duration>,

    /// Batch size
    pub max_concurrent_connections: Option<usize>,
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::ConfigLoad {
            path: path.to_path_buf(),
            message: format!("Failed to read config file: {}", e),
        })?;

        toml::from_str(&content).map_err(|e| Error::ConfigLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Overlay `other` on top of `self`; fields set in `other` win.
    pub fn merge(self, other: Settings) -> Settings {
        Settings {
            inventory: other.inventory.or(self.inventory),
            connect_timeout: other.connect_timeout.or(self.connect_timeout),
            exec_timeout: other.exec_timeout.or(self.exec_timeout),
            max_concurrent_connections: other
                .max_concurrent_connections
                .or(self.max_concurrent_connections),
        }
    }

    /// Validate into a [`RunConfig`] for `playbook`.
    pub fn into_run_config(self, playbook: impl Into<PathBuf>) -> Result<RunConfig> {
        let max = self
            .max_concurrent_connections
            .unwrap_or(DEFAULT_MAX_CONCURRENT_CONNECTIONS);
        let max_concurrent_connections = NonZeroUsize::new(max).ok_or_else(|| {
            Error::invalid_config(
                "max_concurrent_connections",
                "max concurrent connections needs to be greater than 0",
            )
        })?;

        let connect_timeout = non_zero(
            "connect_timeout",
            self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
        )?;
        let exec_timeout = non_zero(
            "exec_timeout",
            self.exec_timeout.unwrap_or(DEFAULT_EXEC_TIMEOUT),
        )?;

        Ok(RunConfig::new(playbook)
            .with_inventory(
                self.inventory
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_INVENTORY)),
            )
            .with_connect_timeout(connect_timeout)
            .with_exec_timeout(exec_timeout)
            .with_max_concurrent_connections(max_concurrent_connections))
    }
}

fn non_zero(key: &str, value: Duration) -> Result<Duration> {
    if value.is_zero() {
        Err(Error::invalid_config(key, "duration needs to be greater than 0"))
    } else {
        Ok(value)
    }
}

/// Validated configuration for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Playbook file
    pub playbook: PathBuf,

    /// Folder `file` action sources are resolved against
    pub playbook_folder: PathBuf,

    /// Inventory file
    pub inventory: PathBuf,

    /// Bound on dialing one host
    pub connect_timeout: Duration,

    /// Bound on one action
    pub exec_timeout: Duration,

    /// Hosts dialed and run per batch
    pub max_concurrent_connections: NonZeroUsize,
}

impl RunConfig {
    /// Configuration with defaults for `playbook`.
    pub fn new(playbook: impl Into<PathBuf>) -> Self {
        let playbook = playbook.into();
        let playbook_folder = match playbook.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        Self {
            playbook,
            playbook_folder,
            inventory: PathBuf::from(DEFAULT_INVENTORY),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
            max_concurrent_connections: NonZeroUsize::MIN.saturating_add(
                DEFAULT_MAX_CONCURRENT_CONNECTIONS - 1,
            ),
        }
    }

    pub fn with_inventory(mut self, inventory: impl Into<PathBuf>) -> Self {
        self.inventory = inventory.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_exec_timeout(mut self, timeout: Duration) -> Self {
        self.exec_timeout = timeout;
        self
    }

    pub fn with_max_concurrent_connections(mut self, max: NonZeroUsize) -> Self {
        self.max_concurrent_connections = max;
        self
    }
}
