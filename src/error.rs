//! Error types for ferry.
//!
//! This module defines the crate-level error type. Lower layers carry their
//! own error enums ([`ConnectionError`], [`ActionError`]) which are wrapped
//! here with the host, task and action they happened in.

use std::path::PathBuf;
use thiserror::Error;

use crate::actions::ActionError;
use crate::connection::ConnectionError;

/// Result type alias for ferry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for ferry.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Playbook Errors
    // ========================================================================
    /// Error parsing a playbook file.
    #[error("Failed to parse playbook '{path}': {message}")]
    PlaybookParse {
        /// Path to the playbook file
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// A playbook parsed but is structurally invalid.
    #[error("Playbook validation failed: {0}")]
    PlaybookValidation(String),

    // ========================================================================
    // Inventory Errors
    // ========================================================================
    /// Error loading inventory.
    #[error("Failed to load inventory from '{path}': {message}")]
    InventoryLoad {
        /// Path to inventory
        path: PathBuf,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Execution Errors
    // ========================================================================
    /// Failed to connect to a host.
    #[error("Failed to connect to server '{host}': {source}")]
    Dial {
        /// Target address
        host: String,
        /// Underlying transport error
        #[source]
        source: ConnectionError,
    },

    /// An action failed, ending the host's playbook run.
    #[error("Action '{action}' of task '{task}' failed on '{host}': {source}")]
    ActionFailed {
        /// Task name
        task: String,
        /// Action kind
        action: &'static str,
        /// Target address
        host: String,
        /// Underlying action error
        #[source]
        source: ActionError,
    },

    /// The task driving a host's playbook panicked.
    #[error("Playbook run on '{host}' aborted unexpectedly: {message}")]
    HostTaskPanicked {
        /// Target address
        host: String,
        /// Panic or join error description
        message: String,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid configuration value.
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Error message
        message: String,
    },

    /// Error reading a configuration file.
    #[error("Failed to load configuration from '{path}': {message}")]
    ConfigLoad {
        /// Path to the configuration file
        path: PathBuf,
        /// Error message
        message: String,
    },

    // ========================================================================
    // IO / Serialization Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl Error {
    /// Creates a new playbook parse error.
    pub fn playbook_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::PlaybookParse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new inventory load error.
    pub fn inventory_load(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InventoryLoad {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new invalid configuration error.
    pub fn invalid_config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error was caused by cancellation or a deadline.
    pub fn is_cancellation(&self) -> bool {
        match self {
            Error::Dial { source, .. } => source.is_cancellation(),
            Error::ActionFailed { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }

    /// Returns the error code for CLI exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::PlaybookParse { .. } | Error::PlaybookValidation(_) => 4,
            Error::InventoryLoad { .. } => 5,
            Error::InvalidConfig { .. } | Error::ConfigLoad { .. } => 6,
            _ => 1,
        }
    }
}
