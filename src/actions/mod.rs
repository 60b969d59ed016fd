//! Actions - the unit of work inside a task.
//!
//! Every action kind is a variant of the closed [`Action`] enum, decoded from
//! the key it appears under in a task:
//!
//! | kind | value | remote effect |
//! |---|---|---|
//! | `file` | mapping | scp transfer, optional `chown` |
//! | `apt` | mapping | `apt-get update`, then one `apt-get` per package |
//! | `service` | mapping | `service <name> <verb>` |
//! | `shell` | string | the command line, verbatim |
//! | `validate` | mapping | HTTP GET from the control node |
//!
//! Arguments interpolated into a remote command line are shell-quoted; the
//! `shell` line is passed through as written.

pub mod apt;
pub mod file;
pub mod service;
pub mod shell;
pub mod validate;

pub use apt::{AptAction, AptState};
pub use file::FileAction;
pub use service::{ServiceAction, ServiceState};
pub use shell::ShellAction;
pub use validate::ValidateAction;

use thiserror::Error;

use crate::config::RunConfig;
use crate::connection::{Connection, ConnectionError};
use crate::context::ExecContext;

/// Errors that can occur while decoding or running an action.
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("unrecognised action: {0}")]
    UnknownKind(String),

    #[error("failed to decode {kind} action: {message}")]
    Decode { kind: &'static str, message: String },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("failed to copy file {src:?} to {dest:?}: {source}")]
    Copy {
        src: String,
        dest: String,
        #[source]
        source: ConnectionError,
    },

    #[error("failed to set the owner of {dest:?} to {owner}:{group}: {source}")]
    Chown {
        dest: String,
        owner: String,
        group: String,
        #[source]
        source: ConnectionError,
    },

    #[error("failed to update package lists: {0}")]
    PackageUpdate(#[source] ConnectionError),

    #[error("failed to {verb} package {package:?}: {source}")]
    Package {
        verb: &'static str,
        package: String,
        #[source]
        source: ConnectionError,
    },

    #[error("failed to {verb} service {service:?}: {source}")]
    Service {
        verb: &'static str,
        service: String,
        #[source]
        source: ConnectionError,
    },

    #[error("failed to run {command:?}: {source}")]
    Shell {
        command: String,
        #[source]
        source: ConnectionError,
    },

    #[error("failed to validate {url:?} after {attempts} attempt(s): {message}")]
    Validation {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("validation of {url:?} interrupted: {source}")]
    ValidationInterrupted {
        url: String,
        #[source]
        source: ConnectionError,
    },
}

impl ActionError {
    /// True if the action stopped because its context ended.
    pub fn is_cancellation(&self) -> bool {
        match self {
            ActionError::Copy { source, .. }
            | ActionError::Chown { source, .. }
            | ActionError::PackageUpdate(source)
            | ActionError::Package { source, .. }
            | ActionError::Service { source, .. }
            | ActionError::Shell { source, .. }
            | ActionError::ValidationInterrupted { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }
}

/// One step of a task.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    File(FileAction),
    Apt(AptAction),
    Service(ServiceAction),
    Shell(ShellAction),
    Validate(ValidateAction),
}

impl Action {
    /// Every recognised action kind.
    pub const KINDS: &'static [&'static str] = &["file", "apt", "service", "shell", "validate"];

    /// Decode the action found under key `kind`.
    pub fn decode(kind: &str, value: serde_yaml::Value) -> Result<Self, ActionError> {
        match kind {
            "file" => decode_as("file", value).map(Action::File),
            "apt" => decode_as("apt", value).map(Action::Apt),
            "service" => decode_as("service", value).map(Action::Service),
            "shell" => decode_as("shell", value).map(Action::Shell),
            "validate" => decode_as("validate", value).map(Action::Validate),
            other => Err(ActionError::UnknownKind(other.to_string())),
        }
    }

    /// The key this action was decoded from.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::File(_) => "file",
            Action::Apt(_) => "apt",
            Action::Service(_) => "service",
            Action::Shell(_) => "shell",
            Action::Validate(_) => "validate",
        }
    }

    /// Run the action against `conn`.
    pub async fn run(
        &self,
        ctx: &ExecContext,
        conn: &dyn Connection,
        config: &RunConfig,
    ) -> Result<(), ActionError> {
        match self {
            Action::File(action) => action.run(ctx, conn, config).await,
            Action::Apt(action) => action.run(ctx, conn).await,
            Action::Service(action) => action.run(ctx, conn).await,
            Action::Shell(action) => action.run(ctx, conn).await,
            Action::Validate(action) => action.run(ctx, conn).await,
        }
    }
}

fn decode_as<T>(kind: &'static str, value: serde_yaml::Value) -> Result<T, ActionError>
where
    T: serde::de::DeserializeOwned,
{
    serde_yaml::from_value(value).map_err(|e| ActionError::Decode {
        kind,
        message: e.to_string(),
    })
}
