//! Host definition for the ferry inventory.
//!
//! A [`Host`] is one target machine: where to reach it, how to log in, and
//! the terminal outcome of the current run.

use std::fmt;

use once_cell::sync::OnceCell;
use serde::Deserialize;
use tracing::warn;

use crate::error::Error;

/// Terminal outcome of a host for one run.
#[derive(Debug)]
pub enum HostOutcome {
    /// Every task of the playbook succeeded.
    Completed,
    /// The playbook stopped on a failed action.
    Failed(Error),
    /// The host could not be dialed.
    Unreachable(Error),
}

impl HostOutcome {
    /// The recorded error, if the outcome is not a success.
    pub fn error(&self) -> Option<&Error> {
        match self {
            HostOutcome::Completed => None,
            HostOutcome::Failed(err) | HostOutcome::Unreachable(err) => Some(err),
        }
    }

    /// Short label used in logs and reports.
    pub fn label(&self) -> &'static str {
        match self {
            HostOutcome::Completed => "completed",
            HostOutcome::Failed(_) => "failed",
            HostOutcome::Unreachable(_) => "unreachable",
        }
    }
}

/// A managed host.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Host {
    /// Hostname or IP address
    pub host: String,

    /// SSH port (default: 22, also used for 0)
    #[serde(default = "default_ssh_port", deserialize_with = "deserialize_port")]
    pub port: u16,

    /// Login user
    #[serde(default)]
    pub username: String,

    /// Login password
    #[serde(default)]
    pub password: String,

    #[serde(skip)]
    outcome: OnceCell<HostOutcome>,
}

fn default_ssh_port() -> u16 {
    22
}

fn or_default_port(port: u16) -> u16 {
    if port == 0 {
        default_ssh_port()
    } else {
        port
    }
}

fn deserialize_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: serde::Deserializer<'de>,
{
    u16::deserialize(deserializer).map(or_default_port)
}

impl Host {
    /// Create a new host on the default SSH port.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_ssh_port(),
            username: String::new(),
            password: String::new(),
            outcome: OnceCell::new(),
        }
    }

    /// Set the SSH port. Port 0 selects the default.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = or_default_port(port);
        self
    }

    /// Set login credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Dialable address, `host:port`.
    ///
    /// IPv6 literals are bracketed.
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Record the terminal outcome of this host.
    ///
    /// Only the first call takes effect; later calls are logged and
    /// return `false`.
    pub fn record(&self, outcome: HostOutcome) -> bool {
        match self.outcome.set(outcome) {
            Ok(()) => true,
            Err(rejected) => {
                warn!(
                    host = %self.address(),
                    rejected = rejected.label(),
                    current = self.outcome.get().map(HostOutcome::label).unwrap_or("pending"),
                    "Ignoring second outcome for host"
                );
                false
            }
        }
    }

    /// The recorded outcome, or `None` while the host is pending.
    pub fn outcome(&self) -> Option<&HostOutcome> {
        self.outcome.get()
    }

    /// The recorded error, if any.
    pub fn error(&self) -> Option<&Error> {
        self.outcome().and_then(HostOutcome::error)
    }

    /// True once the playbook completed on this host.
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome(), Some(HostOutcome::Completed))
    }

    /// True if the playbook failed on this host.
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome(), Some(HostOutcome::Failed(_)))
    }

    /// True if the host could not be dialed.
    pub fn is_unreachable(&self) -> bool {
        matches!(self.outcome(), Some(HostOutcome::Unreachable(_)))
    }

    /// True while no outcome has been recorded.
    pub fn is_pending(&self) -> bool {
        self.outcome().is_none()
    }
}

// The password never reaches logs.
impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("outcome", &self.outcome.get())
            .finish()
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}
