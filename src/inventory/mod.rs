//! Inventory management for ferry.
//!
//! An inventory is an ordered list of hosts loaded from a YAML sequence:
//!
//! ```yaml
//! - host: gondor
//!   username: isildur
//!   password: secret
//! - host: mordor
//!   port: 4444
//!   username: sauron
//!   password: "thou shalt not pass"
//! ```
//!
//! Hosts are shared as `Arc<Host>` so the scheduler and the connection that
//! runs against a host can both record and read its outcome.

pub mod host;

pub use host::{Host, HostOutcome};

use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};

/// The ordered set of hosts a playbook runs against.
#[derive(Debug, Default)]
pub struct Inventory {
    hosts: Vec<Arc<Host>>,
}

impl Inventory {
    /// Create an inventory from hosts, keeping their order.
    pub fn new(hosts: impl IntoIterator<Item = Host>) -> Self {
        Self {
            hosts: hosts.into_iter().map(Arc::new).collect(),
        }
    }

    /// Load an inventory from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::inventory_load(path, format!("failed to read file: {}", e)))?;

        Self::parse(&content).map_err(|message| Error::inventory_load(path, message))
    }

    /// Parse an inventory from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self> {
        Self::parse(content).map_err(|message| Error::inventory_load("<inline>", message))
    }

    fn parse(content: &str) -> std::result::Result<Self, String> {
        // An empty document is an empty inventory.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let hosts: Vec<Host> = serde_yaml::from_str(content).map_err(|e| e.to_string())?;
        for (index, host) in hosts.iter().enumerate() {
            if host.host.trim().is_empty() {
                return Err(format!("entry {} has an empty 'host' field", index + 1));
            }
        }

        Ok(Self::new(hosts))
    }

    /// All hosts, in inventory order.
    pub fn hosts(&self) -> &[Arc<Host>] {
        &self.hosts
    }

    /// Number of hosts.
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// True if the inventory has no hosts.
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Addresses of every host, in inventory order.
    pub fn addresses(&self) -> Vec<String> {
        self.hosts.iter().map(|h| h.address()).collect()
    }

    /// Addresses of hosts the playbook completed on.
    pub fn completed(&self) -> Vec<String> {
        self.select(Host::is_completed)
    }

    /// Addresses of hosts the playbook failed on.
    pub fn failed(&self) -> Vec<String> {
        self.select(Host::is_failed)
    }

    /// Addresses of hosts that could not be dialed.
    pub fn unreachable(&self) -> Vec<String> {
        self.select(Host::is_unreachable)
    }

    /// Addresses of hosts with no recorded outcome.
    pub fn pending(&self) -> Vec<String> {
        self.select(Host::is_pending)
    }

    fn select(&self, predicate: impl Fn(&Host) -> bool) -> Vec<String> {
        self.hosts
            .iter()
            .filter(|h| predicate(h))
            .map(|h| h.address())
            .collect()
    }
}
