//! apt action - manage Debian packages.
//!
//! ```yaml
//! apt:
//!   state: install
//!   pkg: [apache2, php]
//! ```
//!
//! Refreshes the package lists, then runs one `apt-get` per package so a
//! failure names the package that caused it.

use serde::Deserialize;
use tracing::debug;

use super::ActionError;
use crate::connection::{run_command, Connection};
use crate::context::ExecContext;

/// Desired package state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AptState {
    #[serde(alias = "installed", alias = "present")]
    Install,
    #[serde(alias = "removed", alias = "absent")]
    Remove,
    Purge,
    #[serde(alias = "latest")]
    Upgrade,
}

impl AptState {
    /// `apt-get` subcommand for this state.
    pub fn verb(&self) -> &'static str {
        match self {
            AptState::Install => "install",
            AptState::Remove => "remove",
            AptState::Purge => "purge",
            AptState::Upgrade => "upgrade",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AptAction {
    pub state: AptState,
    #[serde(default)]
    pub pkg: Vec<String>,
}

impl AptAction {
    /// Remote command lines, in execution order.
    pub fn commands(&self) -> Vec<String> {
        std::iter::once("apt-get update".to_string())
            .chain(self.pkg.iter().map(|pkg| self.package_command(pkg)))
            .collect()
    }

    fn package_command(&self, pkg: &str) -> String {
        format!("apt-get {} -y {}", self.state.verb(), shell_words::quote(pkg))
    }

    pub async fn run(&self, ctx: &ExecContext, conn: &dyn Connection) -> Result<(), ActionError> {
        let mut commands = self.commands().into_iter();

        if let Some(update) = commands.next() {
            run_command(ctx, conn, true, update)
                .await
                .map_err(ActionError::PackageUpdate)?;
        }

        for (pkg, command) in self.pkg.iter().zip(commands) {
            debug!(host = %conn.address(), package = %pkg, state = self.state.verb(), "Managing package");
            run_command(ctx, conn, true, command)
                .await
                .map_err(|source| ActionError::Package {
                    verb: self.state.verb(),
                    package: pkg.clone(),
                    source,
                })?;
        }

        Ok(())
    }
}
