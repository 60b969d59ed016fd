//! service action - control a system service.
//!
//! ```yaml
//! service:
//!   name: apache2
//!   state: restart
//! ```

use serde::Deserialize;

use super::ActionError;
use crate::connection::{run_command, Connection};
use crate::context::ExecContext;

/// Desired service transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    #[serde(alias = "started")]
    Start,
    #[serde(alias = "stopped")]
    Stop,
    #[serde(alias = "restarted")]
    Restart,
    #[serde(alias = "reloaded")]
    Reload,
}

impl ServiceState {
    pub fn verb(&self) -> &'static str {
        match self {
            ServiceState::Start => "start",
            ServiceState::Stop => "stop",
            ServiceState::Restart => "restart",
            ServiceState::Reload => "reload",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceAction {
    pub name: String,
    pub state: ServiceState,
}

impl ServiceAction {
    /// Remote command line.
    pub fn command(&self) -> String {
        format!("service {} {}", shell_words::quote(&self.name), self.state.verb())
    }

    pub async fn run(&self, ctx: &ExecContext, conn: &dyn Connection) -> Result<(), ActionError> {
        run_command(ctx, conn, true, self.command())
            .await
            .map_err(|source| ActionError::Service {
                verb: self.state.verb(),
                service: self.name.clone(),
                source,
            })
    }
}
