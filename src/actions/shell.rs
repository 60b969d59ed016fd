//! shell action - run a command line as written.
//!
//! ```yaml
//! shell: rm -f /var/www/html/index.html
//! ```

use serde::Deserialize;

use super::ActionError;
use crate::connection::{run_command, Connection};
use crate::context::ExecContext;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ShellAction {
    command: String,
}

impl ShellAction {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub async fn run(&self, ctx: &ExecContext, conn: &dyn Connection) -> Result<(), ActionError> {
        run_command(ctx, conn, true, self.command.clone())
            .await
            .map_err(|source| ActionError::Shell {
                command: self.command.clone(),
                source,
            })
    }
}
