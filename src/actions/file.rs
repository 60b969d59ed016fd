//! file action - copy a local file to the host.
//!
//! ```yaml
//! file:
//!   src: files/index.php
//!   dest: /var/www/html/index.php
//!   owner: www-data
//!   group: www-data
//!   mode: "0644"
//! ```
//!
//! `src` is resolved against the playbook's folder. The content is pushed
//! with the scp sink protocol from a side task while `scp -qt` runs on the
//! host without a terminal. Ownership is changed afterwards with a separate
//! `chown`, only when both `owner` and `group` are set.

use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

use super::ActionError;
use crate::config::RunConfig;
use crate::connection::transfer::{self, DEFAULT_FILE_MODE};
use crate::connection::{run_command, Connection, ConnectionError, ConnectionExt, SideTask};
use crate::context::ExecContext;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileAction {
    pub src: String,
    pub dest: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
}

impl FileAction {
    /// Mode sent in the transfer header.
    pub fn mode(&self) -> &str {
        self.mode.as_deref().unwrap_or(DEFAULT_FILE_MODE)
    }

    /// Split `dest` into the remote directory and file name.
    pub fn destination(&self) -> Result<(String, String), ActionError> {
        if self.dest.ends_with('/') {
            return Err(ActionError::InvalidParameter(format!(
                "dest {:?} names a directory, not a file",
                self.dest
            )));
        }
        let dest = Path::new(&self.dest);
        let name = dest
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                ActionError::InvalidParameter(format!("dest {:?} does not name a file", self.dest))
            })?;
        let dir = match dest.parent().and_then(|p| p.to_str()) {
            Some("") | None => ".",
            Some(dir) => dir,
        };
        Ok((dir.to_string(), name.to_string()))
    }

    /// `chown` command line, if both owner and group are set.
    pub fn chown_command(&self) -> Option<String> {
        match (&self.owner, &self.group) {
            (Some(owner), Some(group)) => Some(format!(
                "chown {} {}",
                shell_words::quote(&format!("{}:{}", owner, group)),
                shell_words::quote(&self.dest)
            )),
            _ => None,
        }
    }

    pub async fn run(
        &self,
        ctx: &ExecContext,
        conn: &dyn Connection,
        config: &RunConfig,
    ) -> Result<(), ActionError> {
        let mode = self.mode().to_string();
        transfer::validate_mode(&mode).map_err(ActionError::InvalidParameter)?;
        let (dir, name) = self.destination()?;
        let source = config.playbook_folder.join(&self.src);

        debug!(host = %conn.address(), src = %source.display(), dest = %self.dest, "Copying file");

        let transfer_ctx = ctx.clone();
        conn.exec(ctx, false, move |session| {
            Box::pin(async move {
                let file = tokio::fs::File::open(&source).await.map_err(|e| {
                    ConnectionError::TransferFailed(format!(
                        "failed to open source file {}: {}",
                        source.display(),
                        e
                    ))
                })?;
                let size = file
                    .metadata()
                    .await
                    .map_err(|e| {
                        ConnectionError::TransferFailed(format!(
                            "failed to get source file info: {}",
                            e
                        ))
                    })?
                    .len();

                session.start(&transfer::receiver_command(&dir)).await?;

                let stdin = session.stdin();
                Ok::<_, ConnectionError>(Some(SideTask::spawn(async move {
                    transfer::send_file(&transfer_ctx, &stdin, file, size, &mode, &name).await
                })))
            })
        })
        .await
        .map_err(|source| ActionError::Copy {
            src: self.src.clone(),
            dest: self.dest.clone(),
            source,
        })?;

        match self.chown_command() {
            Some(command) => run_command(ctx, conn, true, command).await.map_err(|source| {
                ActionError::Chown {
                    dest: self.dest.clone(),
                    owner: self.owner.clone().unwrap_or_default(),
                    group: self.group.clone().unwrap_or_default(),
                    source,
                }
            }),
            None => {
                if self.owner.is_some() || self.group.is_some() {
                    warn!(
                        host = %conn.address(),
                        dest = %self.dest,
                        "Skipping chown: both owner and group are required"
                    );
                }
                Ok(())
            }
        }
    }
}
