//! Connection layer for remote host communication.
//!
//! This module provides the transport abstraction every action runs through.
//!
//! # Overview
//!
//! A [`Connection`] is one authenticated link to a host. It is a factory for
//! [`Session`]s: each session carries exactly one remote command, its stdin,
//! an optional pseudo-terminal and a cancellation watcher that forwards the
//! ambient [`ExecContext`] to the remote process.
//!
//! Actions do not drive sessions directly. They call [`ConnectionExt::exec`],
//! which opens a session, lets the caller start the command (and optionally
//! spawn one concurrent [`SideTask`], such as a file streamer), waits for
//! both, always closes the session, and folds every failure into a single
//! [`ConnectionError`].
//!
//! # Example
//!
//! ```rust,ignore
//! use ferry::connection::{ConnectionError, ConnectionExt, SideTask};
//!
//! conn.exec(&ctx, true, |session| {
//!     Box::pin(async move {
//!         session.start("service apache2 restart").await?;
//!         Ok::<Option<SideTask>, ConnectionError>(None)
//!     })
//! })
//! .await?;
//! ```

/// Pure Rust SSH implementation using russh.
pub mod russh;

/// Remote sessions and the cancellation watcher.
pub mod session;

/// scp sink protocol.
pub mod transfer;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::context::{ContextError, ExecContext};
use crate::inventory::Host;

pub use self::russh::{RusshConnection, SshDialer};
pub use session::{RemoteChannel, Session, Stdin, StdinWriter};

/// Errors that can occur during connection operations.
#[derive(Error, Debug)]
pub enum ConnectionError {
    // ------------------------------------------------------------------------
    // Dial
    // ------------------------------------------------------------------------
    /// TCP connect or SSH handshake failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The server rejected the credentials.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Dial did not finish within the connect timeout.
    #[error("Connection timeout after {0:?}")]
    Timeout(Duration),

    // ------------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------------
    /// Channel open or pseudo-terminal request failed.
    #[error("Session setup failed: {0}")]
    SessionSetup(String),

    /// The scp protocol failed.
    #[error("File transfer failed: {0}")]
    TransferFailed(String),

    /// The remote command exited non-zero.
    #[error("Remote command exited with status {status}{}", describe_output(.output))]
    ExitStatus {
        /// Exit status
        status: u32,
        /// Tail of the command's output
        output: String,
    },

    /// The remote command was killed by a signal.
    #[error("Remote command killed by signal {signal}")]
    ExitSignal {
        /// Signal name
        signal: String,
    },

    /// The remote command could not be run or did not report a status.
    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    /// Transport-level SSH error.
    #[error("SSH error: {0}")]
    SshError(String),

    /// The connection was already closed.
    #[error("Connection closed")]
    ConnectionClosed,

    // ------------------------------------------------------------------------
    // exec composition
    // ------------------------------------------------------------------------
    /// The exec body failed before the command could be awaited.
    #[error("Failed to start remote command: {0}")]
    Start(#[source] Box<ConnectionError>),

    /// The command succeeded but its side task failed.
    #[error("Side task failed: {0}")]
    SideTask(#[source] Box<ConnectionError>),

    /// Both the command and its side task failed.
    #[error("{command}; side task also failed: {side}")]
    Combined {
        /// Remote command error
        command: Box<ConnectionError>,
        /// Side task error
        side: Box<ConnectionError>,
    },

    /// An error that occurred while the context was ending.
    #[error("{source} ({cause})")]
    Interrupted {
        /// Why the context ended
        cause: ContextError,
        /// The error observed
        #[source]
        source: Box<ConnectionError>,
    },

    /// The context ended; no other error was observed.
    #[error("{0}")]
    Cancelled(#[from] ContextError),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

fn describe_output(output: &str) -> String {
    if output.is_empty() {
        String::new()
    } else {
        format!(": {}", output)
    }
}

impl From<::russh::Error> for ConnectionError {
    fn from(err: ::russh::Error) -> Self {
        ConnectionError::SshError(err.to_string())
    }
}

impl ConnectionError {
    /// Annotate this error with the reason the context ended.
    ///
    /// Errors that already carry a context error are returned unchanged.
    pub fn interrupted(self, cause: ContextError) -> Self {
        if self.is_cancellation() {
            return self;
        }
        ConnectionError::Interrupted {
            cause,
            source: Box::new(self),
        }
    }

    /// Returns the context error if this failure came from cancellation or a deadline.
    pub fn context_error(&self) -> Option<ContextError> {
        match self {
            ConnectionError::Cancelled(cause) | ConnectionError::Interrupted { cause, .. } => {
                Some(*cause)
            }
            ConnectionError::Start(inner) | ConnectionError::SideTask(inner) => {
                inner.context_error()
            }
            ConnectionError::Combined { command, side } => {
                command.context_error().or_else(|| side.context_error())
            }
            _ => None,
        }
    }

    /// True if this failure came from cancellation or a deadline.
    pub fn is_cancellation(&self) -> bool {
        self.context_error().is_some()
    }
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Boxed future returned by an [`ConnectionExt::exec`] body.
pub type ExecBody<'a> = BoxFuture<'a, ConnectionResult<Option<SideTask>>>;

/// A concurrent task launched by an exec body, joined after the remote command.
///
/// Dropping an unjoined side task aborts it.
#[derive(Debug)]
pub struct SideTask {
    handle: JoinHandle<ConnectionResult<()>>,
}

impl SideTask {
    /// Spawn `fut` on the runtime.
    pub fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = ConnectionResult<()>> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(fut),
        }
    }

    /// Wait for the task to finish.
    pub async fn join(mut self) -> ConnectionResult<()> {
        match (&mut self.handle).await {
            Ok(result) => result,
            Err(e) => Err(ConnectionError::ExecutionFailed(format!(
                "side task did not finish: {}",
                e
            ))),
        }
    }
}

impl Drop for SideTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// One authenticated transport link to a host.
#[async_trait]
pub trait Connection: Send + Sync {
    /// The host this connection belongs to.
    fn host(&self) -> &Arc<Host>;

    /// `host:port` of the remote end.
    fn address(&self) -> String {
        self.host().address()
    }

    /// Open a session, requesting a pseudo-terminal if `with_terminal` is set.
    async fn open_session(
        &self,
        ctx: &ExecContext,
        with_terminal: bool,
    ) -> ConnectionResult<Session>;

    /// Close the connection. Closing twice is a no-op.
    async fn close(&self) -> ConnectionResult<()>;
}

/// Runs a remote command with an optional concurrent side task.
#[async_trait]
pub trait ConnectionExt: Connection {
    /// Open a session, run `body` to start the command, then wait.
    ///
    /// The session is closed before this returns, whatever the outcome.
    /// A body error is returned as [`ConnectionError::Start`] and the command
    /// is never awaited. If the context ended the result is
    /// [`ConnectionError::Cancelled`] when nothing else failed, or the
    /// observed error wrapped in [`ConnectionError::Interrupted`].
    async fn exec<F>(&self, ctx: &ExecContext, with_terminal: bool, body: F) -> ConnectionResult<()>
    where
        F: for<'s> FnOnce(&'s mut Session) -> ExecBody<'s> + Send;
}

#[async_trait]
impl<C: Connection + ?Sized> ConnectionExt for C {
    async fn exec<F>(&self, ctx: &ExecContext, with_terminal: bool, body: F) -> ConnectionResult<()>
    where
        F: for<'s> FnOnce(&'s mut Session) -> ExecBody<'s> + Send,
    {
        let mut session = self.open_session(ctx, with_terminal).await?;
        let outcome = drive(&mut session, body).await;

        if let Err(e) = session.close().await {
            warn!(host = %self.address(), error = %e, "Failed to close session");
        }

        match (outcome, ctx.err()) {
            (Ok(()), None) => Ok(()),
            (Ok(()), Some(cause)) => Err(ConnectionError::Cancelled(cause)),
            (Err(e), None) => Err(e),
            (Err(e), Some(cause)) => Err(e.interrupted(cause)),
        }
    }
}

async fn drive<F>(session: &mut Session, body: F) -> ConnectionResult<()>
where
    F: for<'s> FnOnce(&'s mut Session) -> ExecBody<'s> + Send,
{
    let side = body(session)
        .await
        .map_err(|e| ConnectionError::Start(Box::new(e)))?;

    let command = session.wait().await;
    let side = match side {
        Some(task) => task.join().await,
        None => Ok(()),
    };

    match (command, side) {
        (Ok(()), Ok(())) => Ok(()),
        (Err(command), Ok(())) => Err(command),
        (Ok(()), Err(side)) => Err(ConnectionError::SideTask(Box::new(side))),
        (Err(command), Err(side)) => Err(ConnectionError::Combined {
            command: Box::new(command),
            side: Box::new(side),
        }),
    }
}

/// Run a single command line through [`ConnectionExt::exec`].
pub async fn run_command(
    ctx: &ExecContext,
    conn: &dyn Connection,
    with_terminal: bool,
    command: String,
) -> ConnectionResult<()> {
    conn.exec(ctx, with_terminal, move |session| {
        Box::pin(async move {
            session.start(&command).await?;
            Ok::<_, ConnectionError>(None)
        })
    })
    .await
}

/// Creates connections for the scheduler.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Dial `host`, bounded by `timeout` and aborted if `ctx` ends.
    async fn dial(
        &self,
        host: Arc<Host>,
        ctx: &ExecContext,
        timeout: Duration,
    ) -> ConnectionResult<Arc<dyn Connection>>;
}
