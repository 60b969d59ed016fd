//! Russh-based SSH connection.
//!
//! Connections authenticate with a password and carry one channel per
//! [`Session`]. The russh channel is adapted to [`RemoteChannel`]: its
//! writer half becomes the session's stdin and its message stream is drained
//! by [`RemoteChannel::wait`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{Handle, Handler, Msg};
use russh::keys::key::PublicKey;
use russh::{Channel, ChannelMsg, Pty};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use super::session::{RemoteChannel, Session, StdinWriter};
use super::{Connection, ConnectionError, ConnectionResult, Dialer};
use crate::context::ExecContext;
use crate::inventory::Host;

/// Terminal modes: no echo, 14400 baud both ways.
const PTY_MODES: &[(Pty, u32)] = &[
    (Pty::ECHO, 0),
    (Pty::TTY_OP_ISPEED, 14400),
    (Pty::TTY_OP_OSPEED, 14400),
];

/// Bytes of command output kept for error messages.
const OUTPUT_TAIL: usize = 2048;

/// Client handler for russh.
///
/// Host keys are not verified.
struct ClientHandler {
    address: String,
}

#[async_trait]
impl Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        warn!(
            host = %self.address,
            fingerprint = %server_public_key.fingerprint(),
            "Accepting server host key without verification"
        );
        Ok(true)
    }
}

/// SSH connection to one host.
pub struct RusshConnection {
    host: Arc<Host>,
    handle: RwLock<Option<Handle<ClientHandler>>>,
}

impl RusshConnection {
    /// Connect and authenticate to `host`.
    ///
    /// The whole dial (TCP connect, handshake, authentication) is bounded by
    /// `connect_timeout` and aborted if `ctx` ends first.
    pub async fn dial(
        host: Arc<Host>,
        ctx: &ExecContext,
        connect_timeout: Duration,
    ) -> ConnectionResult<Self> {
        let handle = ctx
            .run(tokio::time::timeout(connect_timeout, Self::do_connect(&host)))
            .await?
            .map_err(|_| ConnectionError::Timeout(connect_timeout))??;

        debug!(host = %host.address(), user = %host.username, "SSH connection established");
        Ok(Self {
            host,
            handle: RwLock::new(Some(handle)),
        })
    }

    async fn do_connect(host: &Host) -> ConnectionResult<Handle<ClientHandler>> {
        let address = host.address();
        let socket = tokio::net::TcpStream::connect(&address)
            .await
            .map_err(|e| {
                ConnectionError::ConnectionFailed(format!("Failed to connect to {}: {}", address, e))
            })?;

        socket.set_nodelay(true).map_err(|e| {
            ConnectionError::ConnectionFailed(format!("Failed to set TCP_NODELAY: {}", e))
        })?;

        let config = Arc::new(russh::client::Config::default());
        let handler = ClientHandler {
            address: address.clone(),
        };

        let mut handle = russh::client::connect_stream(config, socket, handler)
            .await
            .map_err(|e| {
                ConnectionError::ConnectionFailed(format!("SSH handshake failed: {}", e))
            })?;

        let authenticated = handle
            .authenticate_password(&host.username, &host.password)
            .await
            .map_err(|e| {
                ConnectionError::AuthenticationFailed(format!(
                    "Password authentication failed: {}",
                    e
                ))
            })?;
        if !authenticated {
            return Err(ConnectionError::AuthenticationFailed(format!(
                "server rejected password for user '{}'",
                host.username
            )));
        }

        Ok(handle)
    }
}

#[async_trait]
impl Connection for RusshConnection {
    fn host(&self) -> &Arc<Host> {
        &self.host
    }

    async fn open_session(
        &self,
        ctx: &ExecContext,
        with_terminal: bool,
    ) -> ConnectionResult<Session> {
        let channel = {
            let guard = self.handle.read().await;
            let handle = guard.as_ref().ok_or(ConnectionError::ConnectionClosed)?;
            ctx.run(handle.channel_open_session())
                .await?
                .map_err(|e| {
                    ConnectionError::SessionSetup(format!("Failed to open channel: {}", e))
                })?
        };

        let channel = RusshChannel {
            channel,
            with_terminal,
            remote_closed: false,
        };
        Session::open(ctx, Box::new(channel), with_terminal, self.address()).await
    }

    async fn close(&self) -> ConnectionResult<()> {
        let handle = self.handle.write().await.take();
        if let Some(handle) = handle {
            debug!(host = %self.address(), "Closing SSH connection");
            handle
                .disconnect(
                    russh::Disconnect::ByApplication,
                    "Connection closed by client",
                    "en",
                )
                .await?;
        }
        Ok(())
    }
}

/// A russh session channel.
struct RusshChannel {
    channel: Channel<Msg>,
    with_terminal: bool,
    remote_closed: bool,
}

#[async_trait]
impl RemoteChannel for RusshChannel {
    async fn request_pty(&mut self) -> ConnectionResult<()> {
        self.channel
            .request_pty(false, "xterm", 80, 40, 0, 0, PTY_MODES)
            .await
            .map_err(|e| {
                ConnectionError::SessionSetup(format!("Failed to request pseudo terminal: {}", e))
            })
    }

    fn take_stdin(&mut self) -> ConnectionResult<StdinWriter> {
        Ok(Box::pin(self.channel.make_writer()))
    }

    async fn exec(&mut self, command: &str) -> ConnectionResult<()> {
        self.channel.exec(true, command).await.map_err(|e| {
            ConnectionError::ExecutionFailed(format!("Failed to execute command: {}", e))
        })
    }

    async fn wait(&mut self) -> ConnectionResult<()> {
        let mut output = OutputTail::default();
        let mut exit_status = None;
        let mut exit_signal = None;

        while let Some(msg) = self.channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => output.push(data),
                ChannelMsg::ExtendedData { ref data, ext } => {
                    if ext == 1 {
                        output.push(data);
                    }
                }
                ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    exit_signal = Some(format!("{:?}", signal_name))
                }
                ChannelMsg::Failure => {
                    return Err(ConnectionError::ExecutionFailed(
                        "remote end rejected the command".to_string(),
                    ));
                }
                ChannelMsg::Close => break,
                _ => {}
            }
        }
        self.remote_closed = true;

        let output = output.into_string();
        if !output.is_empty() {
            trace!(terminal = self.with_terminal, output = %output, "Remote command output");
        }

        match (exit_status, exit_signal) {
            (Some(0), _) => Ok(()),
            (Some(status), _) => Err(ConnectionError::ExitStatus { status, output }),
            (None, Some(signal)) => Err(ConnectionError::ExitSignal { signal }),
            (None, None) => Err(ConnectionError::ExecutionFailed(
                "channel closed without an exit status".to_string(),
            )),
        }
    }

    async fn close(&mut self) -> ConnectionResult<()> {
        match self.channel.close().await {
            Ok(()) => Ok(()),
            // The remote end already tore the channel down.
            Err(_) if self.remote_closed => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Last bytes of a command's output.
#[derive(Default)]
struct OutputTail {
    bytes: Vec<u8>,
}

impl OutputTail {
    fn push(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
        if self.bytes.len() > OUTPUT_TAIL {
            let excess = self.bytes.len() - OUTPUT_TAIL;
            self.bytes.drain(..excess);
        }
    }

    fn into_string(self) -> String {
        String::from_utf8_lossy(&self.bytes).trim().to_string()
    }
}

/// Dials [`RusshConnection`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct SshDialer;

#[async_trait]
impl Dialer for SshDialer {
    async fn dial(
        &self,
        host: Arc<Host>,
        ctx: &ExecContext,
        timeout: Duration,
    ) -> ConnectionResult<Arc<dyn Connection>> {
        let conn = RusshConnection::dial(host, ctx, timeout).await?;
        Ok(Arc::new(conn))
    }
}
