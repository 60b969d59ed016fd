//! Shared test utilities for the ferry test suite.
//!
//! This module provides an in-memory transport:
//! - [`FakeChannel`]: a [`RemoteChannel`] recording what the session does
//! - [`FakeConnection`]: a [`Connection`] handing out fake channels
//! - [`FakeDialer`]: a [`Dialer`] with unreachable hosts and open-connection
//!   accounting
//!
//! Remote commands are scripted by substring through [`Script`].
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

use ferry::connection::session::INTERRUPT;
use ferry::connection::{
    Connection, ConnectionError, ConnectionResult, Dialer, RemoteChannel, Session, StdinWriter,
};
use ferry::context::ExecContext;
use ferry::inventory::Host;

// ============================================================================
// Scripted behavior
// ============================================================================

/// How fake remote commands behave, matched by substring.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Commands exiting with status 1
    pub fail_on: Vec<String>,
    /// Commands running until their stdin is closed
    pub block_on: Vec<String>,
    /// Reject pseudo-terminal requests
    pub pty_fails: bool,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(mut self, pattern: impl Into<String>) -> Self {
        self.fail_on.push(pattern.into());
        self
    }

    pub fn block_on(mut self, pattern: impl Into<String>) -> Self {
        self.block_on.push(pattern.into());
        self
    }

    pub fn pty_fails(mut self) -> Self {
        self.pty_fails = true;
        self
    }

    fn fails(&self, command: &str) -> bool {
        self.fail_on.iter().any(|p| command.contains(p.as_str()))
    }

    fn blocks(&self, command: &str) -> bool {
        command.starts_with("scp ") || self.block_on.iter().any(|p| command.contains(p.as_str()))
    }
}

// ============================================================================
// Channel
// ============================================================================

/// Everything observed on one fake channel.
#[derive(Debug, Default)]
pub struct ChannelLog {
    pub command: Mutex<Option<String>>,
    pub stdin: Mutex<Vec<u8>>,
    pub stdin_shutdowns: AtomicUsize,
    pub pty_requested: AtomicBool,
    pub waited: AtomicBool,
    pub succeeded: AtomicBool,
    pub closes: AtomicUsize,
    stdin_closed: CancellationToken,
}

impl ChannelLog {
    pub fn command(&self) -> Option<String> {
        self.command.lock().clone()
    }

    pub fn stdin_bytes(&self) -> Vec<u8> {
        self.stdin.lock().clone()
    }

    pub fn interrupted(&self) -> bool {
        self.stdin.lock().contains(&INTERRUPT)
    }

    pub fn stdin_shutdowns(&self) -> usize {
        self.stdin_shutdowns.load(Ordering::SeqCst)
    }

    pub fn was_waited(&self) -> bool {
        self.waited.load(Ordering::SeqCst)
    }

    pub fn was_successful(&self) -> bool {
        self.succeeded.load(Ordering::SeqCst)
    }

    pub fn has_terminal(&self) -> bool {
        self.pty_requested.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

struct FakeStdin {
    log: Arc<ChannelLog>,
}

impl AsyncWrite for FakeStdin {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.log.stdin.lock().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.log.stdin_shutdowns.fetch_add(1, Ordering::SeqCst);
        self.log.stdin_closed.cancel();
        Poll::Ready(Ok(()))
    }
}

/// A [`RemoteChannel`] that runs nothing and records everything.
pub struct FakeChannel {
    log: Arc<ChannelLog>,
    script: Arc<Script>,
    stdin_taken: bool,
}

impl FakeChannel {
    pub fn new(script: Arc<Script>) -> (Self, Arc<ChannelLog>) {
        let log = Arc::new(ChannelLog::default());
        let channel = Self {
            log: Arc::clone(&log),
            script,
            stdin_taken: false,
        };
        (channel, log)
    }
}

#[async_trait]
impl RemoteChannel for FakeChannel {
    async fn request_pty(&mut self) -> ConnectionResult<()> {
        if self.script.pty_fails {
            return Err(ConnectionError::SessionSetup(
                "pty request rejected".to_string(),
            ));
        }
        self.log.pty_requested.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn take_stdin(&mut self) -> ConnectionResult<StdinWriter> {
        if self.stdin_taken {
            return Err(ConnectionError::SessionSetup(
                "stdin already taken".to_string(),
            ));
        }
        self.stdin_taken = true;
        Ok(Box::pin(FakeStdin {
            log: Arc::clone(&self.log),
        }))
    }

    async fn exec(&mut self, command: &str) -> ConnectionResult<()> {
        *self.log.command.lock() = Some(command.to_string());
        Ok(())
    }

    async fn wait(&mut self) -> ConnectionResult<()> {
        self.log.waited.store(true, Ordering::SeqCst);
        let command = self.log.command().unwrap_or_default();

        if self.script.blocks(&command) {
            self.log.stdin_closed.cancelled().await;
        }

        if self.script.fails(&command) {
            return Err(ConnectionError::ExitStatus {
                status: 1,
                output: format!("{}: failed", command),
            });
        }

        if self.log.has_terminal() && self.log.interrupted() {
            return Err(ConnectionError::ExitStatus {
                status: 130,
                output: String::new(),
            });
        }

        self.log.succeeded.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) -> ConnectionResult<()> {
        self.log.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Connection
// ============================================================================

/// A [`Connection`] opening [`FakeChannel`]s.
pub struct FakeConnection {
    host: Arc<Host>,
    script: Arc<Script>,
    channels: Mutex<Vec<Arc<ChannelLog>>>,
    closed: AtomicBool,
    closes: AtomicUsize,
    open: Arc<AtomicUsize>,
}

impl FakeConnection {
    pub fn new(host: Arc<Host>, script: Script) -> Self {
        Self::with_counter(host, Arc::new(script), Arc::new(AtomicUsize::new(1)))
    }

    fn with_counter(host: Arc<Host>, script: Arc<Script>, open: Arc<AtomicUsize>) -> Self {
        Self {
            host,
            script,
            channels: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            closes: AtomicUsize::new(0),
            open,
        }
    }

    /// Logs of every channel opened, in order.
    pub fn channels(&self) -> Vec<Arc<ChannelLog>> {
        self.channels.lock().clone()
    }

    /// Commands started, in order.
    pub fn commands(&self) -> Vec<String> {
        self.channels().iter().filter_map(|c| c.command()).collect()
    }

    /// Commands that exited successfully, in order.
    pub fn successful_commands(&self) -> Vec<String> {
        self.channels()
            .iter()
            .filter(|c| c.was_successful())
            .filter_map(|c| c.command())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for FakeConnection {
    fn host(&self) -> &Arc<Host> {
        &self.host
    }

    async fn open_session(
        &self,
        ctx: &ExecContext,
        with_terminal: bool,
    ) -> ConnectionResult<Session> {
        if let Some(cause) = ctx.err() {
            return Err(ConnectionError::Cancelled(cause));
        }

        let (channel, log) = FakeChannel::new(Arc::clone(&self.script));
        self.channels.lock().push(log);
        Session::open(ctx, Box::new(channel), with_terminal, self.address()).await
    }

    async fn close(&self) -> ConnectionResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

// ============================================================================
// Dialer
// ============================================================================

/// A [`Dialer`] creating [`FakeConnection`]s.
#[derive(Default)]
pub struct FakeDialer {
    unreachable: HashSet<String>,
    scripts: HashMap<String, Script>,
    dial_delay: Option<Duration>,
    open: Arc<AtomicUsize>,
    max_open: AtomicUsize,
    dialed: Mutex<Vec<Arc<FakeConnection>>>,
}

impl FakeDialer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse connections to `host`.
    pub fn unreachable(mut self, host: impl Into<String>) -> Self {
        self.unreachable.insert(host.into());
        self
    }

    /// Script the commands run on `host`.
    pub fn script(mut self, host: impl Into<String>, script: Script) -> Self {
        self.scripts.insert(host.into(), script);
        self
    }

    /// Delay every dial.
    pub fn dial_delay(mut self, delay: Duration) -> Self {
        self.dial_delay = Some(delay);
        self
    }

    /// Most connections open at the same time.
    pub fn max_open(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }

    /// Connections currently open.
    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Every connection created, in dial completion order.
    pub fn connections(&self) -> Vec<Arc<FakeConnection>> {
        self.dialed.lock().clone()
    }

    /// The connection created for `host`.
    pub fn connection(&self, host: &str) -> Option<Arc<FakeConnection>> {
        self.dialed
            .lock()
            .iter()
            .find(|c| c.host().host == host)
            .cloned()
    }
}

#[async_trait]
impl Dialer for FakeDialer {
    async fn dial(
        &self,
        host: Arc<Host>,
        ctx: &ExecContext,
        _timeout: Duration,
    ) -> ConnectionResult<Arc<dyn Connection>> {
        if let Some(delay) = self.dial_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(cause) = ctx.err() {
            return Err(ConnectionError::Cancelled(cause));
        }
        if self.unreachable.contains(&host.host) {
            return Err(ConnectionError::ConnectionFailed(format!(
                "Failed to connect to {}: connection refused",
                host.address()
            )));
        }

        let script = self.scripts.get(&host.host).cloned().unwrap_or_default();
        let now_open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open.fetch_max(now_open, Ordering::SeqCst);

        let conn = Arc::new(FakeConnection::with_counter(
            host,
            Arc::new(script),
            Arc::clone(&self.open),
        ));
        self.dialed.lock().push(Arc::clone(&conn));
        Ok(conn as Arc<dyn Connection>)
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// A host with the given name on the default port.
pub fn host(name: &str) -> Arc<Host> {
    Arc::new(Host::new(name))
}

/// Write `content` to `name` under `dir` and return the path.
pub fn write_fixture(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}
