//! Remote sessions.
//!
//! A [`Session`] wraps one transport channel carrying one remote command.
//! It owns:
//!
//! - the command's stdin, exposed as a cloneable [`Stdin`] handle whose
//!   close gate lets any number of callers close it while only the first
//!   one reaches the transport;
//! - an optional pseudo-terminal;
//! - a watcher task parented to the session. When the [`ExecContext`] ends
//!   the watcher writes the interrupt byte (only with a pseudo-terminal,
//!   where the remote line discipline turns it into SIGINT) and then closes
//!   stdin. Closing or dropping the session stops the watcher.
//!
//! Interrupt forwarding is best effort: a remote process that ignores
//! SIGINT and never reads stdin keeps running until the channel closes.

use std::io;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::{ConnectionError, ConnectionResult};
use crate::context::{ContextError, ExecContext};

/// The byte a terminal sends for Ctrl-C.
pub const INTERRUPT: u8 = 0x03;

/// Writer half of a remote command's stdin.
pub type StdinWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Transport channel able to run one remote command.
///
/// Implemented over russh by the SSH connection; tests provide their own.
#[async_trait]
pub trait RemoteChannel: Send {
    /// Request a pseudo-terminal for the command.
    async fn request_pty(&mut self) -> ConnectionResult<()>;

    /// Take the stdin writer. Called once, before the command starts.
    fn take_stdin(&mut self) -> ConnectionResult<StdinWriter>;

    /// Start `command` without waiting for it.
    async fn exec(&mut self, command: &str) -> ConnectionResult<()>;

    /// Wait for the command to finish.
    ///
    /// A non-zero exit status, an exit signal or a channel closed without a
    /// status are errors.
    async fn wait(&mut self) -> ConnectionResult<()>;

    /// Close the channel.
    async fn close(&mut self) -> ConnectionResult<()>;
}

/// Cloneable handle to a remote command's stdin.
#[derive(Clone)]
pub struct Stdin {
    writer: Arc<Mutex<Option<StdinWriter>>>,
}

impl Stdin {
    /// Wrap a writer.
    pub fn new(writer: StdinWriter) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Some(writer))),
        }
    }

    /// Write all of `buf`.
    pub async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let mut guard = self.writer.lock().await;
        match guard.as_mut() {
            Some(writer) => writer.write_all(buf).await,
            None => Err(closed()),
        }
    }

    /// Copy `reader` to stdin until it is exhausted. Returns the bytes copied.
    pub async fn copy_from<R>(&self, reader: &mut R) -> io::Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut guard = self.writer.lock().await;
        match guard.as_mut() {
            Some(writer) => tokio::io::copy(reader, writer).await,
            None => Err(closed()),
        }
    }

    /// Flush buffered bytes.
    pub async fn flush(&self) -> io::Result<()> {
        let mut guard = self.writer.lock().await;
        match guard.as_mut() {
            Some(writer) => writer.flush().await,
            None => Err(closed()),
        }
    }

    /// Close stdin. Only the first call reaches the writer.
    pub async fn close(&self) -> io::Result<()> {
        let writer = self.writer.lock().await.take();
        match writer {
            Some(mut writer) => writer.shutdown().await,
            None => Ok(()),
        }
    }

    /// True once stdin was closed.
    pub async fn is_closed(&self) -> bool {
        self.writer.lock().await.is_none()
    }
}

impl std::fmt::Debug for Stdin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stdin").finish_non_exhaustive()
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "stdin already closed")
}

struct Watcher {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Watcher {
    fn spawn(ctx: ExecContext, stdin: Stdin, with_terminal: bool, address: String) -> Self {
        let (stop, stopped) = oneshot::channel();
        let handle = tokio::spawn(watch(ctx, stdin, with_terminal, address, stopped));
        Self { stop, handle }
    }
}

async fn watch(
    ctx: ExecContext,
    stdin: Stdin,
    with_terminal: bool,
    address: String,
    stopped: oneshot::Receiver<()>,
) {
    let cause = tokio::select! {
        cause = ctx.done() => cause,
        _ = stopped => return,
    };

    if with_terminal {
        if let Err(e) = stdin.write_all(&[INTERRUPT]).await {
            if e.kind() != io::ErrorKind::BrokenPipe {
                warn!(host = %address, error = %e, "Failed to send interrupt to remote command");
            }
        }
    }

    if let Err(e) = stdin.close().await {
        warn!(host = %address, error = %e, "Failed to close remote stdin");
    }

    match cause {
        ContextError::DeadlineExceeded => {
            warn!(host = %address, "Execution deadline exceeded, interrupted remote command")
        }
        ContextError::Cancelled => {
            debug!(host = %address, "Execution cancelled, interrupted remote command")
        }
    }
}

/// One remote command on one channel.
pub struct Session {
    channel: Box<dyn RemoteChannel>,
    stdin: Stdin,
    with_terminal: bool,
    command: Option<String>,
    watcher: Option<Watcher>,
    address: String,
}

impl Session {
    /// Set up a session over `channel` and start its watcher.
    ///
    /// `address` labels the session in logs.
    pub async fn open(
        ctx: &ExecContext,
        mut channel: Box<dyn RemoteChannel>,
        with_terminal: bool,
        address: impl Into<String>,
    ) -> ConnectionResult<Self> {
        let address = address.into();
        let writer = channel.take_stdin()?;

        if with_terminal {
            if let Err(e) = channel.request_pty().await {
                if let Err(close_err) = channel.close().await {
                    debug!(host = %address, error = %close_err, "Failed to close channel");
                }
                return Err(e);
            }
        }

        let stdin = Stdin::new(writer);
        let watcher = Watcher::spawn(ctx.clone(), stdin.clone(), with_terminal, address.clone());

        Ok(Self {
            channel,
            stdin,
            with_terminal,
            command: None,
            watcher: Some(watcher),
            address,
        })
    }

    /// Start `command` on the remote host without waiting for it.
    ///
    /// A session runs one command; a second call is rejected.
    pub async fn start(&mut self, command: &str) -> ConnectionResult<()> {
        if let Some(running) = &self.command {
            return Err(ConnectionError::ExecutionFailed(format!(
                "session already started {:?}",
                running
            )));
        }

        trace!(host = %self.address, command = %command, "Starting remote command");
        self.channel.exec(command).await?;
        self.command = Some(command.to_string());
        Ok(())
    }

    /// Handle to the command's stdin.
    pub fn stdin(&self) -> Stdin {
        self.stdin.clone()
    }

    /// Close stdin. Safe to call any number of times.
    pub async fn close_stdin(&self) -> ConnectionResult<()> {
        self.stdin.close().await.map_err(ConnectionError::from)
    }

    /// Wait for the started command to finish.
    pub async fn wait(&mut self) -> ConnectionResult<()> {
        if self.command.is_none() {
            return Err(ConnectionError::ExecutionFailed(
                "no remote command was started".to_string(),
            ));
        }
        self.channel.wait().await
    }

    /// The command started on this session, if any.
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    /// True if a pseudo-terminal was requested.
    pub fn has_terminal(&self) -> bool {
        self.with_terminal
    }

    /// Address of the remote end.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Stop the watcher, close stdin, then close the channel.
    ///
    /// Returns the first error observed.
    pub async fn close(mut self) -> ConnectionResult<()> {
        if let Some(watcher) = self.watcher.take() {
            // The receiver is gone if the watcher already fired.
            let _ = watcher.stop.send(());
            if let Err(e) = watcher.handle.await {
                debug!(host = %self.address, error = %e, "Session watcher ended abnormally");
            }
        }

        let stdin = self.stdin.close().await.map_err(ConnectionError::from);
        let channel = self.channel.close().await;
        stdin.and(channel)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            let _ = watcher.stop.send(());
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.address)
            .field("with_terminal", &self.with_terminal)
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};

    #[derive(Default)]
    struct Recorded {
        bytes: parking_lot::Mutex<Vec<u8>>,
        shutdowns: AtomicUsize,
    }

    struct RecordingWriter(Arc<Recorded>);

    impl AsyncWrite for RecordingWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.0.bytes.lock().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            self.0.shutdowns.fetch_add(1, Ordering::SeqCst);
            Poll::Ready(Ok(()))
        }
    }

    fn recording_stdin() -> (Stdin, Arc<Recorded>) {
        let recorded = Arc::new(Recorded::default());
        let stdin = Stdin::new(Box::pin(RecordingWriter(Arc::clone(&recorded))));
        (stdin, recorded)
    }

    #[tokio::test]
    async fn test_stdin_closes_once() {
        let (stdin, recorded) = recording_stdin();
        let other = stdin.clone();

        stdin.close().await.unwrap();
        other.close().await.unwrap();
        stdin.close().await.unwrap();

        assert_eq!(recorded.shutdowns.load(Ordering::SeqCst), 1);
        assert!(other.is_closed().await);
    }

    #[tokio::test]
    async fn test_write_after_close_is_broken_pipe() {
        let (stdin, recorded) = recording_stdin();
        stdin.write_all(b"abc").await.unwrap();
        stdin.close().await.unwrap();

        let err = stdin.write_all(b"def").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(recorded.bytes.lock().as_slice(), b"abc");
    }

    #[tokio::test]
    async fn test_copy_from_counts_bytes() {
        let (stdin, recorded) = recording_stdin();
        let mut source: &[u8] = b"hello world";

        let copied = stdin.copy_from(&mut source).await.unwrap();

        assert_eq!(copied, 11);
        assert_eq!(recorded.bytes.lock().as_slice(), b"hello world");
    }

    #[tokio::test]
    async fn test_watcher_interrupts_terminal_on_cancel() {
        let (stdin, recorded) = recording_stdin();
        let ctx = ExecContext::new();
        let watcher = Watcher::spawn(ctx.clone(), stdin.clone(), true, "gondor:22".into());

        ctx.cancel();
        watcher.handle.await.unwrap();

        assert_eq!(recorded.bytes.lock().as_slice(), &[INTERRUPT]);
        assert_eq!(recorded.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_watcher_without_terminal_only_closes_stdin() {
        let (stdin, recorded) = recording_stdin();
        let ctx = ExecContext::new().with_timeout(std::time::Duration::from_millis(5));
        let watcher = Watcher::spawn(ctx, stdin, false, "gondor:22".into());

        watcher.handle.await.unwrap();

        assert!(recorded.bytes.lock().is_empty());
        assert_eq!(recorded.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stopped_watcher_leaves_stdin_open() {
        let (stdin, recorded) = recording_stdin();
        let ctx = ExecContext::new();
        let watcher = Watcher::spawn(ctx.clone(), stdin.clone(), true, "gondor:22".into());

        watcher.stop.send(()).unwrap();
        watcher.handle.await.unwrap();
        ctx.cancel();

        assert!(!stdin.is_closed().await);
        assert_eq!(recorded.shutdowns.load(Ordering::SeqCst), 0);
    }
}
