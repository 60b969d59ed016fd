//! Cancellation context for remote operations.
//!
//! Every blocking operation in ferry (dialing, waiting on a remote command,
//! streaming a file, an HTTP validation round trip) takes an [`ExecContext`].
//! A context combines a [`CancellationToken`] with an optional deadline:
//!
//! - the process-wide context is created at startup and cancelled when an
//!   interrupt or termination signal arrives;
//! - each action runs under a child context created with
//!   [`ExecContext::with_timeout`], so either the parent cancellation or the
//!   per-action deadline ends it, whichever fires first.
//!
//! Dropping a child context releases it. Cancelling a child never affects
//! its parent.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a context is no longer live.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    /// The context (or one of its ancestors) was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The context's deadline passed.
    #[error("execution deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation token plus optional deadline.
#[derive(Debug, Clone)]
pub struct ExecContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for ExecContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecContext {
    /// Create a root context that is only ended by [`ExecContext::cancel`].
    pub fn new() -> Self {
        Self::from_token(CancellationToken::new())
    }

    /// Wrap an existing token.
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Derive a child context that also ends after `timeout`.
    ///
    /// The child's deadline never extends past the parent's.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let own = Instant::now().checked_add(timeout);
        let deadline = match (self.deadline, own) {
            (Some(parent), Some(own)) => Some(parent.min(own)),
            (parent, own) => parent.or(own),
        };

        Self {
            token: self.token.child_token(),
            deadline,
        }
    }

    /// Cancel this context and every context derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The underlying cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the reason this context ended, or `None` while it is live.
    ///
    /// Cancellation takes precedence over an expired deadline.
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            Some(ContextError::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(ContextError::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Returns true once the context has ended.
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Wait until the context ends and report why.
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => ContextError::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => {
                        // A cancel racing the deadline still reports as cancellation.
                        self.err().unwrap_or(ContextError::DeadlineExceeded)
                    }
                }
            }
            None => {
                self.token.cancelled().await;
                ContextError::Cancelled
            }
        }
    }

    /// Drive `fut` to completion unless the context ends first.
    ///
    /// An already-ended context fails immediately without polling `fut`.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, ContextError>
    where
        F: Future,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }

        tokio::select! {
            biased;
            err = self.done() => Err(err),
            out = fut => Ok(out),
        }
    }
}
