//! # ferry - a minimal playbook runner over SSH
//!
//! ferry runs an ordered list of remote operations (a playbook) against a
//! fleet of hosts, a bounded number at a time. Each host runs the playbook
//! independently: a failure stops that host only. An interrupt or
//! termination signal is forwarded to every remote command still running.
//!
//! ## Core Concepts
//!
//! - **Inventory**: the ordered list of hosts, each with its run outcome
//! - **Playbook**: ordered tasks; each task is an ordered list of actions
//! - **Actions**: `file`, `apt`, `service`, `shell` and `validate`
//! - **Connections**: one SSH link per host, opening one session per command
//! - **ExecContext**: cancellation plus deadline, threaded through every
//!   blocking operation
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           CLI Interface                              │
//! │          (clap parsing, config file merge, signal handling)          │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          Batch Scheduler                             │
//! │        (dial a slice, one tokio task per host, join, close)          │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     Playbook → Task → Action                         │
//! │            (sequential, per-action timeout, first failure stops)     │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      Connection / Session                            │
//! │     (russh channel, stdin close gate, interrupt watcher, scp sink)   │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ferry::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Settings::default().into_run_config("site.yaml")?;
//!     let inventory = Inventory::from_file(&config.inventory)?;
//!     let playbook = Arc::new(Playbook::from_file(&config.playbook).await?);
//!
//!     let summary = Executor::new(config)
//!         .run(&ExecContext::new(), playbook, &inventory)
//!         .await;
//!
//!     println!("completed: {:?}", summary.completed);
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    // Actions
    pub use crate::actions::{Action, ActionError};

    // Configuration
    pub use crate::config::{RunConfig, Settings};

    // Connections
    pub use crate::connection::{
        Connection, ConnectionError, ConnectionExt, ConnectionResult, Dialer, RusshConnection,
        Session, SideTask, SshDialer,
    };

    // Cancellation
    pub use crate::context::{ContextError, ExecContext};

    // Error handling
    pub use crate::error::{Error, Result};

    // Execution engine
    pub use crate::executor::{Executor, RunSummary};

    // Inventory
    pub use crate::inventory::{Host, HostOutcome, Inventory};

    // Playbooks
    pub use crate::playbook::{Playbook, Task};
}

// ============================================================================
// Core Modules
// ============================================================================

/// Error types and result aliases for ferry operations.
pub mod error;

/// Cancellation tokens with deadlines.
///
/// Every blocking operation takes an [`ExecContext`](context::ExecContext);
/// cancelling the process-wide context reaches every live remote command.
pub mod context;

/// Run configuration: defaults, TOML file and command-line overrides.
pub mod config;

// ============================================================================
// Playbook Components
// ============================================================================

/// Playbook parsing and per-host execution.
pub mod playbook;

/// The action kinds a task can contain.
pub mod actions;

// ============================================================================
// Infrastructure
// ============================================================================

/// Connection layer for remote host communication.
///
/// This module provides the [`Connection`](connection::Connection) trait, the
/// russh implementation, remote sessions with interrupt forwarding, and the
/// scp sink protocol used by the `file` action.
pub mod connection;

/// Host inventory and per-host run outcomes.
pub mod inventory;

// ============================================================================
// Execution Engine
// ============================================================================

/// Batched concurrent execution of a playbook across the inventory.
pub mod executor;

// ============================================================================
// Version Information
// ============================================================================

/// Returns the current version of ferry.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
