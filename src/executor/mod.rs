//! Batch scheduler.
//!
//! The inventory is processed in slices of `max_concurrent_connections`
//! hosts. For each slice the executor:
//!
//! 1. dials every host of the slice concurrently, recording dial failures
//!    as unreachable;
//! 2. spawns one task per live connection, each running the whole playbook
//!    against its host and recording the outcome on the host;
//! 3. waits for every task of the slice;
//! 4. closes every connection of the slice.
//!
//! Slices run strictly one after another, so no more than
//! `max_concurrent_connections` connections are ever open at once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tracing::{debug, error, info, instrument, warn};

use crate::config::RunConfig;
use crate::connection::{Connection, Dialer, SshDialer};
use crate::context::ExecContext;
use crate::error::Error;
use crate::inventory::{Host, HostOutcome, Inventory};
use crate::playbook::Playbook;

/// Outcome of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Slices processed
    pub batches: usize,
    /// Hosts the playbook completed on
    pub completed: Vec<String>,
    /// Hosts the playbook failed on
    pub failed: Vec<String>,
    /// Hosts that could not be dialed
    pub unreachable: Vec<String>,
    /// Hosts with no recorded outcome
    pub pending: Vec<String>,
    /// Wall-clock duration of the run
    pub duration: Duration,
}

impl RunSummary {
    fn collect(inventory: &Inventory, batches: usize, duration: Duration) -> Self {
        Self {
            batches,
            completed: inventory.completed(),
            failed: inventory.failed(),
            unreachable: inventory.unreachable(),
            pending: inventory.pending(),
            duration,
        }
    }

    /// True if every host completed.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.unreachable.is_empty() && self.pending.is_empty()
    }
}

/// Drives a playbook across an inventory.
pub struct Executor {
    config: RunConfig,
    dialer: Arc<dyn Dialer>,
}

impl Executor {
    /// Create an executor that dials over SSH.
    pub fn new(config: RunConfig) -> Self {
        Self::with_dialer(config, Arc::new(SshDialer))
    }

    /// Create an executor with a custom dialer.
    pub fn with_dialer(config: RunConfig, dialer: Arc<dyn Dialer>) -> Self {
        Self { config, dialer }
    }

    /// The run configuration.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Slices of the inventory processed together.
    pub fn batches<'a>(&self, inventory: &'a Inventory) -> std::slice::Chunks<'a, Arc<Host>> {
        inventory
            .hosts()
            .chunks(self.config.max_concurrent_connections.get())
    }

    /// Run `playbook` on every host of `inventory`.
    ///
    /// Outcomes are recorded on the hosts; the returned summary is read back
    /// from them. Cancelling `ctx` makes every remaining dial and action fail
    /// fast, but the remaining slices are still walked.
    #[instrument(skip_all, fields(hosts = inventory.len()))]
    pub async fn run(
        &self,
        ctx: &ExecContext,
        playbook: Arc<Playbook>,
        inventory: &Inventory,
    ) -> RunSummary {
        let start = Instant::now();
        let mut batches = 0;

        for (index, batch) in self.batches(inventory).enumerate() {
            batches += 1;
            let addresses: Vec<String> = batch.iter().map(|h| h.address()).collect();
            info!(
                batch = index + 1,
                "Running playbook on servers: {}",
                addresses.join(", ")
            );

            let connections = self.connect_batch(ctx, batch).await;
            if connections.is_empty() {
                debug!(batch = index + 1, "No reachable servers in batch");
                continue;
            }

            self.run_batch(ctx, &playbook, &connections).await;
            self.close_batch(&connections).await;
        }

        RunSummary::collect(inventory, batches, start.elapsed())
    }

    async fn connect_batch(
        &self,
        ctx: &ExecContext,
        batch: &[Arc<Host>],
    ) -> Vec<Arc<dyn Connection>> {
        let dials = batch.iter().map(|host| async move {
            match self
                .dialer
                .dial(Arc::clone(host), ctx, self.config.connect_timeout)
                .await
            {
                Ok(conn) => Some(conn),
                Err(source) => {
                    let err = Error::Dial {
                        host: host.address(),
                        source,
                    };
                    warn!(host = %host.address(), "{}", err);
                    host.record(HostOutcome::Unreachable(err));
                    None
                }
            }
        });

        join_all(dials).await.into_iter().flatten().collect()
    }

    async fn run_batch(
        &self,
        ctx: &ExecContext,
        playbook: &Arc<Playbook>,
        connections: &[Arc<dyn Connection>],
    ) {
        let handles: Vec<_> = connections
            .iter()
            .map(|conn| {
                let conn = Arc::clone(conn);
                let playbook = Arc::clone(playbook);
                let ctx = ctx.clone();
                let config = self.config.clone();

                tokio::spawn(async move {
                    let outcome = match playbook.run(&ctx, conn.as_ref(), &config).await {
                        Ok(()) => {
                            info!(host = %conn.address(), "Playbook completed");
                            HostOutcome::Completed
                        }
                        Err(err) => HostOutcome::Failed(err),
                    };
                    conn.host().record(outcome);
                })
            })
            .collect();

        for (conn, joined) in connections.iter().zip(join_all(handles).await) {
            if let Err(e) = joined {
                error!(host = %conn.address(), error = %e, "Playbook task aborted");
                conn.host().record(HostOutcome::Failed(Error::HostTaskPanicked {
                    host: conn.address(),
                    message: e.to_string(),
                }));
            }
        }
    }

    async fn close_batch(&self, connections: &[Arc<dyn Connection>]) {
        for conn in connections {
            if let Err(e) = conn.close().await {
                warn!(host = %conn.address(), error = %e, "Failed to close connection");
            }
        }
    }
}
