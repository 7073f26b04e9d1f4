//! Background sync engine.
//!
//! [`BackgroundSync`] owns the [`Dispatcher`] and runs every cycle on one
//! tokio task. Callers talk to it through a cloneable [`SyncHandle`], which is
//! also the production [`SyncScheduler`] handed to the authority.
//!
//! Requests that pile up while a cycle is running are coalesced into a single
//! follow-up cycle: each cycle reads the full directory afresh, so nothing
//! queued is lost by merging.

use std::time::Duration;

use tokio::{
    sync::{mpsc, oneshot},
    time::{Interval, MissedTickBehavior, interval},
};
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::dispatcher::{CycleReport, Dispatcher};
use super::error::SyncError;
use super::scheduler::{SyncReason, SyncScheduler};
use crate::Result;

/// Capacity of the command channel between handles and the engine.
const COMMAND_BUFFER: usize = 100;

/// Commands that can be sent to the background sync engine
pub enum SyncCommand {
    /// Run a cycle. `response` receives the report when the caller wants it.
    RunCycle {
        reason: SyncReason,
        response: Option<oneshot::Sender<Result<CycleReport>>>,
    },
    /// Respond once everything queued before this command has finished.
    Flush {
        response: oneshot::Sender<Result<()>>,
    },
    /// Stop the engine after the current command.
    Shutdown,
}

// oneshot::Sender has no useful Debug output
impl std::fmt::Debug for SyncCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RunCycle { reason, response } => f
                .debug_struct("RunCycle")
                .field("reason", reason)
                .field("awaited", &response.is_some())
                .finish(),
            Self::Flush { .. } => write!(f, "Flush"),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// Everything a single cycle has to answer, gathered while coalescing.
#[derive(Default)]
struct CycleBatch {
    reasons: Vec<SyncReason>,
    reporters: Vec<oneshot::Sender<Result<CycleReport>>>,
    flushes: Vec<oneshot::Sender<Result<()>>>,
    shutdown: bool,
}

impl CycleBatch {
    fn absorb(&mut self, command: SyncCommand) {
        match command {
            SyncCommand::RunCycle { reason, response } => {
                self.reasons.push(reason);
                self.reporters.extend(response);
            }
            SyncCommand::Flush { response } => self.flushes.push(response),
            SyncCommand::Shutdown => self.shutdown = true,
        }
    }
}

/// Background sync engine that owns the dispatcher.
pub struct BackgroundSync {
    dispatcher: Dispatcher,
    resync_interval: Option<Duration>,
    command_rx: mpsc::Receiver<SyncCommand>,
}

impl BackgroundSync {
    /// Spawn the engine on the current tokio runtime and return a handle to it.
    ///
    /// The engine stops on [`SyncHandle::shutdown`] or once every handle is dropped.
    pub fn start(dispatcher: Dispatcher) -> SyncHandle {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let background = Self {
            resync_interval: dispatcher.config().resync_interval,
            dispatcher,
            command_rx: rx,
        };

        tokio::spawn(background.run());
        SyncHandle { command_tx: tx }
    }

    /// Main event loop that handles all sync operations
    async fn run(mut self) {
        async move {
            info!("Starting background sync engine");

            let mut periodic = self.resync_interval.map(|period| {
                let mut timer = interval(period);
                timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                timer
            });
            // Skip the immediate first tick
            if let Some(timer) = periodic.as_mut() {
                timer.tick().await;
            }

            loop {
                tokio::select! {
                    command = self.command_rx.recv() => {
                        // None: every handle dropped
                        let Some(command) = command else { break };
                        let mut batch = CycleBatch::default();
                        batch.absorb(command);
                        if !self.process(batch).await {
                            break;
                        }
                    }

                    _ = next_tick(&mut periodic) => {
                        let batch = CycleBatch {
                            reasons: vec![SyncReason::Periodic],
                            ..Default::default()
                        };
                        if !self.process(batch).await {
                            break;
                        }
                    }
                }
            }
            info!("Background sync engine shutting down");
        }
        .instrument(info_span!("background_sync"))
        .await
    }

    /// Run at most one cycle for everything in `batch` plus whatever else is
    /// already queued. Returns false when the engine should stop.
    async fn process(&mut self, mut batch: CycleBatch) -> bool {
        while let Ok(command) = self.command_rx.try_recv() {
            batch.absorb(command);
        }

        if !batch.reasons.is_empty() {
            debug!(reasons = ?batch.reasons, "Running coalesced sync cycle");
            match self.dispatcher.run_cycle().await {
                Ok(report) => {
                    for reporter in batch.reporters {
                        let _ = reporter.send(Ok(report.clone()));
                    }
                }
                Err(e) => {
                    error!("Sync cycle failed: {e}");
                    let reason = e.to_string();
                    for reporter in batch.reporters {
                        let _ = reporter.send(Err(SyncError::CycleFailed(reason.clone()).into()));
                    }
                }
            }
        }

        for flush in batch.flushes {
            let _ = flush.send(Ok(()));
        }

        !batch.shutdown
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Cloneable front end to a running [`BackgroundSync`].
#[derive(Debug, Clone)]
pub struct SyncHandle {
    command_tx: mpsc::Sender<SyncCommand>,
}

impl SyncHandle {
    async fn send(&self, command: SyncCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|e| SyncError::CommandSendError(e.to_string()).into())
    }

    /// Run a cycle now and wait for its report.
    pub async fn run_cycle(&self, reason: SyncReason) -> Result<CycleReport> {
        let (tx, rx) = oneshot::channel();
        self.send(SyncCommand::RunCycle {
            reason,
            response: Some(tx),
        })
        .await?;
        rx.await.map_err(|_| SyncError::EngineStopped)?
    }

    /// Wait until every command queued before this call has been handled.
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(SyncCommand::Flush { response: tx }).await?;
        rx.await.map_err(|_| SyncError::EngineStopped)?
    }

    /// Ask the engine to stop after whatever it is doing.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(SyncCommand::Shutdown).await
    }

    /// Check whether the engine is still accepting commands.
    pub fn is_running(&self) -> bool {
        !self.command_tx.is_closed()
    }
}

impl SyncScheduler for SyncHandle {
    fn schedule(&self, reason: SyncReason) {
        match self.command_tx.try_send(SyncCommand::RunCycle {
            reason,
            response: None,
        }) {
            Ok(()) => debug!(%reason, "Sync cycle scheduled"),
            // A full queue already holds cycles that will carry this change.
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(%reason, "Sync queue full, relying on queued cycles")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(%reason, "Background sync engine stopped, change not scheduled")
            }
        }
    }
}
