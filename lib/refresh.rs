//! Reloading the snapshot while the filesystem stays mounted.
//!
//! A refresh request is only a message. [`RefreshTrigger::request`] never blocks, so it is safe to
//! call from a signal listener; the actual work happens on the [`RefreshWorker`] thread:
//!
//! 1. claim the refresh, so a concurrent one coalesces;
//! 2. load a complete snapshot from the [`DataSource`] while operations keep serving the old one;
//! 3. close the barrier and wait for in-flight operations to drain;
//! 4. publish the new snapshot with one pointer swap;
//! 5. reopen the barrier.
//!
//! The barrier is only closed around the swap, so nothing that runs while it is closed depends on
//! the runtime's blocking pool that filesystem operations run on. If the load fails the claim is
//! dropped, the barrier is never closed and the previous snapshot keeps serving.
//!
//! Requests posted while the worker is refreshing fold into that refresh: once it finishes the
//! worker discards whatever is queued instead of loading again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{Level, debug, enabled, error, info, trace, warn};

use crate::fs::DbFs;
use crate::snapshot::Snapshot;
use crate::source::{DataSource, LoadPolicy, SourceError};
use crate::sync::CoordinatorError;

/// Why a refresh did not publish.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// The data source could not produce a snapshot.
    #[error("source unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),

    /// The filesystem is shutting down.
    #[error("the filesystem is shutting down")]
    ShuttingDown,
}

impl From<CoordinatorError> for RefreshError {
    fn from(e: CoordinatorError) -> Self {
        match e {
            CoordinatorError::ShuttingDown => Self::ShuttingDown,
        }
    }
}

/// What a successful refresh attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefreshOutcome {
    /// A new snapshot was published.
    Published {
        /// Number of tables in the new snapshot.
        tables: usize,
    },
    /// Another refresh was already claimed; this request folded into it.
    Coalesced,
}

/// Runs one refresh to completion on the calling thread.
///
/// Blocks while the load runs on `runtime` and then while in-flight operations drain. Must not
/// be called from inside an async context.
pub fn refresh_once<S: DataSource>(
    fs: &DbFs,
    source: &S,
    policy: &LoadPolicy,
    runtime: &Handle,
) -> Result<RefreshOutcome, RefreshError> {
    let Some(claim) = fs.coordinator().try_claim_refresh()? else {
        debug!("refresh already running, coalescing");
        return Ok(RefreshOutcome::Coalesced);
    };

    // On error the claim drops here and the barrier was never closed.
    let snapshot = runtime.block_on(source.load(policy))?;
    log_snapshot(&snapshot);

    let tables = snapshot.len();
    let gate = claim.begin()?;
    fs.publish(&gate, snapshot);
    gate.complete();
    Ok(RefreshOutcome::Published { tables })
}

/// Logs a summary line per table at debug level, and the table content at trace level.
pub fn log_snapshot(snapshot: &Snapshot) {
    if !enabled!(Level::DEBUG) {
        return;
    }
    for entry in snapshot.iter() {
        debug!(
            table = entry.name(),
            rows = entry.row_count(),
            bytes = entry.size(),
            "table loaded"
        );
        trace!(
            table = entry.name(),
            content = %String::from_utf8_lossy(entry.content()),
            "table content"
        );
    }
}

/// Cheap, cloneable handle for asking the worker to refresh.
#[derive(Debug, Clone)]
pub struct RefreshTrigger {
    tx: mpsc::Sender<()>,
}

impl RefreshTrigger {
    /// Posts a refresh request without blocking.
    ///
    /// Returns `true` if the request was queued and `false` if one was already pending or the
    /// worker is gone. A request queued while a refresh is running is served by that refresh.
    pub fn request(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(())) => {
                debug!("refresh already pending");
                false
            }
            Err(mpsc::error::TrySendError::Closed(())) => {
                warn!("refresh worker has stopped, ignoring request");
                false
            }
        }
    }
}

/// Owns the dedicated refresh thread.
#[derive(Debug)]
pub struct RefreshWorker {
    trigger: RefreshTrigger,
    stop: Arc<AtomicBool>,
    handled: watch::Receiver<u64>,
    thread: Option<JoinHandle<()>>,
}

impl RefreshWorker {
    /// Spawns the worker thread. Loads run on `runtime`.
    pub fn spawn<S: DataSource>(
        fs: Arc<DbFs>,
        source: Arc<S>,
        policy: LoadPolicy,
        runtime: Handle,
    ) -> std::io::Result<Self> {
        // One slot: any number of requests that arrive while one is pending collapse into it.
        // Whatever is still queued when a refresh ends arrived during it and is discarded.
        let (tx, mut rx) = mpsc::channel::<()>(1);
        let (handled_tx, handled) = watch::channel(0_u64);
        let stop = Arc::new(AtomicBool::new(false));

        let thread_stop = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("dbfs-refresh".to_owned())
            .spawn(move || {
                while rx.blocking_recv().is_some() {
                    if thread_stop.load(Ordering::Acquire) {
                        break;
                    }
                    info!("refreshing tables");
                    match refresh_once(&fs, &*source, &policy, &runtime) {
                        Ok(RefreshOutcome::Published { tables }) => {
                            info!(tables, "refresh complete");
                        }
                        Ok(RefreshOutcome::Coalesced) => {}
                        Err(RefreshError::ShuttingDown) => break,
                        Err(e) => error!(error = %e, "refresh failed, keeping current tables"),
                    }
                    let mut folded = false;
                    while rx.try_recv().is_ok() {
                        folded = true;
                    }
                    if folded {
                        debug!("dropping refresh request posted during the refresh");
                    }
                    handled_tx.send_modify(|n| *n += 1);
                    if thread_stop.load(Ordering::Acquire) {
                        break;
                    }
                }
                debug!("refresh worker exiting");
            })?;

        Ok(Self {
            trigger: RefreshTrigger { tx },
            stop,
            handled,
            thread: Some(thread),
        })
    }

    /// A handle for posting refresh requests.
    #[must_use]
    pub fn trigger(&self) -> RefreshTrigger {
        self.trigger.clone()
    }

    /// Watches the number of requests the worker has finished handling, whatever their outcome.
    #[must_use]
    pub fn handled(&self) -> watch::Receiver<u64> {
        self.handled.clone()
    }

    /// Stops the worker and waits for it to exit.
    ///
    /// A refresh that is already loading finishes first. Call
    /// [`RefreshCoordinator::shutdown`](crate::sync::RefreshCoordinator::shutdown) beforehand to
    /// abort one still waiting for operations to drain.
    pub fn shutdown(mut self) {
        self.signal_stop();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("refresh worker panicked");
        }
    }

    fn signal_stop(&self) {
        self.stop.store(true, Ordering::Release);
        // Wakes the thread if idle; if the slot is full it is about to wake anyway.
        let _ = self.trigger.tx.try_send(());
    }
}

impl Drop for RefreshWorker {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.signal_stop();
        }
    }
}
