//! Shutdown coordination for the gateway edge.
//!
//! The first SIGTERM or SIGINT fans out over a broadcast channel: the serve
//! loop stops accepting and keeps polling the server future so in-flight
//! proxy requests finish, bounded by the drain window. When the window
//! elapses the remaining connections are abandoned so span and counter
//! flushing can still happen before exit.

use std::{
    future::Future,
    sync::{
        OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use eyre::Result;
use tokio::{signal, sync::broadcast, time::timeout};

/// How long in-flight requests may keep running once shutdown begins.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// What triggered the shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGTERM or SIGINT arrived.
    Signal,
    /// Requested programmatically (tests, admin tooling).
    Requested,
}

/// Coordinates one shutdown across the listener, the signal handler and any
/// background tasks. The first cause wins; later ones are ignored.
pub struct GracefulShutdown {
    tx: broadcast::Sender<ShutdownReason>,
    initiated: AtomicBool,
    reason: OnceLock<ShutdownReason>,
    drain_timeout: Duration,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        Self::with_drain_timeout(DEFAULT_DRAIN_TIMEOUT)
    }

    pub fn with_drain_timeout(drain_timeout: Duration) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            tx,
            initiated: AtomicBool::new(false),
            reason: OnceLock::new(),
            drain_timeout,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.tx.subscribe()
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.initiated.load(Ordering::Relaxed)
    }

    /// Begin shutting down. Returns true when this call was the one that
    /// initiated it; duplicate causes are dropped.
    pub fn shutdown(&self, reason: ShutdownReason) -> bool {
        if self
            .initiated
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            tracing::debug!(?reason, "shutdown already in progress, ignoring");
            return false;
        }

        tracing::info!(?reason, "shutdown initiated");
        let _ = self.reason.set(reason);
        let _ = self.tx.send(reason);
        true
    }

    /// Block on SIGTERM/SIGINT and translate the first one into a shutdown.
    pub async fn run_signal_handler(&self) -> Result<()> {
        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("SIGINT received");
            }
            _ = sigterm() => {
                tracing::info!("SIGTERM received");
            }
        }

        self.shutdown(ShutdownReason::Signal);
        Ok(())
    }

    /// Wait until someone initiates shutdown.
    pub async fn wait_for_shutdown_signal(&self) -> ShutdownReason {
        let mut rx = self.subscribe();
        // Subscribing may have happened after the broadcast; the flag and
        // stored reason cover that interleaving.
        if self.is_shutdown_initiated() {
            return *self.reason.get().unwrap_or(&ShutdownReason::Requested);
        }
        match rx.recv().await {
            Ok(reason) => reason,
            Err(_) => {
                tracing::warn!("shutdown channel closed, treating as a shutdown request");
                ShutdownReason::Requested
            }
        }
    }

    /// Give in-flight work the drain window to finish.
    ///
    /// Returns the work's output when it completed in time, `None` when the
    /// deadline expired and the remaining connections were abandoned. Either
    /// way the caller proceeds to flush spans and counters.
    pub async fn drain<F, T>(&self, in_flight: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        match timeout(self.drain_timeout, in_flight).await {
            Ok(output) => {
                tracing::info!("in-flight requests drained");
                Some(output)
            }
            Err(_) => {
                tracing::warn!(
                    drain_timeout = ?self.drain_timeout,
                    "drain window elapsed, abandoning remaining connections"
                );
                None
            }
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut stream = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
    stream.recv().await;
}

#[cfg(not(unix))]
async fn sigterm() {
    // Only Ctrl+C is available off Unix.
    std::future::pending::<()>().await;
}
