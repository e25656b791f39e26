//! Cancellation and wake-up flags shared between the controller's loops
//!
//! Both flags are plain atomics that loops poll once per iteration. A `Notify` rides
//! along so a loop that is idle can sleep until the flag changes instead of spinning.
//! Signal delivery is kept at the edge in [`spawn_signal_listener`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use eyre::Result;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Process-wide shutdown flag
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    set: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown; idempotent
    pub fn trigger(&self) {
        debug!("ShutdownFlag::trigger: called");
        self.set.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::SeqCst)
    }

    /// Wait until shutdown has been requested
    pub async fn triggered(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

/// Wake-up from the dispatch engine to the relay bridge
///
/// Each [`raise`](Self::raise) accounts for one pending relay message; each successful
/// [`take`](Self::take) consumes one. Raises are counted rather than coalesced so two
/// events enqueued back to back are both drained.
#[derive(Debug, Clone, Default)]
pub struct RelayWake {
    pending: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl RelayWake {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal that a message for the relay bridge was enqueued
    pub fn raise(&self) {
        let pending = self.pending.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(pending, "RelayWake::raise");
        self.notify.notify_one();
    }

    /// Consume one wake-up if any is pending
    pub fn take(&self) -> bool {
        self.pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Number of wake-ups not yet taken
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Wait for the next raise
    ///
    /// May return without a pending wake-up; callers re-check with [`take`](Self::take).
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// Set `flag` when the process receives SIGINT or SIGTERM (Ctrl+C off Unix)
///
/// Handlers are installed before this returns, so a signal arriving right after is
/// not lost.
pub fn spawn_signal_listener(flag: ShutdownFlag) -> Result<JoinHandle<()>> {
    debug!("spawn_signal_listener: setting up signal handlers");

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        Ok(tokio::spawn(async move {
            tokio::select! {
                _ = sigint.recv() => {
                    warn!("SIGINT received");
                }
                _ = sigterm.recv() => {
                    warn!("SIGTERM received");
                }
                _ = flag.triggered() => {
                    debug!("spawn_signal_listener: shutdown requested elsewhere");
                    return;
                }
            }
            flag.trigger();
        }))
    }

    #[cfg(not(unix))]
    {
        Ok(tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        warn!(error = %e, "Failed to listen for ctrl_c");
                    }
                    warn!("Ctrl+C received");
                }
                _ = flag.triggered() => return,
            }
            flag.trigger();
        }))
    }
}
