//! Cooperative stop signalling for the tick loop.
//!
//! A [`StopSignal`] is a cloneable latch: the first trigger wins and every
//! waiter, present or future, observes it. OS signals (SIGTERM/SIGINT) are
//! mapped onto the same latch by [`install_signal_handlers`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Why a stop was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// SIGTERM signal received
    Sigterm,
    /// SIGINT signal received (Ctrl+C)
    Sigint,
    /// Programmatic stop requested
    Programmatic,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sigterm => write!(f, "SIGTERM"),
            Self::Sigint => write!(f, "SIGINT"),
            Self::Programmatic => write!(f, "PROGRAMMATIC"),
        }
    }
}

/// Cloneable one-shot stop latch.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<Option<StopReason>>>,
}

impl StopSignal {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Request a stop. Returns `false` if one was already requested.
    pub fn trigger(&self, reason: StopReason) -> bool {
        let fired = self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        if fired {
            info!(reason = %reason, "Stop requested");
        } else {
            info!(reason = %reason, "Stop already requested, ignoring duplicate");
        }
        fired
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.tx.borrow().is_some()
    }

    #[must_use]
    pub fn reason(&self) -> Option<StopReason> {
        *self.tx.borrow()
    }

    /// Wait until a stop is requested.
    pub async fn wait(&self) -> StopReason {
        let mut rx = self.tx.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).unwrap_or(StopReason::Programmatic),
            // The sender lives in `self`, so the channel cannot close here.
            Err(_) => StopReason::Programmatic,
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Install OS signal handlers (SIGTERM, SIGINT) that trigger `stop`.
pub fn install_signal_handlers(stop: StopSignal) -> JoinHandle<()> {
    info!("Installing OS signal handlers");

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    return;
                }
            };

            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "Failed to install SIGINT handler");
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                    stop.trigger(StopReason::Sigterm);
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT");
                    stop.trigger(StopReason::Sigint);
                }
                _ = stop.wait() => {}
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        error!(error = %e, "Failed to listen for Ctrl+C");
                        return;
                    }
                    info!("Received Ctrl+C");
                    stop.trigger(StopReason::Sigint);
                }
                _ = stop.wait() => {}
            }
        }
    })
}
