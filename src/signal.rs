//! Signal handling for graceful shutdown.
//!
//! A SIGINT or SIGTERM sets a shared flag and wakes the poller, so the
//! driver loop notices at its next poll boundary and closes every
//! registered socket before returning.

use mio::Waker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared shutdown flag paired with the poller's waker.
#[derive(Clone)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl Shutdown {
    pub(crate) fn new(waker: Arc<Waker>) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            waker,
        }
    }

    /// Request shutdown and interrupt a blocking poll.
    ///
    /// Returns `true` if shutdown had already been requested.
    pub fn trigger(&self) -> bool {
        let already = self.flag.swap(true, Ordering::SeqCst);
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "Failed to wake poller");
        }
        already
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shutdown")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}

/// Install the process-wide SIGINT/SIGTERM handler.
///
/// The first signal requests a graceful shutdown; a second one exits
/// immediately.
pub fn install_signal_handler(shutdown: Shutdown) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        if shutdown.trigger() {
            warn!("Received second signal, forcing immediate exit");
            std::process::exit(1);
        }
        info!("Received shutdown signal, initiating graceful shutdown");
    })
}
