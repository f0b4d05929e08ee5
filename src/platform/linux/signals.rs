//! Signal flags for the long-running `watch` command

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// SIGTERM/SIGINT request shutdown, SIGHUP requests a config reload.
#[derive(Debug, Clone, Default)]
pub struct SignalState {
    shutdown_requested: Arc<AtomicBool>,
    reload_requested: Arc<AtomicBool>,
}

impl SignalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the process-wide handlers.
    pub fn install(&self) -> io::Result<()> {
        use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
        use signal_hook::flag;

        flag::register(SIGTERM, self.shutdown_requested.clone())?;
        flag::register(SIGINT, self.shutdown_requested.clone())?;
        flag::register(SIGHUP, self.reload_requested.clone())?;
        Ok(())
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    /// Returns and clears a pending reload request.
    pub fn take_reload(&self) -> bool {
        self.reload_requested.swap(false, Ordering::SeqCst)
    }
}
