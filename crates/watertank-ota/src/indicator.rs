//! Status indication side effects
//!
//! The downloader signals every accepted and rejected chunk. On hardware
//! this drives a status LED; the default just logs.

use tracing::trace;

/// Per-chunk outcome signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSignal {
    /// Chunk verified and written
    Ok,
    /// Chunk rejected or a session failed
    Error,
}

/// Receives status signals from the update engine
pub trait StatusIndicator: Send + Sync {
    /// Show `signal`. Must not block.
    fn signal(&self, signal: StatusSignal);
}

/// [`StatusIndicator`] that only emits trace events
#[derive(Debug, Clone, Copy, Default)]
pub struct LogIndicator;

impl StatusIndicator for LogIndicator {
    fn signal(&self, signal: StatusSignal) {
        trace!(?signal, "Status signal");
    }
}
