//! Update session launcher
//!
//! Claims the progress state, then runs connectivity wait, version check,
//! download and restart as one independently scheduled task.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, info, info_span, warn};

use crate::downloader::ChunkedDownloader;
use crate::error::UpdateError;
use crate::partition::FlashPartitionManager;
use crate::progress::{ProgressState, SessionGuard, SessionOutcome, SessionState};
use crate::version_check::{VersionCheckOutcome, VersionChecker};

/// How a session ended without restarting the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Published version equals the running version
    UpToDate,
    /// A different version is published but its size is zero
    NothingToDownload,
}

/// Network availability signal a session waits on before its first request
#[derive(Debug, Clone, Default)]
pub struct Connectivity {
    receiver: Option<watch::Receiver<bool>>,
}

impl Connectivity {
    /// Treat the network as always up
    pub fn always() -> Self {
        Self { receiver: None }
    }

    /// Follow a `true` = connected watch channel
    pub fn watch(receiver: watch::Receiver<bool>) -> Self {
        Self {
            receiver: Some(receiver),
        }
    }

    /// Resolve once connected
    pub async fn wait(&self) -> Result<(), UpdateError> {
        let Some(receiver) = &self.receiver else {
            return Ok(());
        };
        let mut receiver = receiver.clone();
        if !*receiver.borrow() {
            info!("Waiting for network connectivity");
        }
        receiver
            .wait_for(|connected| *connected)
            .await
            .map(|_| ())
            .map_err(|e| UpdateError::Transport(format!("connectivity signal closed: {e}")))
    }
}

/// Starts update sessions, at most one at a time
pub struct SessionLauncher {
    checker: VersionChecker,
    downloader: ChunkedDownloader,
    flash: Arc<dyn FlashPartitionManager>,
    progress: Arc<ProgressState>,
    connectivity: Connectivity,
}

impl SessionLauncher {
    /// Create a launcher
    pub fn new(
        checker: VersionChecker,
        downloader: ChunkedDownloader,
        flash: Arc<dyn FlashPartitionManager>,
        progress: Arc<ProgressState>,
    ) -> Self {
        Self {
            checker,
            downloader,
            flash,
            progress,
            connectivity: Connectivity::always(),
        }
    }

    /// Wait on `connectivity` before each session
    pub fn with_connectivity(mut self, connectivity: Connectivity) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// Shared progress state
    pub fn progress(&self) -> &Arc<ProgressState> {
        &self.progress
    }

    /// Version checker used by sessions
    pub fn checker(&self) -> &VersionChecker {
        &self.checker
    }

    /// Spawn a session unless one is already active.
    ///
    /// The writer token is claimed before this returns, so two calls can
    /// never both succeed. The task resolves only when the session ends
    /// without a restart.
    pub fn start_update_if_idle(
        self: &Arc<Self>,
    ) -> Result<JoinHandle<Result<SessionEnd, UpdateError>>, UpdateError> {
        let guard = self.progress.try_begin()?;
        let span = info_span!("ota_update", session_id = %guard.session_id());
        let launcher = Arc::clone(self);
        Ok(tokio::spawn(launcher.run_session(guard).instrument(span)))
    }

    async fn run_session(self: Arc<Self>, mut guard: SessionGuard) -> Result<SessionEnd, UpdateError> {
        let descriptor = match self.check(&mut guard).await {
            Ok(VersionCheckOutcome::UpToDate { .. }) => {
                guard.finish(SessionOutcome::UpToDate);
                return Ok(SessionEnd::UpToDate);
            }
            Ok(outcome) => match outcome.into_session_descriptor() {
                Some(descriptor) => descriptor,
                None => {
                    guard.finish(SessionOutcome::UpToDate);
                    return Ok(SessionEnd::NothingToDownload);
                }
            },
            Err(e) => {
                warn!(error = %e, "Version check abandoned for this cycle");
                guard.finish(SessionOutcome::Aborted {
                    reason: e.to_string(),
                    fatal: false,
                });
                return Err(e);
            }
        };

        match self.downloader.run(&descriptor, &mut guard).await {
            Ok(image) => {
                info!(
                    partition = %image.partition,
                    version = %descriptor.latest_version,
                    "Update applied, restarting into new firmware"
                );
                // The guard stays held: nothing may start between activation
                // and the restart.
                let never = self.flash.restart_device().await;
                drop(guard);
                match never {}
            }
            Err(e) => {
                guard.finish(SessionOutcome::Aborted {
                    reason: e.to_string(),
                    fatal: e.is_fatal(),
                });
                Err(e)
            }
        }
    }

    async fn check(&self, guard: &mut SessionGuard) -> Result<VersionCheckOutcome, UpdateError> {
        guard.set_state(SessionState::Checking);
        self.connectivity.wait().await?;
        self.checker.check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_always_connected_does_not_wait() -> Result<(), UpdateError> {
        Connectivity::always().wait().await
    }

    #[tokio::test]
    async fn test_wait_resolves_when_connected() -> Result<(), Box<dyn std::error::Error>> {
        let (tx, rx) = watch::channel(false);
        let connectivity = Connectivity::watch(rx);
        let waiter = tokio::spawn(async move { connectivity.wait().await });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        tx.send(true)?;
        waiter.await??;
        Ok(())
    }

    #[tokio::test]
    async fn test_closed_signal_is_transport_error() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let result = Connectivity::watch(rx).wait().await;
        assert!(matches!(result, Err(UpdateError::Transport(_))));
    }
}
