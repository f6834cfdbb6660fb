//! Update service facade
//!
//! Wires the version checker, downloader, launcher and rollback controller
//! around one [`ProgressState`], and turns pending command flags into
//! operations.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::commands::{CommandFlags, DeviceCommand};
use crate::config::OtaConfig;
use crate::downloader::ChunkedDownloader;
use crate::error::UpdateError;
use crate::indicator::{LogIndicator, StatusIndicator};
use crate::launcher::{Connectivity, SessionEnd, SessionLauncher};
use crate::partition::FlashPartitionManager;
use crate::progress::{ProgressSnapshot, ProgressState, ReportedState};
use crate::rollback::RollbackController;
use crate::transport::Transport;
use crate::version_check::{VersionCheckOutcome, VersionChecker};

/// Whether the main loop keeps running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    /// Keep going
    Continue,
    /// Quit was requested
    Stop,
}

/// Handle of the session task spawned by the last accepted update command
pub type SessionHandle = JoinHandle<Result<SessionEnd, UpdateError>>;

/// Builder for [`UpdateService`]
pub struct UpdateServiceBuilder {
    config: OtaConfig,
    transport: Arc<dyn Transport>,
    flash: Arc<dyn FlashPartitionManager>,
    connectivity: Connectivity,
    indicator: Arc<dyn StatusIndicator>,
}

impl UpdateServiceBuilder {
    /// Wait on `connectivity` before each session
    pub fn connectivity(mut self, connectivity: Connectivity) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// Status indicator for chunk and failure signals
    pub fn indicator(mut self, indicator: Arc<dyn StatusIndicator>) -> Self {
        self.indicator = indicator;
        self
    }

    /// Validate the configuration and assemble the service
    pub fn build(self) -> Result<UpdateService, UpdateError> {
        self.config.validate()?;

        let progress = Arc::new(ProgressState::new(self.config.firmware_version.clone()));
        let checker = VersionChecker::new(
            Arc::clone(&self.transport),
            self.config.check_url.clone(),
            self.config.firmware_version.clone(),
        );
        let downloader =
            ChunkedDownloader::new(self.transport, Arc::clone(&self.flash), &self.config)?
                .with_indicator(Arc::clone(&self.indicator));
        let launcher = SessionLauncher::new(
            checker,
            downloader,
            Arc::clone(&self.flash),
            Arc::clone(&progress),
        )
        .with_connectivity(self.connectivity);
        let rollback = RollbackController::new(Arc::clone(&self.flash), Arc::clone(&progress))
            .with_indicator(self.indicator);

        Ok(UpdateService {
            launcher: Arc::new(launcher),
            rollback,
            flash: self.flash,
            progress,
            last_session: Mutex::new(None),
        })
    }
}

/// Everything the device main loop needs from the update engine
pub struct UpdateService {
    launcher: Arc<SessionLauncher>,
    rollback: RollbackController,
    flash: Arc<dyn FlashPartitionManager>,
    progress: Arc<ProgressState>,
    last_session: Mutex<Option<SessionHandle>>,
}

impl UpdateService {
    /// Start building a service
    pub fn builder(
        config: OtaConfig,
        transport: Arc<dyn Transport>,
        flash: Arc<dyn FlashPartitionManager>,
    ) -> UpdateServiceBuilder {
        UpdateServiceBuilder {
            config,
            transport,
            flash,
            connectivity: Connectivity::always(),
            indicator: Arc::new(LogIndicator),
        }
    }

    /// Shared progress state
    pub fn progress(&self) -> &Arc<ProgressState> {
        &self.progress
    }

    /// Copy of the progress state
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    /// Device-to-cloud reported properties
    pub fn reported_state(&self) -> ReportedState {
        self.progress.snapshot().reported_state()
    }

    /// One version check outside of a session
    pub async fn check_now(&self) -> Result<VersionCheckOutcome, UpdateError> {
        self.launcher.checker().check().await
    }

    /// Spawn an update session unless one is active
    pub fn start_update_if_idle(&self) -> Result<(), UpdateError> {
        let handle = self.launcher.start_update_if_idle()?;
        *self.last_session.lock() = Some(handle);
        Ok(())
    }

    /// Take the handle of the most recently spawned session
    pub fn take_session_handle(&self) -> Option<SessionHandle> {
        self.last_session.lock().take()
    }

    /// Switch to the previous partition and restart. Returns only on failure.
    pub async fn rollback(&self) -> Result<std::convert::Infallible, UpdateError> {
        self.rollback.switch_to_previous().await
    }

    /// Consume pending flags in order update, rollback, reboot, quit.
    ///
    /// Rollback and reboot are refused while a session is active; the flag
    /// is cleared either way. A successful rollback or a reboot does not
    /// return.
    pub async fn dispatch(&self, flags: &CommandFlags) -> LoopControl {
        if flags.take(DeviceCommand::TriggerUpdate) {
            match self.start_update_if_idle() {
                Ok(()) => info!("Update session started"),
                Err(e) => warn!(error = %e, "Update command ignored"),
            }
        }

        if flags.take(DeviceCommand::TriggerRollback) {
            match self.rollback().await {
                Ok(never) => match never {},
                Err(e) => error!(error = %e, "Rollback command failed"),
            }
        }

        if flags.take(DeviceCommand::TriggerReboot) {
            if self.progress.is_idle() {
                info!("Rebooting on request");
                let never = self.flash.restart_device().await;
                match never {}
            }
            warn!(state = %self.progress.session_state(), "Reboot refused while an update session is active");
        }

        if flags.take(DeviceCommand::Quit) {
            info!("Quit requested");
            return LoopControl::Stop;
        }
        LoopControl::Continue
    }
}
