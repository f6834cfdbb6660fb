//! Switch back to the previously active partition
//!
//! Points the boot partition at the image that is not running and restarts.
//! A refused switch is reported and not retried; the device stays on its
//! current partition until the next explicit command.

use std::convert::Infallible;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::UpdateError;
use crate::indicator::{LogIndicator, StatusIndicator, StatusSignal};
use crate::partition::FlashPartitionManager;
use crate::progress::ProgressState;

/// Rollback controller
pub struct RollbackController {
    flash: Arc<dyn FlashPartitionManager>,
    progress: Arc<ProgressState>,
    indicator: Arc<dyn StatusIndicator>,
}

impl RollbackController {
    /// Create a controller over `flash`
    pub fn new(flash: Arc<dyn FlashPartitionManager>, progress: Arc<ProgressState>) -> Self {
        Self {
            flash,
            progress,
            indicator: Arc::new(LogIndicator),
        }
    }

    /// Replace the default logging indicator
    pub fn with_indicator(mut self, indicator: Arc<dyn StatusIndicator>) -> Self {
        self.indicator = indicator;
        self
    }

    /// Activate the partition that is not running, then restart.
    ///
    /// Only returns on failure. Refused with [`UpdateError::SessionActive`]
    /// while an update session is in flight. The session token is held until
    /// the restart, so no update can start during the switch.
    pub async fn switch_to_previous(&self) -> Result<Infallible, UpdateError> {
        let guard = self.progress.try_begin_rollback().inspect_err(|e| {
            warn!(error = %e, "Rollback refused while an update session is active");
        })?;

        let running = self
            .flash
            .running_partition()
            .await
            .map_err(|e| self.fail(format!("running partition query failed: {e:#}")))?;
        let target = self
            .flash
            .next_update_partition()
            .await
            .map_err(|e| self.fail(format!("previous partition query failed: {e:#}")))?;
        if target == running {
            return Err(self.fail(format!("no other partition than running {running}")));
        }

        info!(from = %running, to = %target, "Switching to previous partition");
        self.flash
            .activate(target)
            .await
            .map_err(|e| self.fail(format!("activate {target} failed: {e:#}")))?;

        info!(partition = %target, "Boot partition switched, restarting");
        let never = self.flash.restart_device().await;
        drop(guard);
        match never {}
    }

    fn fail(&self, reason: String) -> UpdateError {
        error!(%reason, "Rollback failed, staying on current partition");
        self.indicator.signal(StatusSignal::Error);
        UpdateError::Rollback(reason)
    }
}
