//! Shared progress state
//!
//! Single writer, many readers. [`ProgressState::try_begin`] hands out the one
//! [`SessionGuard`] that may mutate progress; everyone else (telemetry,
//! command handling) reads copy-on-read [`ProgressSnapshot`]s.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::UpdateError;
use crate::partition::Partition;

/// Phase of the update unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionState {
    /// No session
    #[default]
    Idle,
    /// Waiting for connectivity or querying the metadata endpoint
    Checking,
    /// Transferring chunks
    Downloading,
    /// Closing the write session and switching the boot partition
    Finalizing,
    /// Switching back to the previous partition
    RollingBack,
}

impl SessionState {
    /// Whether a session owns the progress state
    pub fn is_active(self) -> bool {
        self != SessionState::Idle
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Checking => "checking",
            SessionState::Downloading => "downloading",
            SessionState::Finalizing => "finalizing",
            SessionState::RollingBack => "rolling-back",
        };
        f.write_str(name)
    }
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionOutcome {
    /// Published version equals the running one, or nothing to download
    UpToDate,
    /// Image finalized and boot partition switched; restart pending
    Activated {
        /// New boot partition
        partition: Partition,
    },
    /// Session gave up; the running partition stays active
    Aborted {
        /// Error description
        reason: String,
        /// A partition manager operation failed
        fatal: bool,
    },
}

/// Outcome of the most recent session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session identifier used in logs
    pub session_id: Uuid,
    /// How it ended
    pub outcome: SessionOutcome,
    /// When it ended
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

/// Device-to-cloud reported properties
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedState {
    /// Running firmware version
    pub firmware_version: String,
    /// Verified bytes of the session in flight
    pub current_update_offset: u64,
    /// 0-100
    pub current_update_progress: u8,
}

/// Point-in-time copy of the progress state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Running firmware version
    pub firmware_version: String,
    /// Session phase
    pub state: SessionState,
    /// Active session identifier
    pub session_id: Option<Uuid>,
    /// Blob being transferred
    pub blob_name: Option<String>,
    /// Verified bytes written
    pub offset: u64,
    /// Image size
    pub total_size: u64,
    /// `offset * 100 / total_size`, truncated
    pub progress_percent: u8,
    /// A partition manager failure ended the last session
    pub fatal_error: bool,
    /// Most recent finished session
    pub last_session: Option<SessionRecord>,
}

impl ProgressSnapshot {
    /// Properties reported to the cloud
    pub fn reported_state(&self) -> ReportedState {
        ReportedState {
            firmware_version: self.firmware_version.clone(),
            current_update_offset: self.offset,
            current_update_progress: self.progress_percent,
        }
    }
}

/// `offset * 100 / total` truncated into `0..=100`; zero when `total` is zero
pub fn progress_percent(offset: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = u128::from(offset)
        .saturating_mul(100)
        .checked_div(u128::from(total))
        .unwrap_or(0)
        .min(100);
    u8::try_from(percent).unwrap_or(100)
}

#[derive(Debug, Default)]
struct ProgressInner {
    state: SessionState,
    session_id: Option<Uuid>,
    blob_name: Option<String>,
    offset: u64,
    total_size: u64,
    fatal_error: bool,
    last_session: Option<SessionRecord>,
}

/// Progress shared between the update task and reporting code
#[derive(Debug)]
pub struct ProgressState {
    firmware_version: String,
    session_active: AtomicBool,
    inner: RwLock<ProgressInner>,
}

impl ProgressState {
    /// Idle state for a device running `firmware_version`
    pub fn new(firmware_version: impl Into<String>) -> Self {
        Self {
            firmware_version: firmware_version.into(),
            session_active: AtomicBool::new(false),
            inner: RwLock::new(ProgressInner::default()),
        }
    }

    /// Claim the single writer token. Fails while another session holds it.
    pub fn try_begin(self: &Arc<Self>) -> Result<SessionGuard, UpdateError> {
        let guard = self.claim(SessionState::Checking)?;
        {
            let mut inner = self.inner.write();
            inner.blob_name = None;
            inner.offset = 0;
            inner.total_size = 0;
            inner.fatal_error = false;
        }

        info!(session_id = %guard.session_id, "Update session claimed");
        Ok(guard)
    }

    /// Claim the token for a partition switch.
    ///
    /// Transfer fields and the fatal indicator of the previous session are
    /// left as they are.
    pub fn try_begin_rollback(self: &Arc<Self>) -> Result<SessionGuard, UpdateError> {
        let guard = self.claim(SessionState::RollingBack)?;
        debug!(session_id = %guard.session_id, "Rollback claimed the session token");
        Ok(guard)
    }

    fn claim(self: &Arc<Self>, state: SessionState) -> Result<SessionGuard, UpdateError> {
        if self
            .session_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            let state = self.session_state();
            return Err(UpdateError::SessionActive(state.to_string()));
        }

        let session_id = Uuid::new_v4();
        {
            let mut inner = self.inner.write();
            inner.state = state;
            inner.session_id = Some(session_id);
        }

        Ok(SessionGuard {
            progress: Arc::clone(self),
            session_id,
            finished: false,
        })
    }

    /// Copy of everything reportable
    pub fn snapshot(&self) -> ProgressSnapshot {
        let inner = self.inner.read();
        ProgressSnapshot {
            firmware_version: self.firmware_version.clone(),
            state: inner.state,
            session_id: inner.session_id,
            blob_name: inner.blob_name.clone(),
            offset: inner.offset,
            total_size: inner.total_size,
            progress_percent: progress_percent(inner.offset, inner.total_size),
            fatal_error: inner.fatal_error,
            last_session: inner.last_session.clone(),
        }
    }

    /// Running firmware version
    pub fn firmware_version(&self) -> &str {
        &self.firmware_version
    }

    /// Verified bytes of the session in flight
    pub fn current_offset(&self) -> u64 {
        self.inner.read().offset
    }

    /// 0-100 progress of the session in flight
    pub fn current_progress_percent(&self) -> u8 {
        let inner = self.inner.read();
        progress_percent(inner.offset, inner.total_size)
    }

    /// Session phase
    pub fn session_state(&self) -> SessionState {
        self.inner.read().state
    }

    /// No session holds the writer token
    #[inline]
    pub fn is_idle(&self) -> bool {
        !self.session_active.load(Ordering::Acquire)
    }

    /// Fatal indicator of the current or last session
    pub fn fatal_error(&self) -> bool {
        self.inner.read().fatal_error
    }

    fn release(&self, record: Option<SessionRecord>) {
        {
            let mut inner = self.inner.write();
            inner.state = SessionState::Idle;
            inner.session_id = None;
            match record {
                Some(record) => {
                    if matches!(record.outcome, SessionOutcome::Aborted { .. }) {
                        inner.offset = 0;
                    }
                    inner.last_session = Some(record);
                }
                None => inner.offset = 0,
            }
        }
        self.session_active.store(false, Ordering::Release);
    }
}

/// Exclusive write access to [`ProgressState`] for one session.
///
/// Dropping the guard without [`SessionGuard::finish`] (for example when the
/// task is aborted) releases the state back to idle.
#[derive(Debug)]
pub struct SessionGuard {
    progress: Arc<ProgressState>,
    session_id: Uuid,
    finished: bool,
}

impl SessionGuard {
    /// Identifier of this session
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Move to another phase
    pub fn set_state(&mut self, state: SessionState) {
        self.progress.inner.write().state = state;
    }

    /// Announce the blob being transferred
    pub fn start_transfer(&mut self, blob_name: &str, total_size: u64) {
        let mut inner = self.progress.inner.write();
        inner.state = SessionState::Downloading;
        inner.blob_name = Some(blob_name.to_string());
        inner.total_size = total_size;
        inner.offset = 0;
    }

    /// Publish the verified offset
    pub fn publish_offset(&mut self, offset: u64) {
        let mut inner = self.progress.inner.write();
        inner.offset = offset.min(inner.total_size);
    }

    /// Raise the fatal indicator
    pub fn mark_fatal(&mut self) {
        self.progress.inner.write().fatal_error = true;
    }

    /// Current published offset
    pub fn offset(&self) -> u64 {
        self.progress.inner.read().offset
    }

    /// Record the outcome and release the state to idle
    pub fn finish(mut self, outcome: SessionOutcome) {
        let record = SessionRecord {
            session_id: self.session_id,
            outcome,
            finished_at: chrono::Utc::now(),
        };
        self.finished = true;
        self.progress.release(Some(record));
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.progress.release(None);
        }
    }
}
