//! A/B partition management contract
//!
//! The engine never touches flash directly. It drives a
//! [`FlashPartitionManager`], which owns both partitions and is the only
//! component allowed to switch the boot pointer.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;

/// Firmware partition identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Partition {
    /// Partition A
    A,
    /// Partition B
    B,
}

impl Partition {
    /// Get the other partition
    pub fn other(self) -> Self {
        match self {
            Partition::A => Partition::B,
            Partition::B => Partition::A,
        }
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Partition::A => write!(f, "A"),
            Partition::B => write!(f, "B"),
        }
    }
}

/// An open write session against one partition.
///
/// Created by [`FlashPartitionManager::begin_write`] and consumed by
/// [`FlashPartitionManager::finalize`], so a finalized session cannot be
/// written to again.
#[derive(Debug, PartialEq, Eq)]
pub struct WriteSession {
    partition: Partition,
    expected_size: u64,
}

impl WriteSession {
    /// Handle for a write session opened by a partition manager
    pub fn new(partition: Partition, expected_size: u64) -> Self {
        Self {
            partition,
            expected_size,
        }
    }

    /// Partition being written
    pub fn partition(&self) -> Partition {
        self.partition
    }

    /// Image size announced when the session was opened
    pub fn expected_size(&self) -> u64 {
        self.expected_size
    }
}

/// Where the device booted from, where it will boot next, and where an update
/// would be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionLayout {
    /// Partition the current image runs from
    pub running: Partition,
    /// Partition the boot pointer selects
    pub boot: Partition,
    /// Partition the next update targets
    pub next_update: Partition,
}

impl PartitionLayout {
    /// Boot pointer disagrees with the running image. Happens when boot data
    /// is corrupted or the preferred image failed to start.
    pub fn boot_mismatch(&self) -> bool {
        self.boot != self.running
    }
}

/// Platform flash operations over the firmware partitions
#[async_trait::async_trait]
pub trait FlashPartitionManager: Send + Sync {
    /// Partition the current firmware runs from
    async fn running_partition(&self) -> Result<Partition>;

    /// Partition the boot pointer currently selects
    async fn boot_partition(&self) -> Result<Partition>;

    /// Partition an update should be written to (never the running one)
    async fn next_update_partition(&self) -> Result<Partition>;

    /// Open a write session for an image of `expected_size` bytes
    async fn begin_write(&self, partition: Partition, expected_size: u64) -> Result<WriteSession>;

    /// Append bytes to an open session
    async fn write(&self, session: &WriteSession, data: &[u8]) -> Result<()>;

    /// Close a session and validate the written image
    async fn finalize(&self, session: WriteSession) -> Result<()>;

    /// Make `partition` the boot target
    async fn activate(&self, partition: Partition) -> Result<()>;

    /// Restart the device. Never returns.
    async fn restart_device(&self) -> Infallible;

    /// Snapshot of running, boot and next-update partitions
    async fn layout(&self) -> Result<PartitionLayout> {
        Ok(PartitionLayout {
            running: self.running_partition().await?,
            boot: self.boot_partition().await?,
            next_update: self.next_update_partition().await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_other() {
        assert_eq!(Partition::A.other(), Partition::B);
        assert_eq!(Partition::B.other(), Partition::A);
    }

    #[test]
    fn test_partition_display() {
        assert_eq!(format!("{}", Partition::A), "A");
        assert_eq!(format!("{}", Partition::B), "B");
    }

    #[test]
    fn test_write_session_accessors() {
        let session = WriteSession::new(Partition::B, 4096);
        assert_eq!(session.partition(), Partition::B);
        assert_eq!(session.expected_size(), 4096);
    }

    #[test]
    fn test_layout_boot_mismatch() {
        let consistent = PartitionLayout {
            running: Partition::A,
            boot: Partition::A,
            next_update: Partition::B,
        };
        assert!(!consistent.boot_mismatch());

        let mismatch = PartitionLayout {
            boot: Partition::B,
            ..consistent
        };
        assert!(mismatch.boot_mismatch());
    }
}
