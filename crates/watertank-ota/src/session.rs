//! The record for one download attempt
//!
//! Owned exclusively by the downloader while a session runs. The offset only
//! moves forward, and only by the length of a chunk that passed the digest
//! check and was written to flash.

use crate::chunk_size::ChunkSizeController;
use crate::config::TransferConfig;
use crate::version_check::UpdateDescriptor;

/// Byte range to request next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRequest {
    /// Start of the range
    pub offset: u64,
    /// Requested length, never past the end of the blob
    pub len: usize,
}

/// Mutable state of one download attempt
#[derive(Debug, Clone)]
pub struct UpdateSession {
    blob_name: String,
    total_size: u64,
    offset: u64,
    consecutive_retries: u32,
    max_consecutive_retries: u32,
    fatal_error: bool,
    chunk_size: ChunkSizeController,
}

impl UpdateSession {
    /// Fresh session for `descriptor`
    pub fn new(descriptor: &UpdateDescriptor, config: &TransferConfig) -> Self {
        Self {
            blob_name: descriptor.blob_name.clone(),
            total_size: descriptor.blob_size,
            offset: 0,
            consecutive_retries: 0,
            max_consecutive_retries: config.max_consecutive_retries,
            fatal_error: false,
            chunk_size: ChunkSizeController::new(config),
        }
    }

    /// Blob being downloaded
    pub fn blob_name(&self) -> &str {
        &self.blob_name
    }

    /// Image size in bytes
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Bytes verified and written so far
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Failures since the last accepted chunk
    pub fn consecutive_retries(&self) -> u32 {
        self.consecutive_retries
    }

    /// A partition manager operation failed
    pub fn fatal_error(&self) -> bool {
        self.fatal_error
    }

    /// Chunk size controller
    pub fn chunk_size(&self) -> &ChunkSizeController {
        &self.chunk_size
    }

    /// Bytes still to transfer
    pub fn remaining(&self) -> u64 {
        self.total_size.saturating_sub(self.offset)
    }

    /// Whole image transferred
    pub fn is_complete(&self) -> bool {
        self.offset >= self.total_size
    }

    /// Failure streak went past the retry bound
    pub fn retries_exhausted(&self) -> bool {
        self.consecutive_retries > self.max_consecutive_retries
    }

    /// Whether the loop may run another iteration
    pub fn can_continue(&self) -> bool {
        !self.is_complete() && !self.retries_exhausted() && !self.fatal_error
    }

    /// Range for the next request
    pub fn next_request(&self) -> ChunkRequest {
        let remaining = usize::try_from(self.remaining()).unwrap_or(usize::MAX);
        ChunkRequest {
            offset: self.offset,
            len: self.chunk_size.chunk_size().min(remaining),
        }
    }

    /// Record a verified and written chunk of `len` bytes.
    ///
    /// The caller guarantees `0 < len <= remaining()`; the offset saturates at
    /// the total size either way.
    pub fn record_success(&mut self, len: usize) {
        let len = u64::try_from(len).unwrap_or(u64::MAX);
        self.offset = self.offset.saturating_add(len).min(self.total_size);
        self.consecutive_retries = 0;
        self.chunk_size.adapt(true, 0);
    }

    /// Record a rejected chunk
    pub fn record_failure(&mut self) {
        self.consecutive_retries = self.consecutive_retries.saturating_add(1);
        self.chunk_size.adapt(false, self.consecutive_retries);
    }

    /// Stop the session for good
    pub fn mark_fatal(&mut self) {
        self.fatal_error = true;
    }

    /// Abort bookkeeping: progress goes back to zero
    pub fn reset(&mut self) {
        self.offset = 0;
    }
}
