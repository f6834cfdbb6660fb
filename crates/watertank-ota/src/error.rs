//! Error types for over-the-air update operations

use thiserror::Error;

/// Errors that can end a version check, a download session or a rollback.
///
/// Chunk-level problems (bad framing, digest mismatch) never surface here
/// directly: the downloader retries them and only reports
/// [`UpdateError::RetryBudgetExceeded`] once the budget is spent.
#[derive(Error, Debug)]
pub enum UpdateError {
    /// Request could not be opened or completed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Metadata response missing expected fields or malformed
    #[error("Response parse error: {0}")]
    ResponseParse(String),

    /// Decoded chunk digest disagrees with the declared digest
    #[error("Checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch {
        /// Digest declared by the server
        expected: String,
        /// Digest computed over the decoded chunk
        actual: String,
    },

    /// Partition manager refused to open a write session
    #[error("Flash begin failed: {0}")]
    FlashBegin(String),

    /// Partition manager failed to persist a verified chunk
    #[error("Flash write failed: {0}")]
    FlashWrite(String),

    /// Partition manager failed to close the write session
    #[error("Flash finalize failed: {0}")]
    FlashFinalize(String),

    /// Partition manager failed to switch the boot partition
    #[error("Flash activate failed: {0}")]
    FlashActivate(String),

    /// Too many consecutive chunk failures
    #[error("Retry budget exceeded after {attempts} consecutive failures (last: {last_failure})")]
    RetryBudgetExceeded {
        /// Consecutive failures when the session gave up
        attempts: u32,
        /// Description of the final rejected chunk
        last_failure: String,
    },

    /// Another session owns the progress state
    #[error("Update session already active ({0})")]
    SessionActive(String),

    /// Switching back to the previous partition failed
    #[error("Rollback failed: {0}")]
    Rollback(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl UpdateError {
    /// Partition manager failures. A fatal error sets the fatal indicator
    /// and is never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            UpdateError::FlashBegin(_)
                | UpdateError::FlashWrite(_)
                | UpdateError::FlashFinalize(_)
                | UpdateError::FlashActivate(_)
        )
    }

    /// Errors the downloader absorbs into its retry budget when they happen
    /// at chunk stage.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UpdateError::ResponseParse(_) | UpdateError::ChecksumMismatch { .. }
        )
    }
}

impl From<serde_json::Error> for UpdateError {
    fn from(e: serde_json::Error) -> Self {
        UpdateError::Serialization(e.to_string())
    }
}

/// Configuration validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Chunk size bounds are inconsistent
    #[error("chunk sizes must satisfy 0 < min ({min}) <= initial ({initial}) <= max ({max})")]
    ChunkBounds {
        /// Configured minimum
        min: usize,
        /// Configured initial size
        initial: usize,
        /// Configured ceiling
        max: usize,
    },

    /// A numeric setting that must be positive is zero
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    /// An endpoint URL is empty or unparsable
    #[error("invalid {field} URL '{value}': {reason}")]
    InvalidUrl {
        /// Which endpoint
        field: &'static str,
        /// The rejected value
        value: String,
        /// Parser message
        reason: String,
    },

    /// A required string setting is empty
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flash_errors_are_fatal() {
        assert!(UpdateError::FlashWrite("io".into()).is_fatal());
        assert!(UpdateError::FlashFinalize("io".into()).is_fatal());
        assert!(UpdateError::FlashActivate("io".into()).is_fatal());
        assert!(!UpdateError::Transport("down".into()).is_fatal());
        assert!(
            !UpdateError::RetryBudgetExceeded {
                attempts: 21,
                last_failure: "digest".into()
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_chunk_stage_errors_are_retryable() {
        assert!(UpdateError::ResponseParse("no quotes".into()).is_retryable());
        assert!(
            UpdateError::ChecksumMismatch {
                expected: "a".into(),
                actual: "b".into()
            }
            .is_retryable()
        );
        assert!(!UpdateError::Transport("refused".into()).is_retryable());
    }
}
