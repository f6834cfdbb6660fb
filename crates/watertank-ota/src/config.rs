//! Update engine configuration
//!
//! Endpoint URLs and the transfer tuning knobs. The transfer constants define
//! observable behavior (how fast the chunk size grows, when a session gives
//! up), so the defaults are exported as named constants as well.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::digest::DigestAlgorithm;
use crate::error::ConfigError;

/// Chunk size used for the first request of a session.
pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// Initial ceiling for the chunk size.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 8192;

/// Floor for the chunk size.
pub const MIN_CHUNK_SIZE: usize = 128;

/// A session aborts once consecutive chunk failures exceed this bound.
pub const MAX_CONSECUTIVE_RETRIES: u32 = 20;

/// Successes in a row needed before the ceiling grows.
pub const GROWTH_STREAK: u32 = 10;

/// Consecutive failures after which the chunk size is halved.
pub const SHRINK_AFTER_FAILURES: u32 = 10;

/// Largest chunk response body read from the transport.
pub const MAX_RESPONSE_BYTES: usize = 16384;

/// Response header carrying the declared chunk digest.
pub const DIGEST_HEADER: &str = "Content-MD5";

fn default_firmware_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtaConfig {
    /// Version string of the running firmware. Compiled into the image,
    /// never read from a config file.
    #[serde(skip, default = "default_firmware_version")]
    pub firmware_version: String,

    /// Update-metadata endpoint
    pub check_url: String,

    /// Blob-range endpoint; chunk query parameters are appended to it
    pub download_url: String,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// Chunked transfer tuning
    #[serde(default)]
    pub transfer: TransferConfig,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            firmware_version: default_firmware_version(),
            check_url: "https://updates.example.com/api/CheckForNewFirmware".to_string(),
            download_url: "https://updates.example.com/api/DownloadFirmware".to_string(),
            request_timeout_secs: 30,
            transfer: TransferConfig::default(),
        }
    }
}

impl OtaConfig {
    /// Set the running firmware version
    pub fn with_firmware_version(mut self, version: impl Into<String>) -> Self {
        self.firmware_version = version.into();
        self
    }

    /// Set the update-metadata endpoint
    pub fn with_check_url(mut self, url: impl Into<String>) -> Self {
        self.check_url = url.into();
        self
    }

    /// Set the blob-range endpoint
    pub fn with_download_url(mut self, url: impl Into<String>) -> Self {
        self.download_url = url.into();
        self
    }

    /// Set the transfer tuning
    pub fn with_transfer(mut self, transfer: TransferConfig) -> Self {
        self.transfer = transfer;
        self
    }

    /// Request timeout as a [`Duration`]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Check every field for consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.firmware_version.trim().is_empty() {
            return Err(ConfigError::Empty("firmware_version"));
        }
        validate_url("check", &self.check_url)?;
        validate_url("download", &self.download_url)?;
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Zero("request_timeout_secs"));
        }
        self.transfer.validate()
    }
}

fn validate_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    reqwest::Url::parse(value)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Tuning for the chunked downloader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// First requested chunk size in bytes
    pub initial_chunk_size: usize,

    /// Initial chunk size ceiling in bytes
    pub max_chunk_size: usize,

    /// Chunk size floor in bytes
    pub min_chunk_size: usize,

    /// Abort once consecutive failures exceed this
    pub max_consecutive_retries: u32,

    /// Successes in a row before the ceiling grows
    pub growth_streak: u32,

    /// Failures in a row before the chunk size halves
    pub shrink_after_failures: u32,

    /// Response body cap in bytes
    pub max_response_bytes: usize,

    /// Header holding the declared digest
    pub digest_header: String,

    /// Digest algorithm the server uses for `digest_header`
    pub digest: DigestAlgorithm,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            initial_chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            min_chunk_size: MIN_CHUNK_SIZE,
            max_consecutive_retries: MAX_CONSECUTIVE_RETRIES,
            growth_streak: GROWTH_STREAK,
            shrink_after_failures: SHRINK_AFTER_FAILURES,
            max_response_bytes: MAX_RESPONSE_BYTES,
            digest_header: DIGEST_HEADER.to_string(),
            digest: DigestAlgorithm::Md5,
        }
    }
}

impl TransferConfig {
    /// Check the chunk bounds and limits
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bounds_ok = self.min_chunk_size > 0
            && self.min_chunk_size <= self.initial_chunk_size
            && self.initial_chunk_size <= self.max_chunk_size;
        if !bounds_ok {
            return Err(ConfigError::ChunkBounds {
                min: self.min_chunk_size,
                initial: self.initial_chunk_size,
                max: self.max_chunk_size,
            });
        }
        if self.max_consecutive_retries == 0 {
            return Err(ConfigError::Zero("max_consecutive_retries"));
        }
        if self.max_response_bytes == 0 {
            return Err(ConfigError::Zero("max_response_bytes"));
        }
        if self.digest_header.trim().is_empty() {
            return Err(ConfigError::Empty("digest_header"));
        }
        Ok(())
    }
}
