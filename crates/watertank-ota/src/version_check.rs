//! Update availability check
//!
//! One GET against the update-metadata endpoint. The response names the latest
//! firmware version and the blob holding it; the running version string is
//! compared for equality only.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::UpdateError;
use crate::transport::Transport;

/// Largest metadata document accepted
const MAX_DESCRIPTOR_BYTES: usize = 4096;

/// What the server says is available
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDescriptor {
    /// Newest published firmware version
    pub latest_version: String,
    /// Blob holding the image
    pub blob_name: String,
    /// Image size in bytes
    pub blob_size: u64,
}

/// Result of one version check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionCheckOutcome {
    /// Running version equals the published one
    UpToDate {
        /// The published version
        latest_version: String,
    },
    /// A different version is published
    UpdateAvailable(UpdateDescriptor),
}

impl VersionCheckOutcome {
    /// Size of the blob to download; zero when nothing is to be done
    pub fn reported_size(&self) -> u64 {
        match self {
            VersionCheckOutcome::UpToDate { .. } => 0,
            VersionCheckOutcome::UpdateAvailable(descriptor) => descriptor.blob_size,
        }
    }

    /// Descriptor for a session, if one is needed
    pub fn into_session_descriptor(self) -> Option<UpdateDescriptor> {
        match self {
            VersionCheckOutcome::UpdateAvailable(descriptor) if descriptor.blob_size > 0 => {
                Some(descriptor)
            }
            _ => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDescriptor {
    latest_version: String,
    blob_name: String,
    blob_size: RawBlobSize,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawBlobSize {
    Number(u64),
    Text(String),
}

/// Parse the metadata document.
pub fn parse_descriptor(body: &[u8]) -> Result<UpdateDescriptor, UpdateError> {
    let raw: RawDescriptor = serde_json::from_slice(body)
        .map_err(|e| UpdateError::ResponseParse(format!("metadata document: {e}")))?;

    let blob_size = match raw.blob_size {
        RawBlobSize::Number(n) => n,
        RawBlobSize::Text(text) => text.trim().parse::<u64>().map_err(|e| {
            UpdateError::ResponseParse(format!("blobSize '{text}' is not a byte count: {e}"))
        })?,
    };

    if raw.latest_version.trim().is_empty() {
        return Err(UpdateError::ResponseParse("latestVersion is empty".into()));
    }
    if raw.blob_name.trim().is_empty() {
        return Err(UpdateError::ResponseParse("blobName is empty".into()));
    }

    Ok(UpdateDescriptor {
        latest_version: raw.latest_version,
        blob_name: raw.blob_name,
        blob_size,
    })
}

/// Compare a descriptor against the running version.
pub fn evaluate(descriptor: UpdateDescriptor, running_version: &str) -> VersionCheckOutcome {
    if descriptor.latest_version == running_version {
        VersionCheckOutcome::UpToDate {
            latest_version: descriptor.latest_version,
        }
    } else {
        VersionCheckOutcome::UpdateAvailable(descriptor)
    }
}

/// Queries the update-metadata endpoint
pub struct VersionChecker {
    transport: Arc<dyn Transport>,
    check_url: String,
    running_version: String,
}

impl VersionChecker {
    /// Create a checker for `check_url`
    pub fn new(
        transport: Arc<dyn Transport>,
        check_url: impl Into<String>,
        running_version: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            check_url: check_url.into(),
            running_version: running_version.into(),
        }
    }

    /// Version string the device runs
    pub fn running_version(&self) -> &str {
        &self.running_version
    }

    /// Run one check. Failures abandon the check for this cycle; there is no
    /// retry here.
    pub async fn check(&self) -> Result<VersionCheckOutcome, UpdateError> {
        let response = self
            .transport
            .get(&self.check_url, MAX_DESCRIPTOR_BYTES)
            .await
            .map_err(|e| UpdateError::Transport(format!("{e:#}")))?;

        info!(
            status = response.status(),
            "Finished request for firmware information"
        );

        if !response.is_success() {
            return Err(UpdateError::ResponseParse(format!(
                "metadata endpoint returned status {}",
                response.status()
            )));
        }
        if response.is_truncated() {
            return Err(UpdateError::ResponseParse(format!(
                "metadata document exceeds {MAX_DESCRIPTOR_BYTES} bytes"
            )));
        }

        let descriptor = parse_descriptor(response.body())?;
        info!(
            latest_version = %descriptor.latest_version,
            blob_name = %descriptor.blob_name,
            blob_size = descriptor.blob_size,
            running_version = %self.running_version,
            "Available firmware"
        );

        let outcome = evaluate(descriptor, &self.running_version);
        match &outcome {
            VersionCheckOutcome::UpToDate { .. } => {
                info!("Available firmware has the same version, no need to update");
            }
            VersionCheckOutcome::UpdateAvailable(d) if d.blob_size == 0 => {
                warn!(blob_name = %d.blob_name, "Newer firmware announced with zero size, nothing to download");
            }
            VersionCheckOutcome::UpdateAvailable(_) => {}
        }
        Ok(outcome)
    }
}
