//! Chunked, integrity-checked firmware download
//!
//! The transfer loop requests one byte range at a time, strictly in offset
//! order. Every chunk is unframed, decoded and checked against the digest the
//! server declares for it before it reaches flash. Rejected chunks cost one
//! unit of the retry budget; flash failures end the session on the spot.
//! The new partition is activated only after the whole image was written and
//! the write session finalized.

use std::sync::Arc;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::{OtaConfig, TransferConfig};
use crate::error::{ConfigError, UpdateError};
use crate::indicator::{LogIndicator, StatusIndicator, StatusSignal};
use crate::partition::{FlashPartitionManager, Partition, WriteSession};
use crate::payload::decode_chunk_payload;
use crate::progress::{SessionGuard, SessionState};
use crate::session::{ChunkRequest, UpdateSession};
use crate::transport::{Transport, TransportResponse};
use crate::version_check::UpdateDescriptor;

/// Image fully written and made the boot target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivatedImage {
    /// Partition that boots next
    pub partition: Partition,
    /// Bytes written
    pub size: u64,
}

/// Validate one chunk response and return the decoded chunk.
///
/// Every error returned here is retryable: bad status, oversize body,
/// broken framing, an empty chunk or one longer than requested, and a
/// missing or disagreeing digest header.
pub fn decode_chunk_response(
    response: &TransportResponse,
    requested_len: usize,
    transfer: &TransferConfig,
) -> Result<Vec<u8>, UpdateError> {
    if !response.is_success() {
        return Err(UpdateError::ResponseParse(format!(
            "chunk endpoint returned status {}",
            response.status()
        )));
    }
    if response.is_truncated() {
        return Err(UpdateError::ResponseParse(format!(
            "chunk response exceeds {} bytes",
            transfer.max_response_bytes
        )));
    }

    let chunk = decode_chunk_payload(response.body())?;
    if chunk.is_empty() {
        return Err(UpdateError::ResponseParse("decoded chunk is empty".into()));
    }
    if chunk.len() > requested_len {
        return Err(UpdateError::ResponseParse(format!(
            "decoded chunk has {} bytes, requested {requested_len}",
            chunk.len()
        )));
    }

    let Some(declared) = response.header(&transfer.digest_header) else {
        return Err(UpdateError::ChecksumMismatch {
            expected: format!("<missing {}>", transfer.digest_header),
            actual: transfer.digest.compute_base64(&chunk),
        });
    };
    transfer
        .digest
        .verify(&chunk, declared)
        .map_err(|actual| UpdateError::ChecksumMismatch {
            expected: declared.to_string(),
            actual,
        })?;

    Ok(chunk)
}

/// Runs the transfer loop against a transport and a partition manager
pub struct ChunkedDownloader {
    transport: Arc<dyn Transport>,
    flash: Arc<dyn FlashPartitionManager>,
    download_url: reqwest::Url,
    transfer: TransferConfig,
    indicator: Arc<dyn StatusIndicator>,
}

impl ChunkedDownloader {
    /// Create a downloader for the blob-range endpoint in `config`
    pub fn new(
        transport: Arc<dyn Transport>,
        flash: Arc<dyn FlashPartitionManager>,
        config: &OtaConfig,
    ) -> Result<Self, UpdateError> {
        config.transfer.validate()?;
        let download_url =
            reqwest::Url::parse(&config.download_url).map_err(|e| ConfigError::InvalidUrl {
                field: "download",
                value: config.download_url.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            transport,
            flash,
            download_url,
            transfer: config.transfer.clone(),
            indicator: Arc::new(LogIndicator),
        })
    }

    /// Replace the default logging indicator
    pub fn with_indicator(mut self, indicator: Arc<dyn StatusIndicator>) -> Self {
        self.indicator = indicator;
        self
    }

    /// Transfer tuning in effect
    pub fn transfer_config(&self) -> &TransferConfig {
        &self.transfer
    }

    /// URL for one byte range of `blob_name`. Existing query parameters of
    /// the download endpoint are kept.
    pub fn chunk_url(&self, blob_name: &str, request: ChunkRequest) -> String {
        let mut url = self.download_url.clone();
        url.query_pairs_mut()
            .append_pair("firmwareBlobName", blob_name)
            .append_pair("offset", &request.offset.to_string())
            .append_pair("chunkSize", &request.len.to_string());
        url.into()
    }

    /// Download, verify, write and activate the image in `descriptor`.
    ///
    /// On error the published offset goes back to zero, the fatal indicator
    /// is raised for flash failures, and the boot partition is unchanged.
    pub async fn run(
        &self,
        descriptor: &UpdateDescriptor,
        guard: &mut SessionGuard,
    ) -> Result<ActivatedImage, UpdateError> {
        let span = info_span!(
            "ota_session",
            session_id = %guard.session_id(),
            blob = %descriptor.blob_name,
        );

        async {
            let mut session = UpdateSession::new(descriptor, &self.transfer);
            guard.start_transfer(session.blob_name(), session.total_size());
            info!(size = session.total_size(), "Starting firmware download");

            let result = self.transfer_and_activate(&mut session, guard).await;
            if let Err(e) = &result {
                if e.is_fatal() {
                    session.mark_fatal();
                    guard.mark_fatal();
                }
                session.reset();
                guard.publish_offset(session.offset());
                self.indicator.signal(StatusSignal::Error);
                error!(error = %e, fatal = session.fatal_error(), "Firmware update aborted, current partition stays active");
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn transfer_and_activate(
        &self,
        session: &mut UpdateSession,
        guard: &mut SessionGuard,
    ) -> Result<ActivatedImage, UpdateError> {
        let layout = self
            .flash
            .layout()
            .await
            .map_err(|e| UpdateError::FlashBegin(format!("{e:#}")))?;
        if layout.boot_mismatch() {
            warn!(
                running = %layout.running,
                boot = %layout.boot,
                "Configured boot partition differs from the running partition"
            );
        }

        let target = layout.next_update;
        info!(partition = %target, running = %layout.running, "Writing update partition");
        let write = self
            .flash
            .begin_write(target, session.total_size())
            .await
            .map_err(|e| UpdateError::FlashBegin(format!("{e:#}")))?;

        self.transfer(session, guard, &write).await?;

        guard.set_state(SessionState::Finalizing);
        self.flash
            .finalize(write)
            .await
            .map_err(|e| UpdateError::FlashFinalize(format!("{e:#}")))?;
        self.flash
            .activate(target)
            .await
            .map_err(|e| UpdateError::FlashActivate(format!("{e:#}")))?;

        info!(partition = %target, size = session.total_size(), "Firmware image activated");
        Ok(ActivatedImage {
            partition: target,
            size: session.total_size(),
        })
    }

    async fn transfer(
        &self,
        session: &mut UpdateSession,
        guard: &mut SessionGuard,
        write: &WriteSession,
    ) -> Result<(), UpdateError> {
        while !session.is_complete() {
            let request = session.next_request();
            let url = self.chunk_url(session.blob_name(), request);
            let response = self
                .transport
                .get(&url, self.transfer.max_response_bytes)
                .await
                .map_err(|e| UpdateError::Transport(format!("{e:#}")))?;

            match decode_chunk_response(&response, request.len, &self.transfer) {
                Ok(chunk) => {
                    self.flash
                        .write(write, &chunk)
                        .await
                        .map_err(|e| UpdateError::FlashWrite(format!("{e:#}")))?;
                    session.record_success(chunk.len());
                    guard.publish_offset(session.offset());
                    self.indicator.signal(StatusSignal::Ok);
                    debug!(
                        offset = session.offset(),
                        total = session.total_size(),
                        chunk_size = session.chunk_size().chunk_size(),
                        "Chunk written"
                    );
                }
                Err(e) => {
                    session.record_failure();
                    self.indicator.signal(StatusSignal::Error);
                    warn!(
                        offset = request.offset,
                        requested = request.len,
                        retries = session.consecutive_retries(),
                        chunk_size = session.chunk_size().chunk_size(),
                        error = %e,
                        "Chunk rejected"
                    );
                    if session.retries_exhausted() {
                        return Err(UpdateError::RetryBudgetExceeded {
                            attempts: session.consecutive_retries(),
                            last_failure: e.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
