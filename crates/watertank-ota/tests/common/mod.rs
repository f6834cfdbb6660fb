//! Shared mocks for the update engine integration tests

#![expect(dead_code, reason = "each test binary uses a different subset of the mocks")]

use anyhow::{Context, Result, anyhow, bail};
use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use watertank_ota::prelude::*;
use watertank_ota::encode_chunk_payload;

pub const RUNNING_VERSION: &str = "9.0.0.0";
pub const CHECK_URL: &str = "http://device.test/api/GetLatestFirmwareVersion";
pub const DOWNLOAD_URL: &str = "http://device.test/api/DownloadFirmware?code=abc";
pub const BLOB_NAME: &str = "watertank-9.1.0.0.bin";

/// Engine configuration pointing at the mock endpoints
pub fn test_config() -> OtaConfig {
    OtaConfig::default()
        .with_firmware_version(RUNNING_VERSION)
        .with_check_url(CHECK_URL)
        .with_download_url(DOWNLOAD_URL)
}

/// Deterministic image bytes
pub fn test_image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) % 251) as u8).collect()
}

pub fn descriptor(size: u64) -> UpdateDescriptor {
    UpdateDescriptor {
        latest_version: "9.1.0.0".to_string(),
        blob_name: BLOB_NAME.to_string(),
        blob_size: size,
    }
}

pub fn metadata_json(version: &str, size: u64) -> String {
    serde_json::json!({
        "latestVersion": version,
        "blobName": BLOB_NAME,
        "blobSize": size,
    })
    .to_string()
}

/// How the mock answers one chunk request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkFault {
    /// Correct chunk and digest
    Serve,
    /// Digest header for different bytes
    BadDigest,
    /// One byte flipped after the digest was computed
    CorruptBody,
    /// Payload without the surrounding quotes
    Unquoted,
    /// Empty body
    EmptyBody,
    /// No digest header
    MissingDigest,
    /// 500 with an otherwise valid body
    ServerError,
    /// Request cannot be opened
    OpenFailure,
}

/// Chunk requests parsed from the URLs the engine issued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeenRequest {
    pub offset: usize,
    pub len: usize,
}

/// Serves a metadata document and ranges of an in-memory image
pub struct MockTransport {
    image: Vec<u8>,
    metadata: Mutex<Option<String>>,
    script: Mutex<VecDeque<ChunkFault>>,
    urls: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new(image: Vec<u8>) -> Self {
        Self {
            image,
            metadata: Mutex::new(None),
            script: Mutex::new(VecDeque::new()),
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_metadata(self, body: impl Into<String>) -> Self {
        Self {
            metadata: Mutex::new(Some(body.into())),
            ..self
        }
    }

    pub fn with_script(self, faults: impl IntoIterator<Item = ChunkFault>) -> Self {
        Self {
            script: Mutex::new(faults.into_iter().collect()),
            ..self
        }
    }

    pub async fn urls(&self) -> Vec<String> {
        self.urls.lock().await.clone()
    }

    pub async fn chunk_requests(&self) -> Result<Vec<SeenRequest>> {
        let urls = self.urls.lock().await.clone();
        urls.iter()
            .filter(|url| url.as_str() != CHECK_URL)
            .map(|url| parse_chunk_url(url))
            .collect()
    }
}

pub fn parse_chunk_url(url: &str) -> Result<SeenRequest> {
    let parsed = reqwest::Url::parse(url)?;
    let mut offset = None;
    let mut len = None;
    for (key, value) in parsed.query_pairs() {
        match key.as_ref() {
            "offset" => offset = Some(value.parse::<usize>()?),
            "chunkSize" => len = Some(value.parse::<usize>()?),
            _ => {}
        }
    }
    Ok(SeenRequest {
        offset: offset.context("offset missing")?,
        len: len.context("chunkSize missing")?,
    })
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn get(&self, url: &str, max_body_len: usize) -> Result<TransportResponse> {
        self.urls.lock().await.push(url.to_string());

        if url == CHECK_URL {
            let Some(body) = self.metadata.lock().await.clone() else {
                bail!("metadata endpoint unreachable");
            };
            let headers: [(&str, &str); 1] = [("Content-Type", "application/json")];
            return Ok(TransportResponse::new(200, headers, body.into_bytes()));
        }

        let request = parse_chunk_url(url)?;
        let fault = self
            .script
            .lock()
            .await
            .pop_front()
            .unwrap_or(ChunkFault::Serve);

        let end = request.offset.saturating_add(request.len).min(self.image.len());
        let chunk = self
            .image
            .get(request.offset..end)
            .ok_or_else(|| anyhow!("range {}..{end} outside image", request.offset))?
            .to_vec();
        let digest = DigestAlgorithm::Md5.compute_base64(&chunk);

        let (status, mut body, header) = match fault {
            ChunkFault::Serve => (200, encode_chunk_payload(&chunk), Some(digest)),
            ChunkFault::BadDigest => (
                200,
                encode_chunk_payload(&chunk),
                Some(DigestAlgorithm::Md5.compute_base64(b"some other chunk")),
            ),
            ChunkFault::CorruptBody => {
                let mut corrupted = chunk.clone();
                if let Some(first) = corrupted.first_mut() {
                    *first ^= 0xFF;
                }
                (200, encode_chunk_payload(&corrupted), Some(digest))
            }
            ChunkFault::Unquoted => {
                let mut body = encode_chunk_payload(&chunk);
                body.retain(|b| *b != b'"');
                (200, body, Some(digest))
            }
            ChunkFault::EmptyBody => (200, Vec::new(), Some(digest)),
            ChunkFault::MissingDigest => (200, encode_chunk_payload(&chunk), None),
            ChunkFault::ServerError => (500, encode_chunk_payload(&chunk), Some(digest)),
            ChunkFault::OpenFailure => bail!("connection refused"),
        };

        let truncated = body.len() > max_body_len;
        body.truncate(max_body_len);
        let headers: Vec<(&str, String)> = header
            .map(|value| ("Content-MD5", value))
            .into_iter()
            .collect();
        Ok(TransportResponse::new(status, headers, body).with_truncated(truncated))
    }
}

#[derive(Debug, Default)]
struct FlashState {
    slots: HashMap<Partition, Vec<u8>>,
    finalized: Vec<Partition>,
    activations: Vec<Partition>,
    writes: usize,
}

/// In-memory A/B flash
pub struct MockFlash {
    running: Partition,
    boot: Mutex<Partition>,
    state: Mutex<FlashState>,
    pub fail_begin: AtomicBool,
    pub fail_write_at: AtomicUsize,
    pub fail_finalize: AtomicBool,
    pub fail_activate: AtomicBool,
    restarted: AtomicBool,
    restart_notify: Notify,
}

impl MockFlash {
    /// Running from A, booting A, updates go to B
    pub fn new() -> Self {
        Self::with_boot(Partition::A, Partition::A)
    }

    pub fn with_boot(running: Partition, boot: Partition) -> Self {
        Self {
            running,
            boot: Mutex::new(boot),
            state: Mutex::new(FlashState::default()),
            fail_begin: AtomicBool::new(false),
            fail_write_at: AtomicUsize::new(usize::MAX),
            fail_finalize: AtomicBool::new(false),
            fail_activate: AtomicBool::new(false),
            restarted: AtomicBool::new(false),
            restart_notify: Notify::new(),
        }
    }

    pub async fn boot(&self) -> Partition {
        *self.boot.lock().await
    }

    pub async fn slot(&self, partition: Partition) -> Vec<u8> {
        self.state
            .lock()
            .await
            .slots
            .get(&partition)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn activations(&self) -> Vec<Partition> {
        self.state.lock().await.activations.clone()
    }

    pub async fn write_count(&self) -> usize {
        self.state.lock().await.writes
    }

    pub fn restarted(&self) -> bool {
        self.restarted.load(Ordering::Acquire)
    }

    /// Resolve once `restart_device` was called
    pub async fn wait_for_restart(&self, timeout: Duration) -> Result<()> {
        if self.restarted() {
            return Ok(());
        }
        tokio::time::timeout(timeout, self.restart_notify.notified())
            .await
            .context("device was not restarted")
    }
}

#[async_trait::async_trait]
impl FlashPartitionManager for MockFlash {
    async fn running_partition(&self) -> Result<Partition> {
        Ok(self.running)
    }

    async fn boot_partition(&self) -> Result<Partition> {
        Ok(*self.boot.lock().await)
    }

    async fn next_update_partition(&self) -> Result<Partition> {
        Ok(self.running.other())
    }

    async fn begin_write(&self, partition: Partition, expected_size: u64) -> Result<WriteSession> {
        if self.fail_begin.load(Ordering::Acquire) {
            bail!("partition {partition} busy");
        }
        if partition == self.running {
            bail!("refusing to write the running partition");
        }
        let mut state = self.state.lock().await;
        state.slots.insert(partition, Vec::new());
        state.finalized.retain(|p| *p != partition);
        Ok(WriteSession::new(partition, expected_size))
    }

    async fn write(&self, session: &WriteSession, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.writes == self.fail_write_at.load(Ordering::Acquire) {
            bail!("flash write error at chunk {}", state.writes);
        }
        state.writes += 1;
        state
            .slots
            .entry(session.partition())
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }

    async fn finalize(&self, session: WriteSession) -> Result<()> {
        if self.fail_finalize.load(Ordering::Acquire) {
            bail!("image validation failed");
        }
        let mut state = self.state.lock().await;
        let written = state
            .slots
            .get(&session.partition())
            .map_or(0, Vec::len);
        if written as u64 != session.expected_size() {
            bail!(
                "wrote {written} bytes, expected {}",
                session.expected_size()
            );
        }
        state.finalized.push(session.partition());
        Ok(())
    }

    async fn activate(&self, partition: Partition) -> Result<()> {
        if self.fail_activate.load(Ordering::Acquire) {
            bail!("boot data write failed");
        }
        self.state.lock().await.activations.push(partition);
        *self.boot.lock().await = partition;
        Ok(())
    }

    async fn restart_device(&self) -> Infallible {
        self.restarted.store(true, Ordering::Release);
        self.restart_notify.notify_one();
        std::future::pending().await
    }
}

/// Counts status signals
#[derive(Debug, Default)]
pub struct CountingIndicator {
    pub ok: AtomicUsize,
    pub error: AtomicUsize,
}

impl CountingIndicator {
    pub fn counts(&self) -> (usize, usize) {
        (self.ok.load(Ordering::Acquire), self.error.load(Ordering::Acquire))
    }
}

impl StatusIndicator for CountingIndicator {
    fn signal(&self, signal: StatusSignal) {
        let counter = match signal {
            StatusSignal::Ok => &self.ok,
            StatusSignal::Error => &self.error,
        };
        counter.fetch_add(1, Ordering::AcqRel);
    }
}

/// Fresh idle progress state for the running version
pub fn progress() -> Arc<ProgressState> {
    Arc::new(ProgressState::new(RUNNING_VERSION))
}
