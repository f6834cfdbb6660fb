//! File-backed A/B flash for host builds
//!
//! Two slot files and a JSON boot record in one directory. The partition the
//! agent "booted" from is decided when the directory is opened: the boot
//! pointer if that slot holds a finalized image, the other slot otherwise.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use watertank_ota::{FlashPartitionManager, Partition, WriteSession};

/// Boot record file name
pub const BOOT_RECORD_FILE: &str = "otadata.json";

/// Persistent boot data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootRecord {
    /// Partition the boot pointer selects
    pub boot: Partition,
    /// Partitions holding a finalized image
    pub valid: Vec<Partition>,
    /// Last change to the record
    pub updated_at: DateTime<Utc>,
}

impl Default for BootRecord {
    fn default() -> Self {
        Self {
            boot: Partition::A,
            valid: vec![Partition::A],
            updated_at: Utc::now(),
        }
    }
}

/// Flash state for the `status` command
#[derive(Debug, Clone, Serialize)]
pub struct FlashStatus {
    pub running: Partition,
    pub boot: Partition,
    pub valid: Vec<Partition>,
    pub slot_a_bytes: u64,
    pub slot_b_bytes: u64,
    pub updated_at: DateTime<Utc>,
}

pub struct FileFlash {
    dir: PathBuf,
    running: Partition,
    record: Mutex<BootRecord>,
}

fn slot_file_name(partition: Partition) -> &'static str {
    match partition {
        Partition::A => "slot_a.bin",
        Partition::B => "slot_b.bin",
    }
}

impl FileFlash {
    /// Open (or initialize) the flash directory and pick the running slot
    pub async fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create flash directory: {}", dir.display()))?;

        let record_path = dir.join(BOOT_RECORD_FILE);
        let record = if record_path.exists() {
            let content = tokio::fs::read_to_string(&record_path)
                .await
                .with_context(|| format!("Failed to read boot record: {}", record_path.display()))?;
            serde_json::from_str(&content).context("Failed to parse boot record")?
        } else {
            info!(dir = %dir.display(), "Initializing flash directory");
            let record = BootRecord::default();
            let factory = dir.join(slot_file_name(Partition::A));
            if !factory.exists() {
                tokio::fs::write(&factory, b"")
                    .await
                    .context("Failed to create factory slot")?;
            }
            write_record(&record_path, &record).await?;
            record
        };

        let running = if record.valid.contains(&record.boot) {
            record.boot
        } else {
            warn!(boot = %record.boot, "Boot slot holds no valid image, falling back");
            record.boot.other()
        };

        Ok(Self {
            dir,
            running,
            record: Mutex::new(record),
        })
    }

    fn slot_path(&self, partition: Partition) -> PathBuf {
        self.dir.join(slot_file_name(partition))
    }

    fn partial_path(&self, partition: Partition) -> PathBuf {
        self.dir
            .join(format!("{}.partial", slot_file_name(partition)))
    }

    async fn save(&self, record: &mut BootRecord) -> Result<()> {
        record.updated_at = Utc::now();
        write_record(&self.dir.join(BOOT_RECORD_FILE), record).await
    }

    /// Current boot record and slot sizes
    pub async fn status(&self) -> Result<FlashStatus> {
        let record = self.record.lock().await.clone();
        Ok(FlashStatus {
            running: self.running,
            boot: record.boot,
            valid: record.valid,
            slot_a_bytes: file_len(&self.slot_path(Partition::A)).await?,
            slot_b_bytes: file_len(&self.slot_path(Partition::B)).await?,
            updated_at: record.updated_at,
        })
    }

    #[cfg(test)]
    async fn read_slot(&self, partition: Partition) -> Result<Vec<u8>> {
        let path = self.slot_path(partition);
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read slot: {}", path.display()))
    }
}

async fn write_record(path: &Path, record: &BootRecord) -> Result<()> {
    let content = serde_json::to_string_pretty(record).context("Failed to serialize boot record")?;
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("Failed to write boot record: {}", path.display()))
}

async fn file_len(path: &Path) -> Result<u64> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => Ok(metadata.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e).with_context(|| format!("Failed to stat {}", path.display())),
    }
}

#[async_trait::async_trait]
impl FlashPartitionManager for FileFlash {
    async fn running_partition(&self) -> Result<Partition> {
        Ok(self.running)
    }

    async fn boot_partition(&self) -> Result<Partition> {
        Ok(self.record.lock().await.boot)
    }

    async fn next_update_partition(&self) -> Result<Partition> {
        Ok(self.running.other())
    }

    async fn begin_write(&self, partition: Partition, expected_size: u64) -> Result<WriteSession> {
        if partition == self.running {
            bail!("partition {partition} is running and cannot be written");
        }

        {
            let mut record = self.record.lock().await;
            if record.valid.contains(&partition) {
                record.valid.retain(|p| *p != partition);
                self.save(&mut record).await?;
            }
        }

        let partial = self.partial_path(partition);
        tokio::fs::File::create(&partial)
            .await
            .with_context(|| format!("Failed to create {}", partial.display()))?;
        info!(%partition, expected_size, "Write session opened");
        Ok(WriteSession::new(partition, expected_size))
    }

    async fn write(&self, session: &WriteSession, data: &[u8]) -> Result<()> {
        let partial = self.partial_path(session.partition());
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&partial)
            .await
            .with_context(|| format!("No open write session for {}", session.partition()))?;
        file.write_all(data).await.context("Failed to write chunk")?;
        file.flush().await.context("Failed to flush chunk")?;
        debug!(partition = %session.partition(), len = data.len(), "Chunk persisted");
        Ok(())
    }

    async fn finalize(&self, session: WriteSession) -> Result<()> {
        let partition = session.partition();
        let partial = self.partial_path(partition);
        let written = file_len(&partial).await?;
        if written != session.expected_size() {
            if let Err(e) = tokio::fs::remove_file(&partial).await {
                debug!(error = %e, "Failed to discard partial image");
            }
            bail!(
                "image size mismatch on {partition}: wrote {written} bytes, expected {}",
                session.expected_size()
            );
        }

        tokio::fs::rename(&partial, self.slot_path(partition))
            .await
            .context("Failed to commit image")?;
        let mut record = self.record.lock().await;
        if !record.valid.contains(&partition) {
            record.valid.push(partition);
        }
        self.save(&mut record).await?;
        info!(%partition, size = written, "Image finalized");
        Ok(())
    }

    async fn activate(&self, partition: Partition) -> Result<()> {
        let mut record = self.record.lock().await;
        if !record.valid.contains(&partition) {
            bail!("partition {partition} holds no finalized image");
        }
        record.boot = partition;
        self.save(&mut record).await?;
        info!(%partition, "Boot partition set");
        Ok(())
    }

    #[expect(clippy::exit, reason = "a restart ends the agent process")]
    async fn restart_device(&self) -> Infallible {
        info!("Restarting");
        std::process::exit(0)
    }
}
