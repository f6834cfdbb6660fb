//! Over-the-air firmware updates for networked sensor devices
//!
//! This crate provides resumable-by-design, integrity-checked firmware updates with:
//! - A version check against an update-metadata endpoint
//! - Chunked download with adaptive chunk sizing and a bounded retry budget
//! - Per-chunk digest validation (`Content-MD5`) before anything touches flash
//! - A/B partition writes with activation only after a complete, verified transfer
//! - Rollback to the previously active partition
//! - Single-writer progress state with snapshot reporting
//!
//! # Architecture
//!
//! - [`version_check`]: Update-metadata query and version comparison
//! - [`downloader`]: The chunk transfer loop
//! - [`chunk_size`]: Adaptive chunk size controller
//! - [`session`]: Per-session transfer record
//! - [`payload`] / [`digest`]: Chunk wire format and integrity check
//! - [`partition`]: Flash partition manager contract
//! - [`transport`]: Transport contract and the HTTP client
//! - [`progress`]: Shared progress state and session token
//! - [`launcher`] / [`rollback`] / [`service`]: Session lifecycle and commands
//! - [`commands`]: Command payloads and flags
//! - [`config`] / [`error`]: Configuration and error types
//!
//! # Safety
//!
//! At most one session runs at a time, and no partition switch happens
//! while it does. A partial or corrupted image is never made bootable.
//!
//! # Example
//!
//! ```ignore
//! use watertank_ota::prelude::*;
//!
//! # async fn example(flash: std::sync::Arc<dyn FlashPartitionManager>) -> Result<(), UpdateError> {
//! let config = OtaConfig::default().with_firmware_version("9.0.0.0");
//! let transport = std::sync::Arc::new(HttpTransport::new(config.request_timeout())?);
//! let service = UpdateService::builder(config, transport, flash).build()?;
//!
//! let flags = CommandFlags::new();
//! flags.raise(DeviceCommand::TriggerUpdate);
//! service.dispatch(&flags).await;
//! println!("{}", serde_json::to_string(&service.reported_state())?);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod chunk_size;
pub mod commands;
pub mod config;
pub mod digest;
pub mod downloader;
pub mod error;
pub mod indicator;
pub mod launcher;
pub mod partition;
pub mod payload;
pub mod prelude;
pub mod progress;
pub mod rollback;
pub mod service;
pub mod session;
pub mod transport;
pub mod version_check;

pub use chunk_size::ChunkSizeController;
pub use commands::{CommandFlags, DeviceCommand};
pub use config::{OtaConfig, TransferConfig};
pub use digest::DigestAlgorithm;
pub use downloader::{ActivatedImage, ChunkedDownloader, decode_chunk_response};
pub use error::{ConfigError, UpdateError};
pub use indicator::{LogIndicator, StatusIndicator, StatusSignal};
pub use launcher::{Connectivity, SessionEnd, SessionLauncher};
pub use partition::{FlashPartitionManager, Partition, PartitionLayout, WriteSession};
pub use payload::{PayloadError, decode_chunk_payload, encode_chunk_payload};
pub use progress::{
    ProgressSnapshot, ProgressState, ReportedState, SessionGuard, SessionOutcome, SessionRecord,
    SessionState,
};
pub use rollback::RollbackController;
pub use service::{LoopControl, SessionHandle, UpdateService, UpdateServiceBuilder};
pub use session::{ChunkRequest, UpdateSession};
pub use transport::{HttpTransport, Transport, TransportResponse};
pub use version_check::{UpdateDescriptor, VersionCheckOutcome, VersionChecker};
