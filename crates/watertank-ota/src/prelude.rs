//! Convenience re-exports for common update engine types

pub use crate::commands::{CommandFlags, DeviceCommand};
pub use crate::config::{OtaConfig, TransferConfig};
pub use crate::digest::DigestAlgorithm;
pub use crate::error::{ConfigError, UpdateError};
pub use crate::indicator::{StatusIndicator, StatusSignal};
pub use crate::launcher::{Connectivity, SessionEnd};
pub use crate::partition::{FlashPartitionManager, Partition, PartitionLayout, WriteSession};
pub use crate::progress::{ProgressSnapshot, ProgressState, ReportedState, SessionState};
pub use crate::service::{LoopControl, UpdateService};
pub use crate::transport::{HttpTransport, Transport, TransportResponse};
pub use crate::version_check::{UpdateDescriptor, VersionCheckOutcome};
