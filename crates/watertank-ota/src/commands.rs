//! Cloud-to-device commands
//!
//! The messaging client raises flags; the main loop consumes and clears them
//! through [`crate::service::UpdateService::dispatch`]. No channel between
//! the two, only these booleans.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// A command accepted from the messaging collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceCommand {
    /// Start an update session
    TriggerUpdate,
    /// Switch back to the previously active partition
    TriggerRollback,
    /// Restart the device
    TriggerReboot,
    /// Leave the main loop
    Quit,
}

impl DeviceCommand {
    /// All commands, in dispatch order
    pub const ALL: [DeviceCommand; 4] = [
        DeviceCommand::TriggerUpdate,
        DeviceCommand::TriggerRollback,
        DeviceCommand::TriggerReboot,
        DeviceCommand::Quit,
    ];

    /// Message payload that selects this command
    pub const fn wire_name(self) -> &'static str {
        match self {
            DeviceCommand::TriggerUpdate => "TriggerSoftwareUpdate",
            DeviceCommand::TriggerRollback => "SwitchToPreviousPartition",
            DeviceCommand::TriggerReboot => "Reboot",
            DeviceCommand::Quit => "Quit",
        }
    }

    /// Exact byte match against the known payloads
    pub fn parse(payload: &[u8]) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|command| command.wire_name().as_bytes() == payload)
    }
}

impl std::fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Pending command flags shared between the messaging client and the main loop
#[derive(Debug, Default)]
pub struct CommandFlags {
    update: AtomicBool,
    rollback: AtomicBool,
    reboot: AtomicBool,
    quit: AtomicBool,
}

impl CommandFlags {
    /// No pending commands
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self, command: DeviceCommand) -> &AtomicBool {
        match command {
            DeviceCommand::TriggerUpdate => &self.update,
            DeviceCommand::TriggerRollback => &self.rollback,
            DeviceCommand::TriggerReboot => &self.reboot,
            DeviceCommand::Quit => &self.quit,
        }
    }

    /// Mark `command` as pending
    pub fn raise(&self, command: DeviceCommand) {
        self.flag(command).store(true, Ordering::Release);
    }

    /// Consume `command`: true if it was pending, and it no longer is
    pub fn take(&self, command: DeviceCommand) -> bool {
        self.flag(command).swap(false, Ordering::AcqRel)
    }

    /// Whether `command` is pending, without consuming it
    pub fn is_raised(&self, command: DeviceCommand) -> bool {
        self.flag(command).load(Ordering::Acquire)
    }

    /// Parse a raw message and raise the matching flag. Unknown payloads
    /// are logged and ignored.
    pub fn handle_message(&self, payload: &[u8]) -> Option<DeviceCommand> {
        match DeviceCommand::parse(payload) {
            Some(command) => {
                info!(%command, "Command received");
                self.raise(command);
                Some(command)
            }
            None => {
                warn!(payload = %String::from_utf8_lossy(payload), "Unknown command ignored");
                None
            }
        }
    }
}
