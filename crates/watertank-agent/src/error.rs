//! Error types for the device agent

use thiserror::Error;
use watertank_ota::UpdateError;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Flash simulator error: {0}")]
    Flash(String),

    #[error("Update error: {0}")]
    Update(#[from] UpdateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl AgentError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            AgentError::InvalidConfiguration(_) | AgentError::JsonError(_) => 4,
            AgentError::Update(UpdateError::Transport(_)) => 5,
            AgentError::Update(_) => 3,
            AgentError::Flash(_) => 2,
            AgentError::IoError(_) => 1,
        }
    }
}
