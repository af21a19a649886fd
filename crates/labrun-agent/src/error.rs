//! Agent error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors that prevent an artifact from being fetched. Each one is fatal to
/// the task that requested it and to nothing else.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Name would not map to a single file inside the scratch directory.
    #[error("Invalid artifact name '{0}'")]
    InvalidName(String),

    /// The download request could not be completed.
    #[error("Download failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The control plane answered with a non-success status.
    #[error("Download of '{url}' returned {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    /// The scratch file could not be created.
    #[error("Failed to create artifact '{}': {source}", path.display())]
    Create { path: PathBuf, source: io::Error },

    /// The artifact body could not be written.
    #[error("Failed to write artifact '{}': {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    /// The artifact could not be made executable.
    #[error("Failed to mark artifact '{}' executable: {source}", path.display())]
    Permissions { path: PathBuf, source: io::Error },
}

/// Errors surfaced by the agent's session and lifecycle.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The control plane ended the session and the agent was configured to
    /// stop with it.
    #[error("Session with the control plane ended")]
    SessionLost,
}
