//! Error types for the directory synchronizer.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for synchronizer operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while synchronizing a directory.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Watched directory does not exist.
    #[error("directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    /// Path exists but is not a directory.
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// The synchronizer was stopped.
    #[error("synchronizer stopped")]
    Stopped,

    /// The executor is gone and can no longer accept actions.
    #[error("executor closed: action was not scheduled")]
    ExecutorClosed,

    /// A scheduled action panicked on the owner context.
    #[error("scheduled action panicked: {0}")]
    ActionPanicked(String),

    /// Notify error.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// Directory enumeration error.
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("invalid configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}
