//! Configuration types for directory synchronization.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::filter::ExtensionFilter;

/// Configuration for a synchronized directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Path to the watched directory.
    pub directory: PathBuf,

    /// Extensions that make a file trackable.
    #[serde(default)]
    pub extensions: ExtensionFilter,

    /// Whether symbolic links to files are followed during reconciliation.
    #[serde(default)]
    pub follow_symlinks: bool,

    /// Which notification backend to use.
    #[serde(default)]
    pub backend: WatchBackend,
}

impl SyncConfig {
    /// Create a new config with default values.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            extensions: ExtensionFilter::default(),
            follow_symlinks: false,
            backend: WatchBackend::default(),
        }
    }

    /// Replace the extension allow-list.
    pub fn with_extensions<I, T>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        self.extensions = ExtensionFilter::new(extensions);
        self
    }

    /// Set the watch backend.
    pub fn with_backend(mut self, backend: WatchBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Enable following symbolic links.
    pub fn follow_symlinks(mut self) -> Self {
        self.follow_symlinks = true;
        self
    }

    /// Parse a config from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<()> {
        if self.directory.as_os_str().is_empty() {
            return Err(SyncError::Config("directory must not be empty".to_string()));
        }
        if self.extensions.extensions().is_empty() {
            return Err(SyncError::Config(
                "at least one extension is required".to_string(),
            ));
        }
        if let WatchBackend::Poll { interval_ms: 0 } = self.backend {
            return Err(SyncError::Config(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// How change notifications are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WatchBackend {
    /// The platform's native notification API.
    #[default]
    Native,

    /// Periodic polling, for filesystems without native notifications.
    Poll {
        /// Interval between polls in milliseconds.
        interval_ms: u64,
    },
}

impl WatchBackend {
    /// Poll interval, if polling.
    pub fn poll_interval(&self) -> Option<Duration> {
        match self {
            Self::Native => None,
            Self::Poll { interval_ms } => Some(Duration::from_millis(*interval_ms)),
        }
    }
}
