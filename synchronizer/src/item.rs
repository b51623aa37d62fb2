//! Tracked items keyed by absolute path.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An entry in a [`PathKeyedCollection`](crate::PathKeyedCollection).
///
/// The path is the primary key. `settings` holds whatever the embedding
/// application attaches to an item; the synchronizer never looks at it and
/// carries it across renames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedItem<S = ()> {
    path: PathBuf,

    /// Domain settings attached to the item.
    pub settings: S,

    /// When the item started being tracked.
    pub added_at: DateTime<Utc>,
}

impl<S: Default> TrackedItem<S> {
    /// Create an item with default settings.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_settings(path, S::default())
    }
}

impl<S> TrackedItem<S> {
    /// Create an item with explicit settings.
    pub fn with_settings(path: impl Into<PathBuf>, settings: S) -> Self {
        Self {
            path: path.into(),
            settings,
            added_at: Utc::now(),
        }
    }

    /// Absolute path of the item.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name of the item, if the path has one.
    pub fn file_name(&self) -> Option<String> {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }

    // Only the collection may change the key, so its index stays valid.
    pub(crate) fn set_path(&mut self, path: PathBuf) {
        self.path = path;
    }
}
