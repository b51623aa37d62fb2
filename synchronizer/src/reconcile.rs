//! Full reconciliation of a collection against a directory listing, and the
//! mutation primitives shared with incremental event handling.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::collection::PathKeyedCollection;
use crate::error::Result;
use crate::filter::ExtensionFilter;
use crate::item::TrackedItem;

/// Append a new item for `path` unless one already exists.
///
/// This is the only place items are created, which keeps paths unique even
/// when several notifications schedule an add for the same file.
pub fn add_if_not_exist<S: Default>(collection: &mut PathKeyedCollection<S>, path: PathBuf) -> bool {
    if collection.contains(&path) {
        return false;
    }
    debug!("Tracking {}", path.display());
    collection.append(TrackedItem::new(path))
}

/// Remove the item for `path`, if tracked.
pub fn remove_path<S>(collection: &mut PathKeyedCollection<S>, path: &Path) -> bool {
    match collection.remove(path) {
        Some(_) => {
            debug!("Untracked {}", path.display());
            true
        }
        None => false,
    }
}

/// Apply a rename: move the item in place if `from` is tracked, otherwise
/// treat `to` as a new arrival.
///
/// When `to` is already tracked the item for `from` is dropped instead, so
/// the collection never holds two items for one path.
pub fn rename_or_add<S: Default>(
    collection: &mut PathKeyedCollection<S>,
    from: &Path,
    to: PathBuf,
) -> bool {
    if from == to {
        return false;
    }
    if !collection.contains(from) {
        return add_if_not_exist(collection, to);
    }
    if collection.contains(&to) {
        debug!(
            "Rename target {} already tracked, dropping {}",
            to.display(),
            from.display()
        );
        return remove_path(collection, from);
    }

    debug!("Renamed {} -> {}", from.display(), to.display());
    collection.rename(from, to)
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResyncReport {
    /// Files found in the directory.
    pub enumerated: usize,

    /// Items appended.
    pub added: usize,

    /// Items removed because their file is gone.
    pub removed: usize,

    /// Directory entries that could not be read.
    pub skipped: usize,

    /// Time taken in milliseconds.
    pub duration_ms: u64,
}

impl ResyncReport {
    /// Whether the pass changed the collection.
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

/// Enumerates one directory and brings a collection in line with it.
#[derive(Debug, Clone)]
pub struct Reconciler {
    directory: PathBuf,
    filter: ExtensionFilter,
    follow_symlinks: bool,
}

impl Reconciler {
    /// Create a reconciler for `directory`.
    pub fn new(directory: impl Into<PathBuf>, filter: ExtensionFilter) -> Self {
        Self {
            directory: directory.into(),
            filter,
            follow_symlinks: false,
        }
    }

    /// Follow symbolic links when deciding whether an entry is a file.
    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// The directory being reconciled.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// The extension filter in use.
    pub fn filter(&self) -> &ExtensionFilter {
        &self.filter
    }

    /// Whether a notification for `path` should lead to tracking it.
    ///
    /// Same rule as a full pass: the name must pass the filter, and an entry
    /// that exists must be a file, or a link to a file when links are
    /// followed. A path that is already gone is accepted; its deletion or the
    /// next pass settles it.
    pub fn accepts(&self, path: &Path) -> bool {
        if !self.filter.is_trackable_path(path) {
            return false;
        }
        match fs::symlink_metadata(path) {
            Err(_) => true,
            Ok(meta) if meta.file_type().is_symlink() => self.follow_symlinks && path.is_file(),
            Ok(meta) => meta.is_file(),
        }
    }

    /// Run a full pass: add every trackable file not yet tracked, then remove
    /// every item whose file is no longer in the directory.
    pub fn reconcile<S: Default>(&self, collection: &mut PathKeyedCollection<S>) -> Result<ResyncReport> {
        let start = Instant::now();
        let mut report = ResyncReport::default();

        let (files, skipped) = self.enumerate()?;
        report.enumerated = files.len();
        report.skipped = skipped;

        let present: HashSet<&Path> = files.iter().map(PathBuf::as_path).collect();

        for path in &files {
            if self.filter.is_trackable_path(path) && add_if_not_exist(collection, path.clone()) {
                report.added += 1;
            }
        }

        report.removed = collection.retain(|item| present.contains(item.path()));

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Reconciled {} in {}ms (files: {}, added: {}, removed: {}, skipped: {})",
            self.directory.display(),
            report.duration_ms,
            report.enumerated,
            report.added,
            report.removed,
            report.skipped
        );

        Ok(report)
    }

    /// List the files directly inside the directory, in enumeration order.
    ///
    /// Entries that fail to read are logged and skipped; failing to open the
    /// directory itself is an error.
    fn enumerate(&self) -> Result<(Vec<PathBuf>, usize)> {
        let mut files = Vec::new();
        let mut skipped = 0;

        let walker = WalkDir::new(&self.directory)
            .min_depth(1)
            .max_depth(1)
            .follow_links(self.follow_symlinks);

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.depth() == 0 => return Err(err.into()),
                Err(err) => {
                    warn!("Skipping unreadable entry in {}: {err}", self.directory.display());
                    skipped += 1;
                    continue;
                }
            };

            // Reports the link target's type only when links are followed.
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }

        Ok((files, skipped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs::{self, File};
    use tempfile::TempDir;

    fn names<S>(collection: &PathKeyedCollection<S>) -> Vec<String> {
        collection.iter().filter_map(TrackedItem::file_name).collect()
    }

    /// Names from `keep` in the order the directory listing yields them.
    fn listing_order(dir: &Path, keep: &[&str]) -> Vec<String> {
        WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| keep.contains(&name.as_str()))
            .collect()
    }

    #[test]
    fn test_add_if_not_exist_is_unique() {
        let mut items: PathKeyedCollection = PathKeyedCollection::new();

        assert!(add_if_not_exist(&mut items, PathBuf::from("/w/a.jpg")));
        assert!(!add_if_not_exist(&mut items, PathBuf::from("/w/a.jpg")));
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_rename_or_add() {
        let mut items: PathKeyedCollection<u8> = PathKeyedCollection::new();
        add_if_not_exist(&mut items, PathBuf::from("/w/a.jpg"));
        *items.settings_mut(Path::new("/w/a.jpg")).unwrap() = 3;

        assert!(rename_or_add(&mut items, Path::new("/w/a.jpg"), PathBuf::from("/w/b.jpg")));
        assert_eq!(items.get(Path::new("/w/b.jpg")).unwrap().settings, 3);

        // Untracked source behaves like an arrival.
        assert!(rename_or_add(&mut items, Path::new("/w/x.jpg"), PathBuf::from("/w/c.jpg")));
        assert_eq!(names(&items), vec!["b.jpg", "c.jpg"]);

        // Target already tracked: the source entry goes away.
        assert!(rename_or_add(&mut items, Path::new("/w/b.jpg"), PathBuf::from("/w/c.jpg")));
        assert_eq!(names(&items), vec!["c.jpg"]);

        assert!(!rename_or_add(&mut items, Path::new("/w/c.jpg"), PathBuf::from("/w/c.jpg")));
    }

    #[test]
    fn test_reconcile_filters_and_removes() {
        let temp_dir = TempDir::new().unwrap();
        File::create(temp_dir.path().join("A.jpg")).unwrap();
        File::create(temp_dir.path().join("B.txt")).unwrap();
        File::create(temp_dir.path().join("C.png")).unwrap();
        fs::create_dir(temp_dir.path().join("nested.png")).unwrap();

        let reconciler = Reconciler::new(temp_dir.path(), ExtensionFilter::default());
        let mut items: PathKeyedCollection = PathKeyedCollection::new();
        add_if_not_exist(&mut items, temp_dir.path().join("stale.jpg"));

        let report = reconciler.reconcile(&mut items).unwrap();

        assert_eq!(report.enumerated, 3);
        assert_eq!(report.added, 2);
        assert_eq!(report.removed, 1);
        assert_eq!(names(&items), listing_order(temp_dir.path(), &["A.jpg", "C.png"]));
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_reconcile_twice_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        File::create(temp_dir.path().join("a.gif")).unwrap();

        let reconciler = Reconciler::new(temp_dir.path(), ExtensionFilter::default());
        let mut items: PathKeyedCollection = PathKeyedCollection::new();

        assert!(!reconciler.reconcile(&mut items).unwrap().is_noop());
        assert!(reconciler.reconcile(&mut items).unwrap().is_noop());
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_reconcile_missing_directory_fails() {
        let temp_dir = TempDir::new().unwrap();
        let reconciler = Reconciler::new(temp_dir.path().join("gone"), ExtensionFilter::default());
        let mut items: PathKeyedCollection = PathKeyedCollection::new();

        assert!(reconciler.reconcile(&mut items).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_file_follows_config() {
        let temp_dir = TempDir::new().unwrap();
        let real = temp_dir.path().join("real.jpg");
        let link = temp_dir.path().join("link.jpg");
        File::create(&real).unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let strict = Reconciler::new(temp_dir.path(), ExtensionFilter::default());
        let mut items: PathKeyedCollection = PathKeyedCollection::new();
        assert!(!strict.accepts(&link));
        assert!(strict.accepts(&real));
        let report = strict.reconcile(&mut items).unwrap();
        assert_eq!(report.enumerated, 1);
        assert_eq!(names(&items), vec!["real.jpg"]);

        let following =
            Reconciler::new(temp_dir.path(), ExtensionFilter::default()).follow_symlinks(true);
        assert!(following.accepts(&link));
        let report = following.reconcile(&mut items).unwrap();
        assert_eq!(report.enumerated, 2);
        assert_eq!(report.added, 1);
        assert!(items.contains(&link));
        assert!(following.reconcile(&mut items).unwrap().is_noop());
    }

    #[test]
    fn test_accepts_applies_filter_and_file_type() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join("album.png")).unwrap();
        let reconciler = Reconciler::new(temp_dir.path(), ExtensionFilter::default());

        assert!(!reconciler.accepts(&temp_dir.path().join("album.png")));
        assert!(!reconciler.accepts(&temp_dir.path().join("notes.txt")));
        // Already gone: left to the deletion or the next pass.
        assert!(reconciler.accepts(&temp_dir.path().join("gone.jpg")));
    }
}
