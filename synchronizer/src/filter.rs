//! Extension allow-list used to decide which files are tracked.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Extensions tracked when no explicit list is configured.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "jpe", "jfif", "exif", "gif", "png", "tif", "tiff", "bmp", "dib",
];

/// Classifies file names against an allow-list of extensions.
///
/// The extension is everything after the *first* `.` in the name, so
/// `photo.v2.jpg` has the extension `v2.jpg` and is not tracked with the
/// default list. Matching is ASCII case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct ExtensionFilter {
    extensions: Vec<String>,
}

impl ExtensionFilter {
    /// Create a filter from a list of extensions.
    ///
    /// Entries are lower-cased and a leading `.` is stripped; empty entries
    /// are dropped.
    pub fn new<I, T>(extensions: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for ext in extensions {
            let ext = ext.as_ref().trim();
            let ext = ext.strip_prefix('.').unwrap_or(ext).to_ascii_lowercase();
            if !ext.is_empty() && !normalized.contains(&ext) {
                normalized.push(ext);
            }
        }

        Self {
            extensions: normalized,
        }
    }

    /// The normalized allow-list.
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Check whether a bare file name is trackable.
    pub fn is_trackable(&self, file_name: &str) -> bool {
        let Some((_, suffix)) = file_name.split_once('.') else {
            return false;
        };

        self.extensions
            .iter()
            .any(|ext| ext.eq_ignore_ascii_case(suffix))
    }

    /// Check whether the file-name component of `path` is trackable.
    pub fn is_trackable_path(&self, path: &Path) -> bool {
        path.file_name()
            .is_some_and(|name| self.is_trackable(&name.to_string_lossy()))
    }
}

impl From<Vec<String>> for ExtensionFilter {
    fn from(extensions: Vec<String>) -> Self {
        Self::new(extensions)
    }
}

impl From<ExtensionFilter> for Vec<String> {
    fn from(filter: ExtensionFilter) -> Self {
        filter.extensions
    }
}

impl Default for ExtensionFilter {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSIONS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_extensions_are_trackable() {
        let filter = ExtensionFilter::default();

        for name in ["a.jpg", "b.JPEG", "c.Png", "d.tiff", "e.dib", "f.jfif"] {
            assert!(filter.is_trackable(name), "{name} should be trackable");
        }
    }

    #[test]
    fn test_rejects_other_extensions() {
        let filter = ExtensionFilter::default();

        assert!(!filter.is_trackable("notes.txt"));
        assert!(!filter.is_trackable("archive.jpg.zip"));
        assert!(!filter.is_trackable("README"));
        assert!(!filter.is_trackable(""));
        assert!(!filter.is_trackable("trailing."));
    }

    #[test]
    fn test_uses_text_after_first_dot() {
        let filter = ExtensionFilter::default();

        // The suffix after the first dot is `v2.jpg`, which is not listed.
        assert!(!filter.is_trackable("photo.v2.jpg"));
        assert!(filter.is_trackable(".jpg"));
    }

    #[test]
    fn test_custom_list_is_normalized() {
        let filter = ExtensionFilter::new([".WebP", "avif", "", "webp"]);

        assert_eq!(filter.extensions(), ["webp".to_string(), "avif".to_string()]);
        assert!(filter.is_trackable("wall.WEBP"));
        assert!(!filter.is_trackable("wall.jpg"));
    }

    #[test]
    fn test_path_uses_file_name_component() {
        let filter = ExtensionFilter::default();

        assert!(filter.is_trackable_path(Path::new("/some.dir/wall.png")));
        assert!(!filter.is_trackable_path(Path::new("/pictures.png/readme")));
        assert!(!filter.is_trackable_path(Path::new("/")));
    }
}
