//! Ordered collection of tracked items with a path index.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::Result;
use crate::item::TrackedItem;

/// A mutation applied to a [`PathKeyedCollection`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum CollectionChange {
    /// An item was appended at `index`.
    Added { index: usize, path: PathBuf },

    /// The item at `index` was removed.
    Removed { index: usize, path: PathBuf },

    /// The item at `index` changed its path in place.
    Renamed {
        index: usize,
        from: PathBuf,
        to: PathBuf,
    },

    /// Every item was removed.
    Cleared,
}

impl CollectionChange {
    /// Render the change as a single JSON line.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

type Observer = Box<dyn FnMut(&CollectionChange) + Send>;

/// An ordered sequence of [`TrackedItem`]s, unique by path.
///
/// Items keep insertion order. A hash index from path to position is updated
/// on every mutation so lookups do not scan the sequence.
pub struct PathKeyedCollection<S = ()> {
    items: Vec<TrackedItem<S>>,
    index: HashMap<PathBuf, usize>,
    observer: Option<Observer>,
}

impl<S> PathKeyedCollection<S> {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
            observer: None,
        }
    }

    /// Create a collection from existing items, dropping later duplicates.
    pub fn from_items(items: impl IntoIterator<Item = TrackedItem<S>>) -> Self {
        let mut collection = Self::new();
        for item in items {
            collection.append(item);
        }
        collection
    }

    /// Install a callback that sees every mutation after it is applied.
    pub fn set_observer(&mut self, observer: impl FnMut(&CollectionChange) + Send + 'static) {
        self.observer = Some(Box::new(observer));
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether an item with this path exists.
    pub fn contains(&self, path: &Path) -> bool {
        self.index.contains_key(path)
    }

    /// Position of the item with this path.
    pub fn position(&self, path: &Path) -> Option<usize> {
        self.index.get(path).copied()
    }

    /// Item with this path.
    pub fn get(&self, path: &Path) -> Option<&TrackedItem<S>> {
        self.position(path).map(|i| &self.items[i])
    }

    /// Settings of the item with this path.
    pub fn settings_mut(&mut self, path: &Path) -> Option<&mut S> {
        let i = self.position(path)?;
        Some(&mut self.items[i].settings)
    }

    /// Item at `index`.
    pub fn get_index(&self, index: usize) -> Option<&TrackedItem<S>> {
        self.items.get(index)
    }

    /// Iterate items in order.
    pub fn iter(&self) -> std::slice::Iter<'_, TrackedItem<S>> {
        self.items.iter()
    }

    /// Paths of all items, in order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.items.iter().map(|item| item.path().to_path_buf()).collect()
    }

    /// Append an item to the end.
    ///
    /// Returns `false` and leaves the collection untouched if an item with
    /// the same path is already present.
    pub fn append(&mut self, item: TrackedItem<S>) -> bool {
        if self.index.contains_key(item.path()) {
            return false;
        }

        let index = self.items.len();
        let path = item.path().to_path_buf();
        self.index.insert(path.clone(), index);
        self.items.push(item);
        self.notify(CollectionChange::Added { index, path });
        true
    }

    /// Remove the item with this path.
    pub fn remove(&mut self, path: &Path) -> Option<TrackedItem<S>> {
        let index = self.position(path)?;
        self.remove_at(index)
    }

    /// Remove the item at `index`.
    pub fn remove_at(&mut self, index: usize) -> Option<TrackedItem<S>> {
        if index >= self.items.len() {
            return None;
        }

        let item = self.items.remove(index);
        self.index.remove(item.path());
        for (offset, shifted) in self.items[index..].iter().enumerate() {
            self.index.insert(shifted.path().to_path_buf(), index + offset);
        }

        self.notify(CollectionChange::Removed {
            index,
            path: item.path().to_path_buf(),
        });
        Some(item)
    }

    /// Change the path of an item in place, keeping its position and settings.
    ///
    /// Returns `false` if `from` is not present or `to` is already taken.
    pub fn rename(&mut self, from: &Path, to: PathBuf) -> bool {
        if from == to || self.index.contains_key(&to) {
            return false;
        }
        let Some(index) = self.index.remove(from) else {
            return false;
        };

        self.items[index].set_path(to.clone());
        self.index.insert(to.clone(), index);
        self.notify(CollectionChange::Renamed {
            index,
            from: from.to_path_buf(),
            to,
        });
        true
    }

    /// Keep only the items for which `keep` returns true.
    ///
    /// One pass over the items. Observers see one `Removed` per dropped item,
    /// with indices as if the items had been removed front to back.
    pub fn retain(&mut self, mut keep: impl FnMut(&TrackedItem<S>) -> bool) -> usize {
        let mut removed = Vec::new();
        let mut position = 0;
        self.items.retain(|item| {
            let kept = keep(item);
            if !kept {
                let index = position - removed.len();
                removed.push(CollectionChange::Removed {
                    index,
                    path: item.path().to_path_buf(),
                });
            }
            position += 1;
            kept
        });

        if removed.is_empty() {
            return 0;
        }

        self.index.clear();
        for (index, item) in self.items.iter().enumerate() {
            self.index.insert(item.path().to_path_buf(), index);
        }
        let count = removed.len();
        for change in removed {
            self.notify(change);
        }
        count
    }

    /// Remove every item.
    pub fn clear(&mut self) {
        self.items.clear();
        self.index.clear();
        self.notify(CollectionChange::Cleared);
    }

    fn notify(&mut self, change: CollectionChange) {
        if let Some(observer) = self.observer.as_mut() {
            observer(&change);
        }
    }
}

impl<S> Default for PathKeyedCollection<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: fmt::Debug> fmt::Debug for PathKeyedCollection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathKeyedCollection")
            .field("items", &self.items)
            .field("observed", &self.observer.is_some())
            .finish()
    }
}

impl<'a, S> IntoIterator for &'a PathKeyedCollection<S> {
    type Item = &'a TrackedItem<S>;
    type IntoIter = std::slice::Iter<'a, TrackedItem<S>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
