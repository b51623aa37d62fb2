//! # Directory Synchronizer
//!
//! This crate keeps an ordered, path-keyed collection of tracked items in
//! step with the files of one watched directory.
//!
//! ## Features
//!
//! - **Full Reconciliation**: Enumerate the directory and diff it against the collection
//! - **Incremental Updates**: Translate watch notifications into collection mutations
//! - **Serialized Mutation**: Every change runs on the collection's owner, one at a time
//! - **Extension Filtering**: Only files on an allow-list are tracked
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Directory Synchronizer                       │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  notify ──► EventTranslator ──► FsEvent ──► SerializedExecutor  │
//! │                                   │                │            │
//! │                                   ▼                ▼            │
//! │                           ExtensionFilter    Dispatcher         │
//! │                                                    │            │
//! │  Reconciler (resynchronize) ───────────► PathKeyedCollection    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dirsync_synchronizer::{DirectorySynchronizer, Dispatcher, PathKeyedCollection, SyncConfig};
//!
//! let mut dispatcher: Dispatcher = Dispatcher::new(PathKeyedCollection::new());
//! let handle = dispatcher.handle();
//! let sync = DirectorySynchronizer::new(
//!     SyncConfig::new("/home/user/Pictures/Wallpapers"),
//!     dispatcher.collection_mut(),
//!     handle,
//! )?;
//!
//! dispatcher.run(tokio::signal::ctrl_c().map(|_| ())).await;
//! ```

pub mod collection;
pub mod config;
pub mod error;
pub mod event;
pub mod executor;
pub mod filter;
pub mod item;
pub mod reconcile;
pub mod synchronizer;

pub use collection::{CollectionChange, PathKeyedCollection};
pub use config::{SyncConfig, WatchBackend};
pub use error::{Result, SyncError};
pub use event::{EventTranslator, FsEvent};
pub use executor::{Action, Dispatcher, DispatcherHandle, ErrorReporter, Priority, SerializedExecutor};
pub use filter::{DEFAULT_EXTENSIONS, ExtensionFilter};
pub use item::TrackedItem;
pub use reconcile::{ResyncReport, add_if_not_exist};
pub use synchronizer::{DirectorySynchronizer, SynchronizerBuilder};
