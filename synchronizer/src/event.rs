//! Filesystem events as seen by the synchronizer.

use std::path::{Path, PathBuf};

use notify::EventKind;
use notify::event::{ModifyKind, RenameMode};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// A change notification for one path in the watched directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FsEvent {
    /// A file appeared.
    Created { path: PathBuf },

    /// A file's contents or size changed.
    Changed { path: PathBuf },

    /// A file disappeared.
    Deleted { path: PathBuf },

    /// A file moved from one name to another.
    Renamed { from: PathBuf, to: PathBuf },
}

impl FsEvent {
    /// The path this event leaves behind (the new path for renames).
    pub fn path(&self) -> &Path {
        match self {
            Self::Created { path } | Self::Changed { path } | Self::Deleted { path } => path,
            Self::Renamed { to, .. } => to,
        }
    }
}

/// Rename source waiting for its destination.
#[derive(Debug)]
struct PendingRename {
    from: PathBuf,
    tracker: Option<usize>,
}

/// Turns raw `notify` events into [`FsEvent`]s.
///
/// Backends report renames differently: inotify sends a `From` half, a `To`
/// half and then a combined `Both` event, other backends only the halves. A
/// `From` is held until the next event. A matching `To` completes it as a
/// rename; anything else flushes it as a deletion. A move out of the
/// directory produces no further event, so the owner calls
/// [`flush`](Self::flush) once [`has_pending`](Self::has_pending) has held
/// for a while. The translator is owned by one thread and is not shared.
#[derive(Debug, Default)]
pub struct EventTranslator {
    pending: Option<PendingRename>,
}

impl EventTranslator {
    /// Create a translator with no pending rename.
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate one `notify` event.
    pub fn translate(&mut self, event: notify::Event) -> Vec<FsEvent> {
        let tracker = event.attrs.tracker();
        let mut paths = event.paths;
        let mut out = Vec::new();

        match event.kind {
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                self.flush_into(&mut out);
                if let Some(from) = paths.pop() {
                    self.pending = Some(PendingRename { from, tracker });
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                let Some(to) = paths.pop() else {
                    return out;
                };
                match self.pending.take() {
                    Some(pending) if trackers_match(pending.tracker, tracker) => {
                        out.push(FsEvent::Renamed {
                            from: pending.from,
                            to,
                        });
                    }
                    unmatched => {
                        self.pending = unmatched;
                        self.flush_into(&mut out);
                        out.push(FsEvent::Created { path: to });
                    }
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                self.flush_into(&mut out);
                if paths.len() >= 2 {
                    let to = paths.swap_remove(1);
                    let from = paths.swap_remove(0);
                    out.push(FsEvent::Renamed { from, to });
                }
            }
            EventKind::Modify(ModifyKind::Name(_)) => {
                self.flush_into(&mut out);
                for path in paths {
                    if path.exists() {
                        out.push(FsEvent::Created { path });
                    } else {
                        out.push(FsEvent::Deleted { path });
                    }
                }
            }
            EventKind::Create(_) => {
                self.flush_into(&mut out);
                out.extend(paths.into_iter().map(|path| FsEvent::Created { path }));
            }
            EventKind::Modify(_) => {
                self.flush_into(&mut out);
                out.extend(paths.into_iter().map(|path| FsEvent::Changed { path }));
            }
            EventKind::Remove(_) => {
                self.flush_into(&mut out);
                out.extend(paths.into_iter().map(|path| FsEvent::Deleted { path }));
            }
            kind @ (EventKind::Access(_) | EventKind::Any | EventKind::Other) => {
                trace!("Ignoring event {kind:?} for {paths:?}");
            }
        }

        out
    }

    /// Whether a rename source is waiting for its destination.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Flush a held rename source as a deletion.
    pub fn flush(&mut self) -> Option<FsEvent> {
        self.pending
            .take()
            .map(|pending| FsEvent::Deleted { path: pending.from })
    }

    fn flush_into(&mut self, out: &mut Vec<FsEvent>) {
        out.extend(self.flush());
    }
}

fn trackers_match(from: Option<usize>, to: Option<usize>) -> bool {
    match (from, to) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}
