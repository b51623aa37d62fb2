//! Directory synchronizer: watches one directory and keeps a collection in
//! step with it.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use notify::{PollWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, trace, warn};

use crate::collection::PathKeyedCollection;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::event::{EventTranslator, FsEvent};
use crate::executor::{Action, ErrorReporter, Priority, SerializedExecutor};
use crate::filter::ExtensionFilter;
use crate::reconcile::{Reconciler, ResyncReport, add_if_not_exist, remove_path, rename_or_add};

/// How long a rename source waits for its destination before it counts as
/// a deletion.
const RENAME_WINDOW: Duration = Duration::from_millis(500);

/// Classifies notifications and turns them into scheduled actions.
///
/// Runs on the event thread. It never touches the collection.
struct EventHandler<S> {
    reconciler: Arc<Reconciler>,
    executor: Arc<dyn SerializedExecutor<S>>,
    reporter: ErrorReporter,
    stopped: AtomicBool,
}

impl<S: Default + Send + 'static> EventHandler<S> {
    fn handle(&self, event: FsEvent) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            trace!("Dropping event after stop: {event:?}");
            return false;
        }

        let action: Action<S> = match event {
            FsEvent::Created { path } | FsEvent::Changed { path } => {
                if !self.reconciler.accepts(&path) {
                    trace!("Ignoring untracked entry {}", path.display());
                    return false;
                }
                Box::new(move |collection| {
                    add_if_not_exist(collection, path);
                    Ok(())
                })
            }
            FsEvent::Deleted { path } => Box::new(move |collection| {
                remove_path(collection, &path);
                Ok(())
            }),
            FsEvent::Renamed { from, to } => {
                if from == to {
                    return false;
                }
                Box::new(move |collection| {
                    rename_or_add(collection, &from, to);
                    Ok(())
                })
            }
        };

        match self.executor.schedule(Priority::Background, action) {
            Ok(()) => true,
            Err(err) => {
                self.reporter.report(err);
                false
            }
        }
    }
}

/// Message from the watch backend to the event thread.
enum WatchMessage {
    Event(notify::Result<notify::Event>),
    Shutdown,
}

/// Translates backend events on a dedicated thread.
///
/// A rename source with no destination is flushed as a deletion once
/// `rename_window` passes without another event.
fn forward_events<S: Default + Send + 'static>(
    messages: Receiver<WatchMessage>,
    handler: Arc<EventHandler<S>>,
    rename_window: Duration,
) {
    let mut translator = EventTranslator::new();

    loop {
        let message = if translator.has_pending() {
            match messages.recv_timeout(rename_window) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(event) = translator.flush() {
                        debug!("Rename source without destination: {event:?}");
                        handler.handle(event);
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        } else {
            match messages.recv() {
                Ok(message) => message,
                Err(_) => break,
            }
        };

        match message {
            WatchMessage::Event(Ok(event)) => {
                for fs_event in translator.translate(event) {
                    handler.handle(fs_event);
                }
            }
            WatchMessage::Event(Err(err)) => handler.reporter.report(err.into()),
            WatchMessage::Shutdown => break,
        }
    }
}

/// The event thread and the channel that feeds it.
struct EventThread {
    sender: Sender<WatchMessage>,
    thread: JoinHandle<()>,
}

impl EventThread {
    fn spawn<S: Default + Send + 'static>(handler: Arc<EventHandler<S>>) -> Result<Self> {
        let (sender, messages) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("dirsync-events".to_string())
            .spawn(move || forward_events(messages, handler, RENAME_WINDOW))?;
        Ok(Self { sender, thread })
    }

    fn shutdown(self) {
        if self.sender.send(WatchMessage::Shutdown).is_err() {
            trace!("Event thread already exited");
        }
        if self.thread.join().is_err() {
            warn!("Event thread panicked");
        }
    }
}

/// Builder for a [`DirectorySynchronizer`].
#[derive(Debug)]
pub struct SynchronizerBuilder {
    config: SyncConfig,
    reporter: ErrorReporter,
}

impl SynchronizerBuilder {
    /// Start from a configuration.
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            reporter: ErrorReporter::default(),
        }
    }

    /// Where watch-side errors (backend failures, a closed executor) go.
    pub fn error_reporter(mut self, reporter: ErrorReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Validate the directory, start watching it and reconcile `collection`.
    ///
    /// `collection` must be the collection the executor's actions operate
    /// on, borrowed from the owner context.
    pub fn start<S, E>(
        self,
        collection: &mut PathKeyedCollection<S>,
        executor: E,
    ) -> Result<DirectorySynchronizer<S>>
    where
        S: Default + Send + 'static,
        E: SerializedExecutor<S> + 'static,
    {
        let Self { config, reporter } = self;

        if !config.directory.exists() {
            return Err(SyncError::DirectoryNotFound(config.directory));
        }
        if !config.directory.is_dir() {
            return Err(SyncError::NotADirectory(config.directory));
        }
        let directory = dunce::canonicalize(&config.directory)?;

        let reconciler = Arc::new(
            Reconciler::new(directory.clone(), config.extensions.clone())
                .follow_symlinks(config.follow_symlinks),
        );
        let handler = Arc::new(EventHandler {
            reconciler: Arc::clone(&reconciler),
            executor: Arc::new(executor),
            reporter,
            stopped: AtomicBool::new(false),
        });

        let events = EventThread::spawn(Arc::clone(&handler))?;
        let sender = events.sender.clone();
        let callback = move |res: notify::Result<notify::Event>| {
            if sender.send(WatchMessage::Event(res)).is_err() {
                trace!("Event thread gone, dropping notification");
            }
        };

        let mut synchronizer = DirectorySynchronizer {
            reconciler,
            handler,
            watcher: None,
            events: Some(events),
        };

        let mut watcher: Box<dyn Watcher + Send> = match config.backend.poll_interval() {
            None => Box::new(notify::recommended_watcher(callback)?),
            Some(interval) => Box::new(PollWatcher::new(
                callback,
                notify::Config::default().with_poll_interval(interval),
            )?),
        };
        watcher.watch(&directory, RecursiveMode::NonRecursive)?;
        synchronizer.watcher = Some(watcher);
        info!("Watching {} ({:?})", directory.display(), config.backend);

        synchronizer.resynchronize(collection)?;

        Ok(synchronizer)
    }
}

/// Keeps a [`PathKeyedCollection`] consistent with one directory.
///
/// Construction validates the directory, starts a non-recursive watch and
/// runs one reconciliation pass against the collection before returning.
/// Notifications are then translated into actions on the
/// [`SerializedExecutor`]; the collection itself is only touched by the
/// executor's owner and by [`resynchronize`](Self::resynchronize), which the
/// owner calls directly.
///
/// A direct `resynchronize` is not ordered with actions already queued. When
/// notifications may be in flight, use
/// [`schedule_resynchronize`](Self::schedule_resynchronize) instead.
pub struct DirectorySynchronizer<S> {
    reconciler: Arc<Reconciler>,
    handler: Arc<EventHandler<S>>,
    watcher: Option<Box<dyn Watcher + Send>>,
    events: Option<EventThread>,
}

impl<S: Default + Send + 'static> DirectorySynchronizer<S> {
    /// Start synchronizing `config.directory` into `collection`.
    pub fn new<E>(
        config: SyncConfig,
        collection: &mut PathKeyedCollection<S>,
        executor: E,
    ) -> Result<Self>
    where
        E: SerializedExecutor<S> + 'static,
    {
        SynchronizerBuilder::new(config).start(collection, executor)
    }

    /// Run a full reconciliation pass synchronously on the calling thread.
    pub fn resynchronize(&self, collection: &mut PathKeyedCollection<S>) -> Result<ResyncReport> {
        self.reconciler.reconcile(collection)
    }

    /// Queue a full reconciliation pass on the executor, ordered with the
    /// incremental actions already submitted.
    pub fn schedule_resynchronize(&self) -> Result<()> {
        if !self.is_running() {
            return Err(SyncError::Stopped);
        }

        let reconciler = Arc::clone(&self.reconciler);
        self.handler.executor.schedule(
            Priority::Background,
            Box::new(move |collection| reconciler.reconcile(collection).map(|_| ())),
        )
    }

    /// Classify one notification and schedule its action.
    ///
    /// This is what the watch callback calls; it is public so applications
    /// can feed notifications from other sources. Returns whether an action
    /// was scheduled.
    pub fn handle_event(&self, event: FsEvent) -> bool {
        self.handler.handle(event)
    }

    /// The watched directory, canonicalized.
    pub fn directory(&self) -> &Path {
        self.reconciler.directory()
    }

    /// The extension filter in use.
    pub fn filter(&self) -> &ExtensionFilter {
        self.reconciler.filter()
    }
}

impl<S> DirectorySynchronizer<S> {
    /// Whether the watch is still active.
    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }

    /// Stop watching and release the watch handle.
    ///
    /// Safe to call more than once. Actions already queued on the executor
    /// may still run; nothing new is scheduled afterwards.
    pub fn stop(&mut self) {
        self.handler.stopped.store(true, Ordering::Release);

        if let Some(mut watcher) = self.watcher.take() {
            let directory = self.reconciler.directory();
            if let Err(err) = watcher.unwatch(directory) {
                debug!("Unwatch of {} failed: {err}", directory.display());
            }
            info!("Stopped watching {}", directory.display());
        }
        if let Some(events) = self.events.take() {
            events.shutdown();
        }
    }
}

impl<S> Drop for DirectorySynchronizer<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<S> fmt::Debug for DirectorySynchronizer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectorySynchronizer")
            .field("directory", &self.reconciler.directory())
            .field("running", &self.watcher.is_some())
            .finish()
    }
}
