//! Serialized execution of collection mutations.
//!
//! Watch callbacks run on background threads and must never touch the
//! collection. They submit [`Action`]s to a [`SerializedExecutor`] instead,
//! and the owner of the collection runs those actions one at a time.
//! [`Dispatcher`] is the owner-side implementation: it holds the collection
//! outright and drains a pair of unbounded queues, so submitting never blocks.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::collection::PathKeyedCollection;
use crate::error::{Result, SyncError};

/// A deferred mutation of the collection.
pub type Action<S> = Box<dyn FnOnce(&mut PathKeyedCollection<S>) -> Result<()> + Send + 'static>;

/// Scheduling priority of an action.
///
/// Normal actions run before queued background actions. Within a priority,
/// actions from one producer run in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Priority {
    /// Work requested directly by the owning application.
    Normal,

    /// Work derived from change notifications.
    #[default]
    Background,
}

/// A FIFO, single-consumer execution context for collection mutations.
pub trait SerializedExecutor<S>: Send + Sync {
    /// Queue `action` to run on the owner context.
    fn schedule(&self, priority: Priority, action: Action<S>) -> Result<()>;
}

/// Receives errors raised by deferred work, which has no caller to return to.
#[derive(Clone)]
pub struct ErrorReporter {
    sink: Arc<dyn Fn(SyncError) + Send + Sync>,
}

impl ErrorReporter {
    /// Report through a callback.
    pub fn new(sink: impl Fn(SyncError) + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    /// Report by logging at error level.
    pub fn log() -> Self {
        Self::new(|err| error!("Deferred synchronizer error: {err}"))
    }

    /// Report into a channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SyncError>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let reporter = Self::new(move |err| {
            if let Err(mpsc::error::SendError(err)) = tx.send(err) {
                error!("Error channel closed, dropping: {err}");
            }
        });
        (reporter, rx)
    }

    /// Deliver an error.
    pub fn report(&self, err: SyncError) {
        (self.sink)(err);
    }
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::log()
    }
}

impl fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorReporter").finish_non_exhaustive()
    }
}

/// Cloneable submission side of a [`Dispatcher`].
pub struct DispatcherHandle<S> {
    normal: mpsc::UnboundedSender<Action<S>>,
    background: mpsc::UnboundedSender<Action<S>>,
}

impl<S> Clone for DispatcherHandle<S> {
    fn clone(&self) -> Self {
        Self {
            normal: self.normal.clone(),
            background: self.background.clone(),
        }
    }
}

impl<S> fmt::Debug for DispatcherHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherHandle")
            .field("closed", &self.normal.is_closed())
            .finish()
    }
}

impl<S: Send + 'static> SerializedExecutor<S> for DispatcherHandle<S> {
    fn schedule(&self, priority: Priority, action: Action<S>) -> Result<()> {
        let queue = match priority {
            Priority::Normal => &self.normal,
            Priority::Background => &self.background,
        };
        queue.send(action).map_err(|_| SyncError::ExecutorClosed)
    }
}

/// Owner context for a [`PathKeyedCollection`].
///
/// The dispatcher owns the collection; readers borrow it through
/// [`Dispatcher::collection`] on the same task that drives the dispatcher,
/// so reads and scheduled mutations never overlap.
pub struct Dispatcher<S = ()> {
    collection: PathKeyedCollection<S>,
    normal_rx: mpsc::UnboundedReceiver<Action<S>>,
    background_rx: mpsc::UnboundedReceiver<Action<S>>,
    handle: DispatcherHandle<S>,
    reporter: ErrorReporter,
    executed: u64,
}

impl<S: Send + 'static> Dispatcher<S> {
    /// Create a dispatcher owning `collection`.
    pub fn new(collection: PathKeyedCollection<S>) -> Self {
        let (normal, normal_rx) = mpsc::unbounded_channel();
        let (background, background_rx) = mpsc::unbounded_channel();

        Self {
            collection,
            normal_rx,
            background_rx,
            handle: DispatcherHandle { normal, background },
            reporter: ErrorReporter::default(),
            executed: 0,
        }
    }

    /// Route action failures to `reporter`.
    pub fn with_error_reporter(mut self, reporter: ErrorReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// A handle for submitting actions.
    pub fn handle(&self) -> DispatcherHandle<S> {
        self.handle.clone()
    }

    /// The error reporter used for failed actions.
    pub fn error_reporter(&self) -> &ErrorReporter {
        &self.reporter
    }

    /// The owned collection.
    pub fn collection(&self) -> &PathKeyedCollection<S> {
        &self.collection
    }

    /// The owned collection, for direct work on the owner context.
    pub fn collection_mut(&mut self) -> &mut PathKeyedCollection<S> {
        &mut self.collection
    }

    /// Consume the dispatcher and return the collection.
    ///
    /// Actions still queued are dropped without running.
    pub fn into_collection(self) -> PathKeyedCollection<S> {
        self.collection
    }

    /// Total number of actions run so far.
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Run every queued action without waiting for new ones.
    ///
    /// Returns the number of actions run.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Some(action) = self.try_next() {
            self.execute(action);
            ran += 1;
        }
        ran
    }

    /// Wait for the next action and run it.
    pub async fn next_action(&mut self) {
        let action = tokio::select! {
            biased;
            Some(action) = self.normal_rx.recv() => action,
            Some(action) = self.background_rx.recv() => action,
        };
        self.execute(action);
    }

    /// Run actions as they arrive until `shutdown` completes.
    ///
    /// Returns the number of actions run.
    pub async fn run<F>(&mut self, shutdown: F) -> u64
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let start = self.executed;

        loop {
            let action = tokio::select! {
                biased;
                () = &mut shutdown => None,
                Some(action) = self.normal_rx.recv() => Some(action),
                Some(action) = self.background_rx.recv() => Some(action),
            };

            match action {
                Some(action) => self.execute(action),
                None => break,
            }
        }

        debug!("Dispatcher stopped after {} actions", self.executed - start);
        self.executed - start
    }

    fn try_next(&mut self) -> Option<Action<S>> {
        self.normal_rx
            .try_recv()
            .or_else(|_| self.background_rx.try_recv())
            .ok()
    }

    fn execute(&mut self, action: Action<S>) {
        self.executed += 1;
        let collection = &mut self.collection;

        match panic::catch_unwind(AssertUnwindSafe(move || action(collection))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => self.reporter.report(err),
            Err(payload) => self
                .reporter
                .report(SyncError::ActionPanicked(panic_message(payload.as_ref()))),
        }
    }
}

impl<S> fmt::Debug for Dispatcher<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("items", &self.collection.len())
            .field("executed", &self.executed)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::TrackedItem;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use std::time::Duration;

    fn append(path: &'static str) -> Action<()> {
        Box::new(move |items| {
            items.append(TrackedItem::new(path));
            Ok(())
        })
    }

    #[test]
    fn test_runs_in_submission_order() {
        let mut dispatcher = Dispatcher::new(PathKeyedCollection::new());
        let handle = dispatcher.handle();

        for path in ["/w/1.jpg", "/w/2.jpg", "/w/3.jpg"] {
            handle.schedule(Priority::Background, append(path)).unwrap();
        }

        assert_eq!(dispatcher.collection().len(), 0);
        assert_eq!(dispatcher.run_pending(), 3);
        assert_eq!(
            dispatcher.collection().paths(),
            vec![
                PathBuf::from("/w/1.jpg"),
                PathBuf::from("/w/2.jpg"),
                PathBuf::from("/w/3.jpg"),
            ]
        );
        assert_eq!(dispatcher.run_pending(), 0);
    }

    #[test]
    fn test_normal_priority_runs_first() {
        let mut dispatcher = Dispatcher::new(PathKeyedCollection::new());
        let handle = dispatcher.handle();

        handle.schedule(Priority::Background, append("/w/bg.jpg")).unwrap();
        handle.schedule(Priority::Normal, append("/w/normal.jpg")).unwrap();
        dispatcher.run_pending();

        assert_eq!(
            dispatcher.collection().paths(),
            vec![PathBuf::from("/w/normal.jpg"), PathBuf::from("/w/bg.jpg")]
        );
    }

    #[test]
    fn test_failures_are_reported_and_execution_continues() {
        let (reporter, mut errors) = ErrorReporter::channel();
        let mut dispatcher: Dispatcher =
            Dispatcher::new(PathKeyedCollection::new()).with_error_reporter(reporter);
        let handle = dispatcher.handle();

        handle
            .schedule(
                Priority::Background,
                Box::new(|_| Err(SyncError::Config("boom".to_string()))),
            )
            .unwrap();
        handle
            .schedule(Priority::Background, Box::new(|_| panic!("action blew up")))
            .unwrap();
        handle.schedule(Priority::Background, append("/w/after.jpg")).unwrap();

        assert_eq!(dispatcher.run_pending(), 3);
        assert!(dispatcher.collection().contains(std::path::Path::new("/w/after.jpg")));
        assert!(matches!(errors.try_recv(), Ok(SyncError::Config(_))));
        match errors.try_recv() {
            Ok(SyncError::ActionPanicked(message)) => assert_eq!(message, "action blew up"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_schedule_after_drop_fails() {
        let dispatcher: Dispatcher = Dispatcher::new(PathKeyedCollection::new());
        let handle = dispatcher.handle();
        drop(dispatcher);

        let result = handle.schedule(Priority::Normal, append("/w/late.jpg"));
        assert!(matches!(result, Err(SyncError::ExecutorClosed)));
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let mut dispatcher = Dispatcher::new(PathKeyedCollection::new());
        let handle = dispatcher.handle();

        let producer = std::thread::spawn(move || {
            for path in ["/w/a.jpg", "/w/b.jpg"] {
                handle.schedule(Priority::Background, append(path)).unwrap();
            }
        });
        producer.join().unwrap();

        dispatcher.next_action().await;
        assert_eq!(dispatcher.collection().len(), 1);

        let ran = dispatcher
            .run(tokio::time::sleep(Duration::from_millis(50)))
            .await;
        assert_eq!(ran, 1);
        assert_eq!(dispatcher.executed(), 2);
        assert_eq!(dispatcher.collection().len(), 2);
    }
}
