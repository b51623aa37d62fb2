//! `dirsync`: mirror a directory's trackable files into a collection and
//! report every change until interrupted.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use dirsync_synchronizer::{
    CollectionChange, Dispatcher, ErrorReporter, PathKeyedCollection, SyncConfig,
    SynchronizerBuilder, WatchBackend,
};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{info, warn};

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "dirsync", version, about = "Keep a tracked collection in step with a directory")]
pub struct Cli {
    /// Directory to watch. Overrides the directory from `--config`.
    pub directory: Option<PathBuf>,

    /// TOML configuration file.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Trackable extension; repeat to build the allow-list.
    #[arg(short = 'e', long = "extension", value_name = "EXT")]
    pub extensions: Vec<String>,

    /// Poll the directory at this interval instead of using native notifications.
    #[arg(long, value_name = "MS")]
    pub poll_interval_ms: Option<u64>,

    /// Follow symbolic links when reconciling.
    #[arg(long)]
    pub follow_symlinks: bool,

    /// Queue a full reconciliation pass at this interval.
    #[arg(long, value_name = "SECS")]
    pub resync_interval_secs: Option<u64>,

    /// Print collection changes as NDJSON on stdout.
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    /// Merge the config file (if any) with command-line overrides.
    pub fn to_config(&self) -> Result<SyncConfig> {
        let mut config = match (&self.config, &self.directory) {
            (Some(path), _) => SyncConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            (None, Some(directory)) => SyncConfig::new(directory),
            (None, None) => bail!("a directory or --config is required"),
        };

        if let Some(directory) = &self.directory {
            config.directory = directory.clone();
        }
        if !self.extensions.is_empty() {
            config = config.with_extensions(&self.extensions);
        }
        if let Some(interval_ms) = self.poll_interval_ms {
            if interval_ms == 0 {
                bail!("--poll-interval-ms must be greater than zero");
            }
            config = config.with_backend(WatchBackend::Poll { interval_ms });
        }
        if self.follow_symlinks {
            config = config.follow_symlinks();
        }

        Ok(config)
    }

    fn resync_interval(&self) -> Option<Interval> {
        let secs = self.resync_interval_secs.filter(|secs| *secs > 0)?;
        let mut interval = tokio::time::interval(Duration::from_secs(secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; construction already reconciled.
        interval.reset();
        Some(interval)
    }
}

/// Print or log one collection change.
fn report_change(change: &CollectionChange, json: bool) {
    if json {
        match change.to_json() {
            Ok(line) => println!("{line}"),
            Err(err) => warn!("Failed to encode {change:?}: {err}"),
        }
        return;
    }

    match change {
        CollectionChange::Added { index, path } => info!("+ [{index}] {}", path.display()),
        CollectionChange::Removed { index, path } => info!("- [{index}] {}", path.display()),
        CollectionChange::Renamed { index, from, to } => {
            info!("~ [{index}] {} -> {}", from.display(), to.display())
        }
        CollectionChange::Cleared => info!("collection cleared"),
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Synchronize until Ctrl-C, then print the final collection.
pub async fn run(cli: Cli) -> Result<()> {
    let config = cli.to_config()?;
    let json = cli.json;
    let directory = config.directory.clone();

    let mut collection: PathKeyedCollection = PathKeyedCollection::new();
    collection.set_observer(move |change| report_change(change, json));

    let mut dispatcher = Dispatcher::new(collection).with_error_reporter(ErrorReporter::log());
    let handle = dispatcher.handle();
    let mut sync = SynchronizerBuilder::new(config)
        .error_reporter(ErrorReporter::log())
        .start(dispatcher.collection_mut(), handle)
        .with_context(|| format!("failed to synchronize {}", directory.display()))?;

    info!(
        "Tracking {} items in {} (Ctrl-C to stop)",
        dispatcher.collection().len(),
        sync.directory().display()
    );

    let mut resync = cli.resync_interval();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            result = &mut shutdown => {
                result.context("failed to listen for Ctrl-C")?;
                break;
            }
            () = tick(&mut resync) => sync.schedule_resynchronize()?,
            () = dispatcher.next_action() => {}
        }
    }

    sync.stop();
    let pending = dispatcher.run_pending();
    info!("Stopped after {} actions ({pending} drained at shutdown)", dispatcher.executed());

    if !json {
        for item in dispatcher.collection() {
            println!("{}", item.path().display());
        }
    }

    Ok(())
}
