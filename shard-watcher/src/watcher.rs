//! Shard watcher lifecycle: cold scan, live updates and shutdown.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::WatcherConfig;
use crate::debounce::{EventDebouncer, PendingSignals};
use crate::differ::SnapshotDiffer;
use crate::error::Result;
use crate::loader::ShardLoader;

/// Lifecycle of a [`ShardWatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// Cold scan in progress. Never observed on a constructed watcher.
    Initializing,

    /// Background tasks are scanning on every change.
    Running,

    /// Stop was requested; a scan may still be finishing.
    StopRequested,

    /// Both background tasks have exited and the subscription is closed.
    Stopped,
}

/// Keeps a [`ShardLoader`] in sync with the shards in a directory.
///
/// Construction loads every shard present, then two background tasks keep
/// watching: one turns filesystem notifications into a pending rescan, the
/// other runs one rescan at a time. Call [`ShardWatcher::stop`] to shut them
/// down; once it returns the loader receives no further calls.
#[derive(Debug)]
pub struct ShardWatcher {
    dir: PathBuf,
    stop_requested: AtomicBool,
    quit: CancellationToken,
    tasks: TaskTracker,
}

impl ShardWatcher {
    /// Watch `dir` for `*.zoekt` shards with default settings.
    pub async fn new(dir: impl Into<PathBuf>, loader: impl ShardLoader) -> Result<Self> {
        Self::with_config(WatcherConfig::new(dir), loader).await
    }

    /// Watch a directory as described by `config`.
    ///
    /// Loads every matching shard before returning. Fails if the directory
    /// cannot be listed, holds no shard, or cannot be subscribed to; nothing
    /// keeps running in that case.
    pub async fn with_config(config: WatcherConfig, loader: impl ShardLoader) -> Result<Self> {
        config.validate()?;
        debug!(
            "{:?} shard watcher for {}",
            WatcherState::Initializing,
            config.dir.display()
        );

        let loader: Arc<dyn ShardLoader> = Arc::new(loader);
        let mut differ = SnapshotDiffer::new(&config, loader);
        let report = differ.scan().await?;

        let (debouncer, pending) = EventDebouncer::subscribe(&config.dir)?;
        // Changes made between the cold scan and the subscription raised no
        // notification, so owe one rescan from the start.
        debouncer.request_rescan();

        let quit = CancellationToken::new();
        let tasks = TaskTracker::new();
        tasks.spawn(debouncer.run(quit.clone()));
        tasks.spawn(process_signals(differ, pending, quit.clone()));
        tasks.close();

        info!(
            "Watching {} ({} shard(s) loaded)",
            config.dir.display(),
            report.loaded
        );

        Ok(Self {
            dir: config.dir,
            stop_requested: AtomicBool::new(false),
            quit,
            tasks,
        })
    }

    /// The watched directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current lifecycle state. A constructed watcher is never `Initializing`.
    pub fn state(&self) -> WatcherState {
        if self.tasks.is_empty() {
            WatcherState::Stopped
        } else if self.quit.is_cancelled() {
            WatcherState::StopRequested
        } else {
            WatcherState::Running
        }
    }

    /// Stop watching and wait until all background work has ceased.
    ///
    /// Safe to call any number of times, concurrently. Every call returns only
    /// after the last load or unload has completed, the notify subscription
    /// is closed and both background tasks have exited.
    pub async fn stop(&self) {
        if !self.stop_requested.swap(true, Ordering::AcqRel) {
            info!("Stopping {self}");
            self.quit.cancel();
        }
        self.tasks.wait().await;
    }
}

impl fmt::Display for ShardWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shardWatcher({})", self.dir.display())
    }
}

impl Drop for ShardWatcher {
    fn drop(&mut self) {
        // Background tasks wind down on their own; nobody waits for them.
        self.quit.cancel();
    }
}

/// Run one scan per pending signal until the signal slot closes.
///
/// The slot closes only after the debouncer has dropped its subscription, so
/// this task outlives it. Signals arriving once stop is requested are drained
/// without scanning.
async fn process_signals(
    mut differ: SnapshotDiffer,
    mut pending: PendingSignals,
    quit: CancellationToken,
) {
    while pending.recv().await.is_some() {
        if quit.is_cancelled() {
            continue;
        }
        if let Err(e) = differ.scan().await {
            warn!("Rescan of {} failed: {e}", differ.dir().display());
        }
    }

    debug!(
        "{:?} shard watcher for {}",
        WatcherState::Stopped,
        differ.dir().display()
    );
}
