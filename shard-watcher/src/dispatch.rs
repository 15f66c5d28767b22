//! Shard loads and unloads on the blocking pool, with bounded fan-out for loads.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::differ::base_name;
use crate::loader::ShardLoader;

/// Runs [`ShardLoader::load`] for a batch of paths with a concurrency ceiling,
/// and [`ShardLoader::unload`] one path at a time.
///
/// Both run on tokio's blocking pool since they are expected to do file IO
/// and decoding. A call that panics is logged and still gives its slot back.
pub struct LoadDispatcher {
    loader: Arc<dyn ShardLoader>,
    limit: usize,
    progress_interval: Duration,
}

impl LoadDispatcher {
    /// Create a dispatcher allowing `limit` concurrent loads (at least one).
    pub fn new(loader: Arc<dyn ShardLoader>, limit: usize, progress_interval: Duration) -> Self {
        Self {
            loader,
            limit: limit.max(1),
            progress_interval,
        }
    }

    /// Maximum number of loads in flight at once.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Load every path and wait until all loads have returned.
    pub async fn dispatch(&self, paths: &[PathBuf]) {
        let slots = Arc::new(Semaphore::new(self.limit));
        let mut loads = JoinSet::new();
        let mut last_progress = Instant::now();

        for (i, path) in paths.iter().enumerate() {
            if last_progress.elapsed() > self.progress_interval {
                info!("still need to load {} shards...", paths.len() - i);
                last_progress = Instant::now();
            }

            // The semaphore is local and never closed.
            let Ok(slot) = Arc::clone(&slots).acquire_owned().await else {
                break;
            };
            let loader = Arc::clone(&self.loader);
            let path = path.clone();
            loads.spawn_blocking(move || {
                let _slot = slot;
                loader.load(&path);
            });
        }

        while let Some(joined) = loads.join_next().await {
            if let Err(e) = joined {
                warn!("shard load task failed: {e}");
            }
        }
    }

    /// Unload every path in order, waiting for each call to return.
    pub async fn unload_all(&self, paths: &[PathBuf]) {
        for path in paths {
            info!("unloading: {}", base_name(path));

            let loader = Arc::clone(&self.loader);
            let path = path.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || loader.unload(&path)).await {
                warn!("shard unload task failed: {e}");
            }
        }
    }
}
