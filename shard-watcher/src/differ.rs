//! Snapshot comparison between the tracked shards and the directory on disk.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;
use wildmatch::WildMatch;

use crate::config::WatcherConfig;
use crate::dispatch::LoadDispatcher;
use crate::error::{Result, WatcherError};
use crate::loader::ShardLoader;

/// Number of shard names included in the "loading" log line.
const LOG_NAME_LIMIT: usize = 5;

/// Keeps the last observed modification time of every shard in a directory
/// and turns directory listings into load/unload calls.
///
/// Only one task ever owns a differ, so the tracked map needs no lock.
pub struct SnapshotDiffer {
    dir: PathBuf,
    matcher: WildMatch,
    timestamps: HashMap<PathBuf, SystemTime>,
    dispatcher: LoadDispatcher,
    primed: bool,
}

impl SnapshotDiffer {
    /// Create a differ with nothing tracked yet.
    pub fn new(config: &WatcherConfig, loader: Arc<dyn ShardLoader>) -> Self {
        let dispatcher = LoadDispatcher::new(
            loader,
            config.load_concurrency(),
            config.progress_interval(),
        );

        Self {
            dir: config.dir.clone(),
            matcher: config.matcher(),
            timestamps: HashMap::new(),
            dispatcher,
            primed: false,
        }
    }

    /// The watched directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Shards currently tracked, with their last seen modification time.
    pub fn tracked(&self) -> &HashMap<PathBuf, SystemTime> {
        &self.timestamps
    }

    /// Compare the directory against the tracked state, unload vanished
    /// shards, then load new and modified ones.
    ///
    /// Returns once every load has finished. Fails if the directory cannot be
    /// listed, or if the very first scan finds no shard at all.
    pub async fn scan(&mut self) -> Result<ScanReport> {
        let start = Instant::now();
        let listed = self.list()?;
        let current = modification_times(&listed);

        if listed.is_empty() && !self.primed && self.timestamps.is_empty() {
            return Err(WatcherError::EmptyDirectory(self.dir.clone()));
        }
        self.primed = true;

        let mut to_load = Vec::new();
        for (path, mtime) in &current {
            if self.timestamps.get(path) != Some(mtime) {
                to_load.push(path.clone());
                self.timestamps.insert(path.clone(), *mtime);
            }
        }

        let mut to_drop: Vec<PathBuf> = self
            .timestamps
            .keys()
            .filter(|path| !current.contains_key(*path))
            .cloned()
            .collect();
        for path in &to_drop {
            self.timestamps.remove(path);
        }

        to_load.sort();
        to_drop.sort();

        if !to_drop.is_empty() {
            info!("unloading {} shard(s)", to_drop.len());
            self.dispatcher.unload_all(&to_drop).await;
        }

        if !to_load.is_empty() {
            info!(
                "loading {} shard(s): {}",
                to_load.len(),
                human_truncate_list(&to_load, LOG_NAME_LIMIT)
            );
            self.dispatcher.dispatch(&to_load).await;
        }

        let report = ScanReport {
            loaded: to_load.len(),
            unloaded: to_drop.len(),
            tracked: self.timestamps.len(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        debug!(
            "scanned {} in {}ms (loaded: {}, unloaded: {}, tracked: {})",
            self.dir.display(),
            report.duration_ms,
            report.loaded,
            report.unloaded,
            report.tracked
        );

        Ok(report)
    }

    /// List matching shards directly inside the directory, in no particular
    /// order.
    fn list(&self) -> Result<Vec<PathBuf>> {
        let walker = WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false);

        let mut listed = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(WatcherError::Listing {
                        path: self.dir.clone(),
                        source: e.into(),
                    });
                }
                // Entry vanished mid-listing; the next scan settles it.
                Err(_) => continue,
            };

            if entry.file_type().is_dir() {
                continue;
            }
            if self.matcher.matches(&entry.file_name().to_string_lossy()) {
                listed.push(entry.into_path());
            }
        }

        Ok(listed)
    }
}

/// Modification time of every listed path that can still be stat'ed.
///
/// Symlinks are not followed. A path removed since it was listed is left
/// out; the scan its removal triggers will settle it.
fn modification_times(listed: &[PathBuf]) -> HashMap<PathBuf, SystemTime> {
    listed
        .iter()
        .filter_map(|path| {
            let mtime = fs::symlink_metadata(path).ok()?.modified().ok()?;
            Some((path.clone(), mtime))
        })
        .collect()
}

/// Outcome of a single scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    /// Shards handed to the loader because they were new or modified.
    pub loaded: usize,

    /// Shards unloaded because they disappeared.
    pub unloaded: usize,

    /// Shards tracked after the scan.
    pub tracked: usize,

    /// Time taken in milliseconds.
    pub duration_ms: u64,
}

/// Format paths for a log line: sorted base names, at most `max` of them,
/// followed by a count of the rest.
///
/// `["dir/1", "dir/2", "dir/3", "dir/4"]` with `max = 2` gives
/// `"1, 2... 2 more"`.
pub fn human_truncate_list<P: AsRef<Path>>(paths: &[P], max: usize) -> String {
    let mut sorted: Vec<&Path> = paths.iter().map(AsRef::as_ref).collect();
    sorted.sort_by(|a, b| a.as_os_str().cmp(b.as_os_str()));

    let mut out = String::new();
    for (i, path) in sorted.iter().enumerate() {
        if i >= max {
            let _ = write!(out, "... {} more", sorted.len() - i);
            break;
        }
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&base_name(path));
    }
    out
}

pub(crate) fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
