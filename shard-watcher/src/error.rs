//! Error types for the shard watcher.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Errors that can occur while constructing or scanning a shard directory.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// The shard directory could not be enumerated.
    #[error("cannot list directory {}: {source}", .path.display())]
    Listing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// First scan found no matching shards and nothing was tracked yet.
    #[error("directory {} is empty", .0.display())]
    EmptyDirectory(PathBuf),

    /// Invalid shard name pattern.
    #[error("invalid shard pattern: {0}")]
    InvalidPattern(String),

    /// Notify error.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl WatcherError {
    /// Whether this is the empty-directory condition reported by a first scan.
    pub fn is_empty_directory(&self) -> bool {
        matches!(self, Self::EmptyDirectory(_))
    }
}
