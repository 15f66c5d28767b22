//! # Shard Watcher
//!
//! Keeps an in-memory index in sync with a directory of immutable shard
//! files. Shards present at startup are loaded by a cold scan; afterwards
//! filesystem notifications trigger rescans that load new or modified shards
//! and unload deleted ones through a [`ShardLoader`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Shard Watcher                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  notify ──► EventDebouncer ──► pending slot (depth 1)           │
//! │                                      │                          │
//! │                                      ▼                          │
//! │                SnapshotDiffer ──► LoadDispatcher ──► ShardLoader│
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use codex_shard_watcher::ShardWatcher;
//!
//! let watcher = ShardWatcher::new("/var/lib/index", loader).await?;
//! // ...
//! watcher.stop().await;
//! ```

pub mod config;
pub mod debounce;
pub mod differ;
pub mod dispatch;
pub mod error;
pub mod loader;
pub mod watcher;

pub use config::{DEFAULT_SHARD_PATTERN, WatcherConfig};
pub use differ::{ScanReport, SnapshotDiffer, human_truncate_list};
pub use dispatch::LoadDispatcher;
pub use error::{Result, WatcherError};
pub use loader::ShardLoader;
pub use watcher::{ShardWatcher, WatcherState};
