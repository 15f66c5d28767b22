//! Configuration for a watched shard directory.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use wildmatch::WildMatch;

use crate::error::{Result, WatcherError};

/// Default pattern selecting shard files.
pub const DEFAULT_SHARD_PATTERN: &str = "*.zoekt";

/// Default interval between "still loading" progress lines.
pub const DEFAULT_PROGRESS_INTERVAL_SECS: u64 = 10;

/// Configuration for a watched shard directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Directory holding the shards. Only its direct children are considered.
    pub dir: PathBuf,

    /// Wildcard pattern matched against file names.
    #[serde(default = "default_pattern")]
    pub pattern: String,

    /// Maximum number of concurrent loads (None = available parallelism).
    #[serde(default)]
    pub max_concurrent_loads: Option<usize>,

    /// Seconds between progress lines while a large scan is loading.
    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,
}

fn default_pattern() -> String {
    DEFAULT_SHARD_PATTERN.to_string()
}

fn default_progress_interval_secs() -> u64 {
    DEFAULT_PROGRESS_INTERVAL_SECS
}

impl WatcherConfig {
    /// Create a config for `dir` with default settings.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pattern: default_pattern(),
            max_concurrent_loads: None,
            progress_interval_secs: DEFAULT_PROGRESS_INTERVAL_SECS,
        }
    }

    /// Set the shard name pattern.
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    /// Set the concurrency ceiling for loads.
    pub fn with_max_concurrent_loads(mut self, limit: usize) -> Self {
        self.max_concurrent_loads = Some(limit);
        self
    }

    /// Set the progress interval.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval_secs = interval.as_secs();
        self
    }

    /// Check the config for values the watcher cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.pattern.is_empty() || self.pattern.contains(std::path::is_separator) {
            return Err(WatcherError::InvalidPattern(self.pattern.clone()));
        }

        if self.max_concurrent_loads == Some(0) {
            return Err(WatcherError::Config(
                "max_concurrent_loads must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Effective concurrency ceiling for loads.
    pub fn load_concurrency(&self) -> usize {
        self.max_concurrent_loads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        })
    }

    /// Minimum time between "still need to load" progress lines during a scan.
    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    /// Build the matcher for [`Self::pattern`].
    pub(crate) fn matcher(&self) -> WildMatch {
        WildMatch::new(&self.pattern)
    }

    /// Check if a file name is selected by the pattern.
    pub fn matches(&self, file_name: &str) -> bool {
        self.matcher().matches(file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    #[test]
    fn test_config_defaults() {
        let config = WatcherConfig::new("/srv/index");

        assert_eq!(config.dir, Path::new("/srv/index"));
        assert_eq!(config.pattern, "*.zoekt");
        assert_eq!(config.max_concurrent_loads, None);
        assert_eq!(config.progress_interval(), Duration::from_secs(10));
        assert!(config.load_concurrency() >= 1);
    }

    #[test]
    fn test_pattern_matching() {
        let config = WatcherConfig::new("/srv/index");

        assert!(config.matches("foo.zoekt"));
        assert!(config.matches(".zoekt"));
        assert!(!config.matches("foo.zoekt.bla"));
        assert!(!config.matches("foo.zoekt.tmp"));
        assert!(!config.matches("zoekt"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(WatcherConfig::new("/d").with_pattern("").validate().is_err());
        assert!(
            WatcherConfig::new("/d")
                .with_pattern("sub/*.zoekt")
                .validate()
                .is_err()
        );
        assert!(
            WatcherConfig::new("/d")
                .with_max_concurrent_loads(0)
                .validate()
                .is_err()
        );
        assert!(
            WatcherConfig::new("/d")
                .with_max_concurrent_loads(2)
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: WatcherConfig = serde_json::from_str(r#"{"dir": "/srv/index"}"#).unwrap();

        assert_eq!(config.pattern, DEFAULT_SHARD_PATTERN);
        assert_eq!(config.progress_interval_secs, DEFAULT_PROGRESS_INTERVAL_SECS);
        assert_eq!(config.max_concurrent_loads, None);
    }
}
