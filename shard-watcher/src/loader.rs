//! The capability the watcher drives when shards appear or disappear.

use std::path::Path;
use std::sync::Arc;

/// Receives load and unload instructions for shard files.
///
/// Both methods may be called concurrently from several threads, so
/// implementations must synchronize internally. Any error while loading or
/// unloading is the implementation's to handle; the watcher never sees it.
pub trait ShardLoader: Send + Sync + 'static {
    /// Bring the shard at `path` into active use. Called again with the same
    /// path when the file's modification time changes.
    fn load(&self, path: &Path);

    /// Remove the shard at `path` from active use.
    fn unload(&self, path: &Path);
}

impl<L: ShardLoader + ?Sized> ShardLoader for Arc<L> {
    fn load(&self, path: &Path) {
        (**self).load(path);
    }

    fn unload(&self, path: &Path) {
        (**self).unload(path);
    }
}
