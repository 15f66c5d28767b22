//! Coalescing of raw filesystem notifications into rescan signals.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use notify::event::{AccessKind, AccessMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;

/// Raw notifications buffered between notify's thread and the async side.
const RAW_EVENT_CAPACITY: usize = 1000;

/// Receiving end of the pending-rescan slot. Holds at most one signal.
pub type PendingSignals = mpsc::Receiver<()>;

/// Reads notifications for one directory and keeps at most one rescan owed.
///
/// Owns the notify subscription; dropping the debouncer unsubscribes.
pub struct EventDebouncer {
    watcher: RecommendedWatcher,
    raw_rx: mpsc::Receiver<notify::Result<Event>>,
    overflowed: Arc<AtomicBool>,
    pending_tx: mpsc::Sender<()>,
}

impl EventDebouncer {
    /// Subscribe to changes directly inside `dir`.
    pub fn subscribe(dir: &Path) -> Result<(Self, PendingSignals)> {
        let (raw_tx, raw_rx) = mpsc::channel(RAW_EVENT_CAPACITY);
        let overflowed = Arc::new(AtomicBool::new(false));

        // Runs on notify's own thread; never blocks it. A full buffer is an
        // overflow: the event is dropped and the flag owes a rescan.
        let flag = Arc::clone(&overflowed);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Err(TrySendError::Full(_)) = raw_tx.try_send(res) {
                flag.store(true, Ordering::Release);
            }
        })?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        let (pending_tx, pending_rx) = mpsc::channel(1);
        debug!("Subscribed to changes in {}", dir.display());

        Ok((
            Self {
                watcher,
                raw_rx,
                overflowed,
                pending_tx,
            },
            pending_rx,
        ))
    }

    /// Translate notifications into pending signals until `quit` fires.
    ///
    /// On return the subscription is closed and the pending slot's sender is
    /// dropped, so the receiving side sees the channel close.
    pub async fn run(mut self, quit: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                () = quit.cancelled() => break,
                res = self.raw_rx.recv() => {
                    let changed = match res {
                        Some(Ok(event)) => {
                            if event.need_rescan() {
                                debug!("notification queue overflowed, rescanning");
                            }
                            signals_change(&event)
                        }
                        Some(Err(e)) => {
                            warn!("watcher error: {e}");
                            false
                        }
                        None => break,
                    };
                    let dropped = self.overflowed.swap(false, Ordering::AcqRel);
                    if dropped {
                        debug!("notification buffer full, rescanning");
                    }
                    if (changed || dropped) && !self.post() {
                        break;
                    }
                }
            }
        }

        let Self {
            watcher,
            pending_tx,
            ..
        } = self;
        drop(watcher);
        drop(pending_tx);
    }

    /// Owe a rescan regardless of notifications.
    pub fn request_rescan(&self) {
        self.post();
    }

    /// Try to leave a rescan signal. Returns false once nobody is listening.
    fn post(&self) -> bool {
        match self.pending_tx.try_send(()) {
            // A rescan is already owed; it will see this change too.
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Closed(())) => false,
        }
    }
}

/// Whether a notification can reflect a change to the directory's contents.
///
/// Plain reads (opening or closing a file without writing) cannot, and are
/// common while the loader itself is reading shards.
fn signals_change(event: &Event) -> bool {
    if event.need_rescan() {
        return true;
    }
    !matches!(
        event.kind,
        EventKind::Access(
            AccessKind::Open(_) | AccessKind::Read | AccessKind::Close(AccessMode::Read)
        )
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, Flag, ModifyKind, RemoveKind};
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_signals_change() {
        assert!(signals_change(&Event::new(EventKind::Create(CreateKind::File))));
        assert!(signals_change(&Event::new(EventKind::Modify(ModifyKind::Any))));
        assert!(signals_change(&Event::new(EventKind::Remove(RemoveKind::File))));
        assert!(signals_change(&Event::new(EventKind::Access(
            AccessKind::Close(AccessMode::Write)
        ))));
        assert!(!signals_change(&Event::new(EventKind::Access(
            AccessKind::Open(AccessMode::Any)
        ))));
        assert!(!signals_change(&Event::new(EventKind::Access(
            AccessKind::Close(AccessMode::Read)
        ))));
    }

    #[test]
    fn test_overflow_counts_as_change() {
        let overflow = Event::new(EventKind::Other).set_flag(Flag::Rescan);
        assert!(overflow.need_rescan());
        assert!(signals_change(&overflow));
    }

    #[tokio::test]
    async fn test_burst_coalesces_to_one_signal() {
        let temp_dir = TempDir::new().unwrap();
        let (debouncer, mut pending) = EventDebouncer::subscribe(temp_dir.path()).unwrap();
        let quit = CancellationToken::new();
        let task = tokio::spawn(debouncer.run(quit.clone()));

        for i in 0..20 {
            fs::write(temp_dir.path().join(format!("{i}.zoekt")), "x").unwrap();
        }
        tokio::time::timeout(Duration::from_secs(5), async {
            while pending.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        quit.cancel();
        task.await.unwrap();

        let mut signals = 0;
        while pending.recv().await.is_some() {
            signals += 1;
        }
        assert_eq!(signals, 1);
    }

    #[tokio::test]
    async fn test_full_buffer_owes_rescan() {
        let temp_dir = TempDir::new().unwrap();
        let (debouncer, mut pending) = EventDebouncer::subscribe(temp_dir.path()).unwrap();

        // Nothing drains the raw buffer yet, so it fills up and later events
        // are dropped.
        for i in 0..RAW_EVENT_CAPACITY + 100 {
            fs::write(temp_dir.path().join(format!("{i}.zoekt")), "x").unwrap();
        }
        let overflowed = Arc::clone(&debouncer.overflowed);
        tokio::time::timeout(Duration::from_secs(10), async {
            while !overflowed.load(Ordering::Acquire) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(debouncer.raw_rx.len(), RAW_EVENT_CAPACITY);

        let quit = CancellationToken::new();
        let task = tokio::spawn(debouncer.run(quit.clone()));
        tokio::time::timeout(Duration::from_secs(5), pending.recv())
            .await
            .unwrap()
            .unwrap();

        quit.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_quit_closes_pending_slot() {
        let temp_dir = TempDir::new().unwrap();
        let (debouncer, mut pending) = EventDebouncer::subscribe(temp_dir.path()).unwrap();
        let quit = CancellationToken::new();
        quit.cancel();

        debouncer.run(quit).await;
        assert_eq!(pending.recv().await, None);
    }

    #[test]
    fn test_subscribe_missing_dir_fails() {
        let temp_dir = TempDir::new().unwrap();
        assert!(EventDebouncer::subscribe(&temp_dir.path().join("gone")).is_err());
    }
}
