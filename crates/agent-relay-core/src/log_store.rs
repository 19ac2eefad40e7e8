//! Full-tail log store with change notification.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::LogEntry;

/// Shared, immutable view of a log tail.
pub type LogSnapshot = Arc<[LogEntry]>;

/// Ordered log buffer for one session.
///
/// Each fetch from the remote service returns the complete known tail, so the
/// store is replaced wholesale rather than appended to. Snapshots handed out
/// earlier are never mutated: a replacement swaps in a new allocation and
/// notifies subscribers.
pub struct LogStore {
    sender: watch::Sender<LogSnapshot>,
}

impl Default for LogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStore")
            .field("entries", &self.len())
            .finish()
    }
}

impl LogStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(LogSnapshot::from(Vec::<LogEntry>::new()));
        Self { sender }
    }

    /// Set the contents to exactly `entries`, in the order given.
    ///
    /// Shrinking is honoured: nothing from the previous tail is retained.
    pub fn replace(&self, entries: Vec<LogEntry>) -> LogSnapshot {
        let snapshot = LogSnapshot::from(entries);
        self.sender.send_replace(Arc::clone(&snapshot));
        snapshot
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.replace(Vec::new());
    }

    /// Current contents.
    #[must_use]
    pub fn snapshot(&self) -> LogSnapshot {
        Arc::clone(&self.sender.borrow())
    }

    /// Number of entries in the current tail.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sender.borrow().len()
    }

    /// Whether the current tail is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get a receiver that observes every replacement.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LogSnapshot> {
        self.sender.subscribe()
    }

    /// Stream of tails, yielding only on replacements made after the call.
    #[must_use]
    pub fn updates(&self) -> futures::stream::BoxStream<'static, LogSnapshot> {
        WatchStream::from_changes(self.subscribe()).boxed()
    }
}
