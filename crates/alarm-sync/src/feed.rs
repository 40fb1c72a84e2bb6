//! Bridges store change notifications into the coordinator.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use alarm_store::{AlarmStore, ChangeSink, StoreChange};
use tokio::sync::mpsc;
use tracing::warn;

/// The store type the coordinator works against.
pub type SyncedStore = AlarmStore<ChangeFeed>;

/// [`ChangeSink`] that forwards committed changes over a bounded channel.
///
/// Emission never blocks the writer. When the channel is full the change is
/// dropped and the overflow flag is raised; the coordinator then replans
/// every alarm instead of trusting the queue.
#[derive(Clone)]
pub struct ChangeFeed {
    tx: mpsc::Sender<StoreChange>,
    overflowed: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

/// Receiving half of a [`ChangeFeed`].
pub struct ChangeStream {
    rx: mpsc::Receiver<StoreChange>,
    overflowed: Arc<AtomicBool>,
}

impl ChangeFeed {
    pub fn channel(capacity: usize) -> (ChangeFeed, ChangeStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let overflowed = Arc::new(AtomicBool::new(false));
        (
            ChangeFeed {
                tx,
                overflowed: Arc::clone(&overflowed),
                dropped: Arc::new(AtomicU64::new(0)),
            },
            ChangeStream { rx, overflowed },
        )
    }

    /// Total changes dropped on overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl ChangeSink for ChangeFeed {
    fn emit(&self, change: StoreChange) {
        match self.tx.try_send(change) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(change)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if !self.overflowed.swap(true, Ordering::AcqRel) {
                    warn!(alarm_id = %change.id(), "change queue full, falling back to full replan");
                }
            }
            // Coordinator gone; the next start replans from the store.
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.overflowed.store(true, Ordering::Release);
            }
        }
    }
}

impl ChangeStream {
    pub async fn recv(&mut self) -> Option<StoreChange> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<StoreChange> {
        self.rx.try_recv().ok()
    }

    /// Returns and clears the overflow flag.
    pub fn take_overflow(&self) -> bool {
        self.overflowed.swap(false, Ordering::AcqRel)
    }
}
