//! Typed change-event fanout.
//!
//! Components that other parts of the app (usually the UI) need to observe
//! hold an [`EventBus`] and emit [`ChangeEvent`]s through it. Subscribers
//! get their own unbounded channel; a dropped receiver is pruned on the
//! next emit.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// Connectivity came back after an offline stretch.
    OnlineRegained,
    /// Playlist caches changed (mutation, sync commit, placeholder
    /// resolution).
    PlaylistsChanged,
    /// The authoritative queue replaced the local cache after a sync.
    QueueRestored,
    /// The pending-write count changed.
    PendingWrites(u64),
    /// A sync attempt failed; the queue is preserved.
    SyncFailed(String),
    /// A sync attempt committed.
    SyncSucceeded,
}

#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<UnboundedSender<ChangeEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> UnboundedReceiver<ChangeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .expect("event bus lock poisoned")
            .push(tx);
        rx
    }

    pub fn emit(&self, event: ChangeEvent) {
        let mut subs = self.subscribers.lock().expect("event bus lock poisoned");
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_reach_all_subscribers() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.emit(ChangeEvent::PlaylistsChanged);

        assert_eq!(a.try_recv().unwrap(), ChangeEvent::PlaylistsChanged);
        assert_eq!(b.try_recv().unwrap(), ChangeEvent::PlaylistsChanged);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        drop(rx);

        bus.emit(ChangeEvent::SyncSucceeded);
        assert!(bus.subscribers.lock().unwrap().is_empty());
    }

    #[test]
    fn events_queue_until_read() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(ChangeEvent::PendingWrites(1));
        bus.emit(ChangeEvent::PendingWrites(2));

        assert_eq!(rx.try_recv().unwrap(), ChangeEvent::PendingWrites(1));
        assert_eq!(rx.try_recv().unwrap(), ChangeEvent::PendingWrites(2));
    }
}
