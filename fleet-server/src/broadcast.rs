use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;

use fleet_shared::protocol::DashboardEvent;

/// Fan-out set of connected dashboard observers. Observers have no
/// persistent identity; membership lasts exactly as long as the
/// connection.
pub struct ObserverBroadcast {
    observers: DashMap<u64, mpsc::UnboundedSender<DashboardEvent>>,
    next_id: AtomicU64,
}

impl ObserverBroadcast {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            observers: DashMap::new(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn subscribe(&self, tx: mpsc::UnboundedSender<DashboardEvent>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.insert(id, tx);
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.observers.remove(&id);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Writes `event` to every currently-subscribed observer. A closed
    /// observer is skipped; write failures are swallowed so observer
    /// loss never affects agent-side delivery.
    pub fn broadcast(&self, event: DashboardEvent) {
        for entry in self.observers.iter() {
            let _ = entry.value().send(event.clone());
        }
    }
}
