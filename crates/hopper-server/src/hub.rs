//! Broadcast hub fanning committed changes out to subscribers
//!
//! Every subscriber owns a bounded queue. Publishing never waits: a
//! subscriber whose queue is full is removed on the spot, which closes its
//! receiving side so the connection task can hang up. Publishing happens
//! inside the store's mutation path, so each queue sees changes in
//! sequence order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use hopper_core::ipc::IpcEvent;
use hopper_core::{BacklogItem, Lode, LodeId};

/// Kind of state change carried by a broadcast
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    LodeCreated(Lode),
    LodeUpdated(Lode),
    LodeArchived(Lode),
    LodeRestored(Lode),
    BacklogAdded(BacklogItem),
    BacklogRemoved(BacklogItem),
}

/// One committed change stamped with its global sequence number
#[derive(Debug, Clone, PartialEq)]
pub struct Broadcast {
    pub seq: u64,
    pub change: Change,
}

impl Broadcast {
    /// The lode this change concerns, if any
    pub fn lode(&self) -> Option<&Lode> {
        match &self.change {
            Change::LodeCreated(lode)
            | Change::LodeUpdated(lode)
            | Change::LodeArchived(lode)
            | Change::LodeRestored(lode) => Some(lode),
            Change::BacklogAdded(_) | Change::BacklogRemoved(_) => None,
        }
    }

    /// Frame sent to dashboard subscribers
    pub fn to_event(&self) -> IpcEvent {
        let seq = self.seq;
        match &self.change {
            Change::LodeCreated(lode) => IpcEvent::LodeCreated {
                seq,
                lode: lode.clone(),
            },
            Change::LodeUpdated(lode) => IpcEvent::LodeUpdated {
                seq,
                lode: lode.clone(),
            },
            Change::LodeArchived(lode) => IpcEvent::LodeArchived {
                seq,
                lode: lode.clone(),
            },
            Change::LodeRestored(lode) => IpcEvent::LodeRestored {
                seq,
                lode: lode.clone(),
            },
            Change::BacklogAdded(item) => IpcEvent::BacklogAdded {
                seq,
                item: item.clone(),
            },
            Change::BacklogRemoved(item) => IpcEvent::BacklogRemoved {
                seq,
                item: item.clone(),
            },
        }
    }
}

/// Which broadcasts a subscriber receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Everything (dashboard)
    All,
    /// Changes to a single lode (watcher)
    Lode(LodeId),
}

impl Filter {
    fn accepts(&self, broadcast: &Broadcast) -> bool {
        match self {
            Filter::All => true,
            Filter::Lode(id) => broadcast.lode().map(|l| &l.id == id).unwrap_or(false),
        }
    }
}

struct Slot {
    filter: Filter,
    tx: mpsc::Sender<Arc<Broadcast>>,
}

/// Registry of live subscribers
pub struct BroadcastHub {
    subscribers: DashMap<u64, Slot>,
    next_id: AtomicU64,
    capacity: usize,
}

impl BroadcastHub {
    /// Create a hub whose subscribers buffer at most `capacity` broadcasts
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Register a subscriber
    ///
    /// The returned handle unregisters itself when dropped.
    pub fn subscribe(self: &Arc<Self>, filter: Filter) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);

        tracing::debug!("Subscriber {} registered ({:?})", id, filter);
        self.subscribers.insert(id, Slot { filter, tx });

        Subscription {
            id,
            rx,
            hub: Arc::clone(self),
        }
    }

    /// Queue a broadcast for every matching subscriber
    ///
    /// Returns the number of subscribers it was queued for.
    pub fn publish(&self, broadcast: Broadcast) -> usize {
        let broadcast = Arc::new(broadcast);
        let mut delivered = 0;

        self.subscribers.retain(|id, slot| {
            if !slot.filter.accepts(&broadcast) {
                return true;
            }
            match slot.tx.try_send(Arc::clone(&broadcast)) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        "Dropping subscriber {}: queue of {} is full at seq {}",
                        id,
                        self.capacity,
                        broadcast.seq
                    );
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!("Subscriber {} went away", id);
                    false
                }
            }
        });

        delivered
    }

    /// Number of registered subscribers
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Check if nobody is subscribed
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    fn unsubscribe(&self, id: u64) {
        if self.subscribers.remove(&id).is_some() {
            tracing::debug!("Subscriber {} unregistered", id);
        }
    }
}

/// Receiving end of a hub registration
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Arc<Broadcast>>,
    hub: Arc<BroadcastHub>,
}

impl Subscription {
    /// Next broadcast, or `None` once the hub has dropped this subscriber
    pub async fn recv(&mut self) -> Option<Arc<Broadcast>> {
        self.rx.recv().await
    }

    /// Next broadcast if one is already queued
    #[cfg(test)]
    pub fn try_recv(&mut self) -> Option<Arc<Broadcast>> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
