//! Client handler registry
//!
//! Each connected client has a [`ClientHandle`] wrapping a bounded outbound queue
//! that the transport's write task drains. The router only ever enqueues, and
//! enqueueing never blocks it for longer than the configured strategy allows:
//! one slow client must not stall delivery to the others.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use flume::{Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use takrelay_cot::Event;
use tracing::{debug, info};

/// Messages queued for a client. Broadcasts share one allocation.
pub type Outbound = Arc<Event>;

/// What to do when a client's outbound queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryStrategy {
    /// Drop the new message immediately (default)
    #[default]
    DropOnFull,
    /// Wait up to the timeout for space, then drop
    TryForTimeout(Duration),
}

/// Why a message did not reach a client's queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Full,
    Timeout,
    Disconnected,
}

/// Result of an enqueue attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    Dropped(DropReason),
}

/// Router-side handle for one client session
#[derive(Debug)]
pub struct ClientHandle {
    uid: RwLock<String>,
    callsign: RwLock<Option<String>>,
    tx: Sender<Outbound>,
    queued: AtomicU64,
    dropped: AtomicU64,
}

impl ClientHandle {
    /// Create a handle and the receiver its write task should drain
    pub fn new(uid: impl Into<String>, capacity: usize) -> (Arc<Self>, Receiver<Outbound>) {
        let (tx, rx) = flume::bounded(capacity);
        let handle = Arc::new(Self {
            uid: RwLock::new(uid.into()),
            callsign: RwLock::new(None),
            tx,
            queued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });
        (handle, rx)
    }

    pub fn uid(&self) -> String {
        self.uid.read().clone()
    }

    pub fn callsign(&self) -> Option<String> {
        self.callsign.read().clone()
    }

    pub fn set_callsign(&self, callsign: impl Into<String>) {
        *self.callsign.write() = Some(callsign.into());
    }

    fn has_callsign(&self, callsign: &str) -> bool {
        self.callsign.read().as_deref() == Some(callsign)
    }

    /// Queue without waiting
    pub fn try_enqueue(&self, message: Outbound) -> Delivery {
        let delivery = match self.tx.try_send(message) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Dropped(DropReason::Full),
            Err(TrySendError::Disconnected(_)) => Delivery::Dropped(DropReason::Disconnected),
        };
        self.record(delivery)
    }

    /// Queue according to `strategy`
    pub async fn enqueue(&self, message: Outbound, strategy: DeliveryStrategy) -> Delivery {
        match strategy {
            DeliveryStrategy::DropOnFull => self.try_enqueue(message),
            DeliveryStrategy::TryForTimeout(timeout) => {
                let delivery = tokio::select! {
                    result = self.tx.send_async(message) => match result {
                        Ok(()) => Delivery::Queued,
                        Err(_) => Delivery::Dropped(DropReason::Disconnected),
                    },
                    _ = tokio::time::sleep(timeout) => Delivery::Dropped(DropReason::Timeout),
                };
                self.record(delivery)
            }
        }
    }

    fn record(&self, delivery: Delivery) -> Delivery {
        match delivery {
            Delivery::Queued => self.queued.fetch_add(1, Ordering::Relaxed),
            Delivery::Dropped(_) => self.dropped.fetch_add(1, Ordering::Relaxed),
        };
        delivery
    }

    pub fn queued(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Messages waiting to be written
    pub fn pending(&self) -> usize {
        self.tx.len()
    }

    /// True once the write task has dropped its receiver
    pub fn is_closed(&self) -> bool {
        self.tx.is_disconnected()
    }
}

/// Registry of connected clients keyed by uid
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handles: DashMap<String, Arc<ClientHandle>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle, replacing any previous handle with the same uid
    pub fn register(&self, uid: impl Into<String>, handle: Arc<ClientHandle>) {
        let uid = uid.into();
        info!(uid = %uid, "New client");
        if self.handles.insert(uid.clone(), handle).is_some() {
            debug!(uid = %uid, "Replaced existing handler");
        }
    }

    pub fn deregister(&self, uid: &str) -> Option<Arc<ClientHandle>> {
        let removed = self.handles.remove(uid).map(|(_, handle)| handle);
        if removed.is_some() {
            info!(uid = %uid, "Removed handler");
        }
        removed
    }

    /// Remove `uid` only if it still maps to `handle`.
    ///
    /// Sessions use this on disconnect so that a client which already reconnected
    /// under the same uid keeps its new registration.
    pub fn deregister_handle(&self, uid: &str, handle: &Arc<ClientHandle>) -> bool {
        let removed = self
            .handles
            .remove_if(uid, |_, current| Arc::ptr_eq(current, handle))
            .is_some();
        if removed {
            info!(uid = %uid, "Removed handler");
        }
        removed
    }

    /// Move a handle to a new uid, typically once a client's own contact uid is known.
    ///
    /// Refused while `new_uid` belongs to another live client; a handle whose
    /// session has closed may be taken over. The handle stays under `old_uid`
    /// when the move is refused.
    pub fn rebind(&self, old_uid: &str, new_uid: &str) -> bool {
        if old_uid == new_uid {
            return self.handles.contains_key(old_uid);
        }
        let Some((_, handle)) = self.handles.remove(old_uid) else {
            return false;
        };

        let claimed = match self.handles.entry(new_uid.to_string()) {
            Entry::Occupied(entry) if !entry.get().is_closed() => false,
            Entry::Occupied(mut entry) => {
                entry.insert(Arc::clone(&handle));
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&handle));
                true
            }
        };

        if !claimed {
            debug!(old_uid = %old_uid, new_uid = %new_uid, "Uid held by a live client, not rebinding");
            self.handles.insert(old_uid.to_string(), handle);
            return false;
        }

        *handle.uid.write() = new_uid.to_string();
        info!(old_uid = %old_uid, new_uid = %new_uid, "Rebound handler");
        true
    }

    pub fn find_by_uid(&self, uid: &str) -> Option<Arc<ClientHandle>> {
        self.handles.get(uid).map(|h| Arc::clone(h.value()))
    }

    /// First handle whose learned callsign matches. Order between handles that
    /// share a callsign is unspecified.
    pub fn find_by_callsign(&self, callsign: &str) -> Option<Arc<ClientHandle>> {
        self.handles
            .iter()
            .find(|h| h.value().has_callsign(callsign))
            .map(|h| Arc::clone(h.value()))
    }

    /// Visit every handle except the one registered as `excluded_uid`.
    /// Must not call back into the registry.
    pub fn for_each_except(&self, excluded_uid: &str, mut visitor: impl FnMut(&str, &Arc<ClientHandle>)) {
        for entry in self.handles.iter() {
            if entry.key() != excluded_uid {
                visitor(entry.key(), entry.value());
            }
        }
    }

    /// Handles to broadcast to, collected so no shard lock is held while sending
    pub fn collect_except(&self, excluded_uid: &str) -> Vec<Arc<ClientHandle>> {
        let mut handles = Vec::with_capacity(self.handles.len());
        self.for_each_except(excluded_uid, |_, handle| handles.push(Arc::clone(handle)));
        handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
