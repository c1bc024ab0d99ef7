//! The set of connected viewers.
//!
//! Each viewer owns a bounded queue; the registry only keeps the sending half. Iteration works on
//! a snapshot taken under a short read lock, so registering or dropping a viewer never waits on
//! a fan-out that is in progress.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::{self, error::SendTimeoutError};

use super::ViewerEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("subscriber {0} did not accept the event in time")]
    DeliveryTimeout(SubscriptionId),

    #[error("subscriber {0} has disconnected")]
    Closed(SubscriptionId),
}

#[derive(Debug)]
pub struct Subscriber {
    id: SubscriptionId,
    tx: mpsc::Sender<Arc<ViewerEvent>>,
}

impl Subscriber {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Queues `event`, waiting at most `timeout` for space in a full queue
    pub async fn deliver(
        &self,
        event: Arc<ViewerEvent>,
        timeout: Duration,
    ) -> Result<(), DeliveryError> {
        match self.tx.send_timeout(event, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(DeliveryError::DeliveryTimeout(self.id)),
            Err(SendTimeoutError::Closed(_)) => Err(DeliveryError::Closed(self.id)),
        }
    }
}

#[derive(Debug)]
struct Inner {
    next_id: AtomicU64,
    capacity: usize,
    subscribers: RwLock<HashMap<SubscriptionId, Arc<Subscriber>>>,
}

impl Inner {
    fn remove(&self, id: SubscriptionId) -> bool {
        // a poisoned map is still structurally sound; removal must not be skipped
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.remove(&id).is_some()
    }
}

#[derive(Debug, Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<Inner>,
}

impl SubscriptionRegistry {
    /// `capacity` is the per-subscriber queue depth and must be non-zero
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
                subscribers: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn register(&self) -> SubscriptionHandle {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.inner.capacity);

        self.inner
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, Arc::new(Subscriber { id, tx }));

        tracing::debug!(subscription = %id, "viewer registered");

        SubscriptionHandle {
            id,
            rx,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Returns whether `id` was still registered
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        let removed = self.inner.remove(id);
        if removed {
            tracing::debug!(subscription = %id, "viewer unregistered");
        }

        removed
    }

    /// Visits every live subscriber present when the call started. Subscribers that disconnect
    /// before their turn are skipped.
    pub fn for_each(&self, mut visit: impl FnMut(&Arc<Subscriber>)) {
        let snapshot: Vec<Arc<Subscriber>> = self
            .inner
            .subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();

        snapshot
            .iter()
            .filter(|subscriber| !subscriber.is_closed())
            .for_each(|subscriber| visit(subscriber));
    }

    pub fn len(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The receiving side of one viewer's queue. Dropping it unregisters the viewer.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    rx: mpsc::Receiver<Arc<ViewerEvent>>,
    registry: Weak<Inner>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Arc<ViewerEvent>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<ViewerEvent>> {
        self.rx.try_recv().ok()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            inner.remove(self.id);
            tracing::debug!(subscription = %self.id, "viewer handle dropped");
        }
    }
}
