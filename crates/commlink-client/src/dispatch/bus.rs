use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

/// Event carried by an [`EventBus`].
pub trait BusEvent: Send + Sync + 'static {
    type Kind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

/// Subscriber callback.
pub type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Token returned by `subscribe`; pass it back to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription<K> {
    kind: Option<K>,
    id: u64,
}

/// Publish/subscribe fan-out keyed by event kind.
///
/// - Handlers of one kind run in subscription order, then wildcard handlers.
/// - Removal goes through the token (kind bucket + id), never handler equality.
/// - Handlers are cloned out before they run, so a handler may subscribe,
///   unsubscribe or emit without deadlocking.
///
/// Cloning the bus yields another handle to the same subscribers.
pub struct EventBus<E: BusEvent> {
    inner: Arc<BusInner<E>>,
}

struct BusInner<E: BusEvent> {
    // None => wildcard
    handlers: DashMap<Option<E::Kind>, BTreeMap<u64, Handler<E>>>,
    next_id: AtomicU64,
}

impl<E: BusEvent> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: BusEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: BusEvent> EventBus<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                handlers: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn subscribe(
        &self,
        kind: E::Kind,
        handler: impl Fn(&E) + Send + Sync + 'static,
    ) -> Subscription<E::Kind> {
        self.insert(Some(kind), Arc::new(handler))
    }

    /// Receive every event regardless of kind.
    pub fn subscribe_all(&self, handler: impl Fn(&E) + Send + Sync + 'static) -> Subscription<E::Kind> {
        self.insert(None, Arc::new(handler))
    }

    fn insert(&self, kind: Option<E::Kind>, handler: Handler<E>) -> Subscription<E::Kind> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .entry(kind)
            .or_default()
            .insert(id, handler);
        Subscription { kind, id }
    }

    /// Returns false when the token was already removed.
    pub fn unsubscribe(&self, token: Subscription<E::Kind>) -> bool {
        let Some(mut bucket) = self.inner.handlers.get_mut(&token.kind) else {
            return false;
        };
        let removed = bucket.remove(&token.id).is_some();
        if bucket.is_empty() {
            drop(bucket);
            self.inner.handlers.remove_if(&token.kind, |_, b| b.is_empty());
        }
        removed
    }

    pub fn emit(&self, event: E) {
        let kind = event.kind();
        let mut targets: Vec<Handler<E>> = Vec::new();
        if let Some(bucket) = self.inner.handlers.get(&Some(kind)) {
            targets.extend(bucket.values().cloned());
        }
        if let Some(bucket) = self.inner.handlers.get(&None) {
            targets.extend(bucket.values().cloned());
        }
        for handler in targets {
            handler(&event);
        }
    }

    /// Drop every subscriber.
    pub fn clear(&self) {
        self.inner.handlers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.handlers.iter().map(|b| b.value().len()).sum()
    }
}
