use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use vidlink_core::SubscriptionId;

// Process-wide so ids from different sources never collide.
static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Registry of handlers for one kind of event.
///
/// `H` is an unsized handler type such as `dyn Fn() + Send + Sync`.
/// Callers fetch [`handlers`](Self::handlers) and invoke them outside the
/// registry lock, so a handler may subscribe or unsubscribe while running.
pub struct EventSource<H: ?Sized> {
    handlers: Mutex<Vec<(SubscriptionId, Arc<H>)>>,
}

impl<H: ?Sized> EventSource<H> {
    pub fn new() -> Self {
        Self { handlers: Mutex::new(Vec::new()) }
    }

    pub fn subscribe(&self, handler: Arc<H>) -> SubscriptionId {
        let id = SubscriptionId(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, handler));
        id
    }

    /// Returns `false` if `id` was not subscribed here.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.lock();
        let before = handlers.len();
        handlers.retain(|(sub, _)| *sub != id);
        handlers.len() != before
    }

    /// Snapshot of the current handlers, in subscription order.
    pub fn handlers(&self) -> Vec<Arc<H>> {
        self.lock().iter().map(|(_, h)| Arc::clone(h)).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(SubscriptionId, Arc<H>)>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<H: ?Sized> Default for EventSource<H> {
    fn default() -> Self {
        Self::new()
    }
}
