//! Typed publish/subscribe bus
//!
//! Handlers are keyed by the event's kind and run synchronously, in registration
//! order. A panicking handler is isolated so its siblings still run.

use log::error;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// An event that can be published on an [`EventEmitter`]
pub trait Event: Send + Sync + 'static {
    /// Discriminant used to route the event to its handlers
    type Kind: Copy + Eq + Hash + std::fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

/// Handle returned by [`EventEmitter::on`], used to remove the handler again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

pub struct EventEmitter<E: Event> {
    listeners: RwLock<HashMap<E::Kind, Vec<(ListenerId, Handler<E>)>>>,
    next_id: AtomicU64,
}

impl<E: Event> EventEmitter<E> {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler for one kind of event
    pub fn on<F>(&self, kind: E::Kind, handler: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns false if it was not registered for `kind`.
    pub fn off(&self, kind: E::Kind, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let Some(handlers) = listeners.get_mut(&kind) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(listener, _)| *listener != id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            listeners.remove(&kind);
        }
        removed
    }

    /// Invoke every handler registered for the event's kind
    pub fn emit(&self, event: &E) {
        // Snapshot so handlers may call on/off without deadlocking
        let handlers: Vec<Handler<E>> = match self.listeners.read().get(&event.kind()) {
            Some(handlers) => handlers.iter().map(|(_, h)| h.clone()).collect(),
            None => return,
        };

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                error!("Event handler for {:?} panicked; continuing with remaining handlers", event.kind());
            }
        }
    }

    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.listeners.read().get(&kind).map_or(0, Vec::len)
    }

    pub fn clear(&self) {
        self.listeners.write().clear();
    }
}

impl<E: Event> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> std::fmt::Debug for EventEmitter<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("kinds", &self.listeners.read().len())
            .finish()
    }
}
