//! Event Bus
//!
//! Observer registration for cross-component notification. Handlers run
//! synchronously, in registration order, before [`EventBus::dispatch`]
//! returns; game logic reacting to one event can rely on every earlier
//! handler having already seen it.

use std::fmt;

/// Handle returned by [`EventBus::on`], used to unregister.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

type Handler<E> = Box<dyn FnMut(&E) + Send>;

/// Synchronous, ordered event dispatcher.
pub struct EventBus<E> {
    handlers: Vec<(ListenerId, Handler<E>)>,
    next_id: u64,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.handlers.len())
            .finish()
    }
}

impl<E> EventBus<E> {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            next_id: 0,
        }
    }

    /// Register a handler. It runs after every handler registered before it.
    pub fn on<F>(&mut self, handler: F) -> ListenerId
    where
        F: FnMut(&E) + Send + 'static,
    {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.handlers.push((id, Box::new(handler)));
        id
    }

    /// Unregister a handler. Returns false if it was not registered.
    pub fn off(&mut self, id: ListenerId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(listener, _)| *listener != id);
        self.handlers.len() != before
    }

    /// Deliver `event` to every handler, in registration order.
    pub fn dispatch(&mut self, event: &E) {
        for (_, handler) in self.handlers.iter_mut() {
            handler(event);
        }
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Drop every handler.
    pub fn clear(&mut self) {
        self.handlers.clear();
    }
}
