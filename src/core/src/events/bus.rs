//! Synchronous publish/subscribe registry.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// An event that can be published on an [`EventBus`].
pub trait BusEvent {
    /// Subscription key for this event.
    fn name(&self) -> &'static str;
}

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: u64,
    handlers: HashMap<&'static str, Vec<(u64, Handler<E>)>>,
}

struct Shared<E> {
    registry: RwLock<Registry<E>>,
    panics: AtomicU64,
}

/// Registry of handlers keyed by event name.
///
/// Handlers run synchronously, in subscription order, on the emitting thread.
/// The handler list is snapshotted before delivery, so a handler may subscribe,
/// unsubscribe or emit without deadlocking. A panicking handler is logged and
/// skipped; later handlers still see the event.
pub struct EventBus<E> {
    shared: Arc<Shared<E>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E> Default for EventBus<E>
where
    E: BusEvent + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.shared.registry.read();
        f.debug_struct("EventBus")
            .field("events", &registry.handlers.keys().collect::<Vec<_>>())
            .field("panics", &self.shared.panics.load(Ordering::Relaxed))
            .finish()
    }
}

impl<E> EventBus<E>
where
    E: BusEvent + 'static,
{
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: RwLock::new(Registry {
                    next_id: 0,
                    handlers: HashMap::new(),
                }),
                panics: AtomicU64::new(0),
            }),
        }
    }

    /// Register `handler` for events named `name`.
    pub fn subscribe<F>(&self, name: &'static str, handler: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = self.shared.registry.write();
            let id = registry.next_id;
            registry.next_id += 1;
            registry
                .handlers
                .entry(name)
                .or_default()
                .push((id, Arc::new(handler)));
            id
        };

        let shared: Weak<Shared<E>> = Arc::downgrade(&self.shared);
        Subscription::new(move || {
            if let Some(shared) = shared.upgrade() {
                let mut registry = shared.registry.write();
                if let Some(handlers) = registry.handlers.get_mut(name) {
                    handlers.retain(|(handler_id, _)| *handler_id != id);
                    if handlers.is_empty() {
                        registry.handlers.remove(name);
                    }
                }
            }
        })
    }

    /// Deliver `event` to every handler registered under its name.
    ///
    /// Returns the number of handlers that completed without panicking.
    pub fn emit(&self, event: &E) -> usize {
        let name = event.name();
        let handlers: Vec<Handler<E>> = {
            let registry = self.shared.registry.read();
            match registry.handlers.get(name) {
                Some(handlers) => handlers.iter().map(|(_, h)| Arc::clone(h)).collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => delivered += 1,
                Err(payload) => {
                    self.shared.panics.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("spool_event_handler_panics_total", "event" => name)
                        .increment(1);
                    tracing::error!(
                        event_name = name,
                        panic = %panic_message(payload.as_ref()),
                        "Event handler panicked"
                    );
                }
            }
        }
        delivered
    }

    /// Number of handlers registered under `name`.
    pub fn handler_count(&self, name: &str) -> usize {
        self.shared
            .registry
            .read()
            .handlers
            .get(name)
            .map_or(0, Vec::len)
    }

    /// Number of handler panics caught so far.
    pub fn panic_count(&self) -> u64 {
        self.shared.panics.load(Ordering::Relaxed)
    }
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Removes a handler when [`Subscription::unsubscribe`] is called.
///
/// Dropping a subscription without calling `unsubscribe` leaves the handler
/// registered.
#[must_use = "dropping a Subscription keeps the handler registered; call unsubscribe() to remove it"]
pub struct Subscription {
    unsubscribe: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub(crate) fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unsubscribe: Mutex::new(Some(Box::new(unsubscribe))),
        }
    }

    /// Combine several subscriptions into one.
    pub(crate) fn merge(subscriptions: Vec<Subscription>) -> Self {
        Self::new(move || {
            for subscription in subscriptions {
                subscription.unsubscribe();
            }
        })
    }

    /// Remove the handler. Calling this more than once is a no-op.
    pub fn unsubscribe(&self) {
        if let Some(unsubscribe) = self.unsubscribe.lock().take() {
            unsubscribe();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.lock().is_some())
            .finish()
    }
}
