//! Lifecycle notifications.
//!
//! Observers register a handler per [`EventKind`] and get a [`Subscription`]
//! back; calling `unsubscribe` removes the handler. Handlers run on the task
//! that emitted the event, outside of any internal lock, so a handler may
//! itself subscribe, unsubscribe or call back into the connector.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use reqwest::Method;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Before,
    Success,
    Error,
    After,
    SessionExpired,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Before => "before",
            EventKind::Success => "success",
            EventKind::Error => "error",
            EventKind::After => "after",
            EventKind::SessionExpired => "session-expired",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a request was headed; attached to every request event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    pub method: Method,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Before(RequestTarget),
    Success {
        target: RequestTarget,
        status: u16,
    },
    /// A failed request, or a failure in a background task (renewal, revoke).
    /// `target` is absent for failures that never reached the transport.
    Error {
        target: Option<RequestTarget>,
        status: Option<u16>,
        message: String,
    },
    After(RequestTarget),
    SessionExpired,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Before(_) => EventKind::Before,
            Event::Success { .. } => EventKind::Success,
            Event::Error { .. } => EventKind::Error,
            Event::After(_) => EventKind::After,
            Event::SessionExpired => EventKind::SessionExpired,
        }
    }
}

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<EventKind, Vec<(u64, Handler)>>,
}

#[derive(Clone, Default)]
pub struct Notifier {
    registry: Arc<Mutex<Registry>>,
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry();
        let counts: HashMap<&str, usize> = registry
            .handlers
            .iter()
            .map(|(kind, hs)| (kind.as_str(), hs.len()))
            .collect();
        f.debug_struct("Notifier").field("handlers", &counts).finish()
    }
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let mut registry = self.registry();
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            registry: Arc::downgrade(&self.registry),
            kind,
            id,
        }
    }

    /// Deliver `event` to every handler registered for its kind, in
    /// registration order.
    pub fn emit(&self, event: &Event) {
        let handlers: Vec<Handler> = self
            .registry()
            .handlers
            .get(&event.kind())
            .map(|hs| hs.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();
        for handler in handlers {
            handler(event);
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.registry().handlers.get(&kind).map_or(0, Vec::len)
    }
}

/// Handle returned by [`Notifier::subscribe`]. Dropping it keeps the
/// handler registered; call [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    registry: std::sync::Weak<Mutex<Registry>>,
    kind: EventKind,
    id: u64,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn unsubscribe(self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(handlers) = registry.handlers.get_mut(&self.kind) {
            handlers.retain(|(id, _)| *id != self.id);
        }
    }
}
