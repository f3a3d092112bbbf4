// Event Bus - synchronous in-process notifications
//
// Listeners are plain callbacks keyed by event name. Delivery happens inline
// on the emitting call, in registration order. A failing listener is logged
// and skipped; it never reaches the emitter or the other listeners.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

use crate::domain::events::{EventKind, OverseerEvent};

/// Error a listener may return to signal it could not handle an event
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;
pub type ListenerResult = Result<(), ListenerError>;

type Listener = Box<dyn Fn(&OverseerEvent) -> ListenerResult + Send + Sync>;

/// Handle returned by [`EventBus::on`], used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken {
    kind: EventKind,
    id: u64,
}

impl ListenerToken {
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

#[derive(Default)]
pub struct EventBus {
    listeners: HashMap<EventKind, Vec<(u64, Listener)>>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one event name
    pub fn on<F>(&mut self, kind: EventKind, listener: F) -> ListenerToken
    where
        F: Fn(&OverseerEvent) -> ListenerResult + Send + Sync + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners
            .entry(kind)
            .or_default()
            .push((id, Box::new(listener)));

        debug!(event = %kind, listener = id, "Listener registered");
        ListenerToken { kind, id }
    }

    /// Unregister; returns false if the token was already removed
    pub fn off(&mut self, token: ListenerToken) -> bool {
        let Some(listeners) = self.listeners.get_mut(&token.kind) else {
            return false;
        };

        let before = listeners.len();
        listeners.retain(|(id, _)| *id != token.id);
        before != listeners.len()
    }

    /// Deliver an event to every listener registered for its name
    ///
    /// Returns how many listeners handled it without failing.
    pub fn emit(&self, event: &OverseerEvent) -> usize {
        let kind = event.kind();
        let Some(listeners) = self.listeners.get(&kind) else {
            debug!(event = %kind, "No listeners for event");
            return 0;
        };

        let mut delivered = 0;
        for (id, listener) in listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => {
                    warn!(event = %kind, listener = *id, error = %err, "Listener error");
                }
                Err(_) => {
                    warn!(event = %kind, listener = *id, "Listener panicked");
                }
            }
        }
        delivered
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.get(&kind).map_or(0, Vec::len)
    }
}
