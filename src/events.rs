//! Property events and their suppression.
//!
//! Property stores publish a [`PropertyEvent`] whenever a stored value
//! changes. Internal bookkeeping writes (mode switches, startup
//! normalization) run inside a [`PropertyChangedEventDisabler`] so those
//! writes do not cascade into change notifications.
//!
//! The disabler behaves like a switcher: entering pushes a state, dropping
//! pops it, and the innermost state decides whether change events are
//! suppressed. The stack is global to the executing thread, so a guard held
//! by a writer never leaks its state into concurrent callers.

use parking_lot::RwLock;
use std::cell::RefCell;
use std::sync::Arc;

thread_local! {
    static DISABLER_STATES: RefCell<Vec<bool>> = const { RefCell::new(Vec::new()) };
}

/// Returns true when property-changed events are currently suppressed.
pub fn property_events_suppressed() -> bool {
    DISABLER_STATES.with(|states| states.borrow().last().copied().unwrap_or(false))
}

/// Scoped guard that engages (or explicitly releases) property-changed
/// event suppression until it is dropped.
#[must_use = "suppression ends as soon as the guard is dropped"]
pub struct PropertyChangedEventDisabler {
    // Not Send: the guard must be dropped on the thread that pushed it.
    _not_send: std::marker::PhantomData<*const ()>,
}

impl PropertyChangedEventDisabler {
    /// `state = true` suppresses events, `false` re-enables them for the scope.
    pub fn new(state: bool) -> Self {
        DISABLER_STATES.with(|states| states.borrow_mut().push(state));
        Self {
            _not_send: std::marker::PhantomData,
        }
    }
}

impl Drop for PropertyChangedEventDisabler {
    fn drop(&mut self) {
        DISABLER_STATES.with(|states| {
            states.borrow_mut().pop();
        });
    }
}

/// Notification published by property stores
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyEvent {
    /// A value was written
    Changed { key: String, value: String },
    /// A value was appended to a list property
    Added { key: String, value: String },
    /// Every key under a prefix was removed
    Removed { prefix: String },
}

impl PropertyEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PropertyEvent::Changed { .. } => "property:changed",
            PropertyEvent::Added { .. } => "indexing:propertyadd",
            PropertyEvent::Removed { .. } => "property:removed",
        }
    }
}

type Handler = Box<dyn Fn(&PropertyEvent) + Send + Sync>;

/// Minimal subscriber list for property events
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<Vec<Handler>>,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&PropertyEvent) + Send + Sync + 'static,
    {
        self.handlers.write().push(Box::new(handler));
    }

    /// Deliver an event unconditionally.
    pub fn raise(&self, event: &PropertyEvent) {
        log::trace!("raising {} event", event.name());
        for handler in self.handlers.read().iter() {
            handler(event);
        }
    }

    /// Deliver a change notification unless suppression is engaged.
    /// Returns whether the event was delivered.
    pub fn raise_property_changed(&self, event: &PropertyEvent) -> bool {
        if property_events_suppressed() {
            return false;
        }
        self.raise(event);
        true
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handlers.read().len())
            .finish()
    }
}
