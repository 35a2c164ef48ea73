#![forbid(unsafe_code)]

//! Multicast change notification channel.
//!
//! [`Event<A>`] is the notification point underlying `Property::changed`
//! and the `Collection` delta events. Handles are cheap clones sharing
//! one listener table.
//!
//! # Dispatch semantics
//!
//! `emit` dispatches to a snapshot of the listeners registered at emit
//! start, in registration order, re-checking registration before each
//! call. Consequences:
//!
//! 1. A listener added during dispatch is not invoked for that emit.
//! 2. A listener removed during dispatch whose turn has not yet come is
//!    skipped; one already past its turn is unaffected.
//! 3. No internal borrow is held while a callback runs, so callbacks
//!    may register, deregister, or emit re-entrantly.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::subscription::{ListenerId, Registry, Subscription};

type Callback<A> = dyn Fn(&A);

/// A multicast notification channel carrying `&A` payloads.
pub struct Event<A> {
    registry: Rc<RefCell<Registry<Callback<A>>>>,
}

impl<A> Clone for Event<A> {
    fn clone(&self) -> Self {
        Self {
            registry: Rc::clone(&self.registry),
        }
    }
}

impl<A: 'static> Default for Event<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: 'static> Event<A> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Rc::new(RefCell::new(Registry::new())),
        }
    }

    /// Register a listener, returning its RAII guard.
    pub fn on(&self, listener: impl Fn(&A) + 'static) -> Subscription {
        let listener: Rc<Callback<A>> = Rc::new(listener);
        let id = self.registry.borrow_mut().insert(listener);
        let weak = Rc::downgrade(&self.registry);
        Subscription::new(id, move || {
            Self::remove_from(&weak, id);
        })
    }

    /// Deregister by listener id. Idempotent: unknown and
    /// already-removed ids are a no-op.
    pub fn off(&self, id: ListenerId) {
        self.registry.borrow_mut().remove(id);
    }

    /// Dispatch a payload to every listener registered at call time.
    pub fn emit(&self, payload: &A) {
        let snapshot = self.registry.borrow().snapshot();
        if snapshot.is_empty() {
            return;
        }
        trace!(listeners = snapshot.len(), "event dispatch");
        for (id, listener) in snapshot {
            // Honor removals that happened earlier in this dispatch.
            if self.registry.borrow().contains(id) {
                listener(payload);
            }
        }
    }

    /// Number of currently registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.registry.borrow().len()
    }

    /// Weak handle for listeners that must deregister themselves.
    ///
    /// A listener stored in the channel must not capture a strong
    /// `Event` handle back to it (that would be a reference cycle), so
    /// self-removal goes through this.
    pub(crate) fn downgrade(&self) -> WeakEvent<A> {
        WeakEvent {
            registry: Rc::downgrade(&self.registry),
        }
    }

    fn remove_from(weak: &Weak<RefCell<Registry<Callback<A>>>>, id: ListenerId) {
        if let Some(registry) = weak.upgrade() {
            registry.borrow_mut().remove(id);
        }
    }
}

/// Non-owning handle to an [`Event`]'s listener table.
pub(crate) struct WeakEvent<A> {
    registry: Weak<RefCell<Registry<Callback<A>>>>,
}

impl<A: 'static> WeakEvent<A> {
    /// Deregister by id if the channel is still alive. Idempotent.
    pub(crate) fn off(&self, id: ListenerId) {
        Event::remove_from(&self.registry, id);
    }
}

impl<A: 'static> std::fmt::Debug for Event<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
