#![forbid(unsafe_code)]

//! Listener registration bookkeeping shared by every observable.
//!
//! [`Registry<F>`] is the ordered listener table behind an
//! [`Event`](crate::event::Event) channel; [`Subscription`] is the RAII
//! guard handed back to subscribers.
//!
//! # Invariants
//!
//! 1. Iteration order equals registration order.
//! 2. `remove` is idempotent: removing an unknown or already-removed id
//!    is a no-op returning `false`.
//! 3. Ids are never reused within one registry.
//! 4. A dropped [`Subscription`] deregisters its listener before the
//!    next dispatch cycle; a forgotten one never does.

use std::rc::Rc;

/// Stable identity of a registered listener within one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Raw id value, mainly for diagnostics.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Ordered listener table with stable ids and idempotent removal.
pub(crate) struct Registry<F: ?Sized> {
    next_id: u64,
    entries: Vec<(ListenerId, Rc<F>)>,
}

impl<F: ?Sized> Registry<F> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }

    /// Register a listener, returning its fresh id.
    pub(crate) fn insert(&mut self, listener: Rc<F>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, listener));
        id
    }

    /// Remove by id. Returns whether anything was removed.
    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    pub(crate) fn contains(&self, id: ListenerId) -> bool {
        self.entries.iter().any(|(entry_id, _)| *entry_id == id)
    }

    /// Clone out `(id, listener)` pairs in registration order.
    ///
    /// Dispatch iterates over this snapshot so callbacks can mutate the
    /// registry freely while the channel is not borrowed.
    pub(crate) fn snapshot(&self) -> Vec<(ListenerId, Rc<F>)> {
        self.entries
            .iter()
            .map(|(id, listener)| (*id, Rc::clone(listener)))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<F: ?Sized> Default for Registry<F> {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for a live listener registration.
///
/// Dropping the guard deregisters the listener. The guard holds only a
/// weak reference to its channel, so keeping a `Subscription` alive
/// never keeps the observed source alive.
#[must_use = "dropping a Subscription immediately deregisters the listener"]
pub struct Subscription {
    id: Option<ListenerId>,
    canceler: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub(crate) fn new(id: ListenerId, canceler: impl FnOnce() + 'static) -> Self {
        Self {
            id: Some(id),
            canceler: Some(Box::new(canceler)),
        }
    }

    /// A guard that is already spent (e.g. a `once` watch that fired at
    /// registration time and never registered a listener).
    pub(crate) fn spent() -> Self {
        Self {
            id: None,
            canceler: None,
        }
    }

    /// Id of the listener this guard controls, if one was registered.
    #[must_use]
    pub fn id(&self) -> Option<ListenerId> {
        self.id
    }

    /// Deregister now. Equivalent to dropping the guard; idempotent.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.canceler.take() {
            cancel();
        }
    }

    /// Relinquish the guard without deregistering.
    ///
    /// The listener then stays registered for the lifetime of its
    /// channel (or until removed via [`Event::off`](crate::event::Event::off)).
    pub fn forget(mut self) {
        self.canceler = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.canceler.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("live", &self.canceler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Cb = dyn Fn();

    #[test]
    fn ids_are_unique_and_ordered() {
        let mut reg: Registry<Cb> = Registry::new();
        let a = reg.insert(Rc::new(|| {}));
        let b = reg.insert(Rc::new(|| {}));
        assert_ne!(a, b);
        let snap = reg.snapshot();
        assert_eq!(snap[0].0, a);
        assert_eq!(snap[1].0, b);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut reg: Registry<Cb> = Registry::new();
        let id = reg.insert(Rc::new(|| {}));
        assert!(reg.remove(id));
        assert!(!reg.remove(id));
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn id_not_reused_after_removal() {
        let mut reg: Registry<Cb> = Registry::new();
        let a = reg.insert(Rc::new(|| {}));
        reg.remove(a);
        let b = reg.insert(Rc::new(|| {}));
        assert_ne!(a, b);
    }

    #[test]
    fn contains_tracks_registration() {
        let mut reg: Registry<Cb> = Registry::new();
        let id = reg.insert(Rc::new(|| {}));
        assert!(reg.contains(id));
        reg.remove(id);
        assert!(!reg.contains(id));
    }
}
