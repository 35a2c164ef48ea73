#![forbid(unsafe_code)]

//! Observable single-value holder with change notification.
//!
//! # Design
//!
//! [`Property<T>`] wraps a current value, the reason for its last
//! change, and a `changed` [`Event`] in shared, reference-counted
//! storage. Clones are handles to the **same** state. Derivation
//! (`map`, `fork`) is eager: the derived property recomputes and
//! re-notifies synchronously inside the source's dispatch, so a derived
//! value is never stale once the source commit returns.
//!
//! # Invariants
//!
//! 1. `get()` returns the last committed value, synchronously, always.
//! 2. Listeners run in registration order, exactly once per committed
//!    change, with the new value and reason.
//! 3. Committing a value equal to the current one is an accepted no-op:
//!    no notification, no reason update.
//! 4. A rejected commit leaves value and reason untouched.
//! 5. The source side of a derivation holds only weak references to the
//!    derived node; dropping the last derived handle severs the edge.
//!
//! # Failure Modes
//!
//! - **Producer rejection**: `set` returns the rejection to the caller;
//!   state is unchanged (invariant 4).
//! - **Source dropped**: a derived property goes inert at its last
//!   value; it never errors and never becomes stale *while the source
//!   is alive*.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::event::Event;
use crate::reason::Reason;
use crate::subscription::Subscription;

/// Payload delivered to `changed` listeners: the committed value plus
/// the opaque reason it was committed with.
#[derive(Clone, Debug)]
pub struct Change<T> {
    pub value: T,
    pub reason: Reason,
}

enum Producer<T> {
    /// Plain read/write storage.
    None,
    /// Commits route through a synchronous policy function.
    Sync(Box<dyn Fn(T, &Reason) -> Result<T>>),
    /// Commits route through a future-returning policy function and
    /// land via [`Property::set_async`].
    Async(Box<dyn Fn(T, Reason) -> LocalBoxFuture<'static, Result<T>>>),
}

struct PropertyInner<T> {
    value: RefCell<T>,
    reason: RefCell<Reason>,
    changed: Event<Change<T>>,
    failed: Event<Error>,
    producer: Producer<T>,
    writable: bool,
    /// Guards on upstream sources; dropping the property drops these,
    /// which deregisters it from everything it derives from.
    upstream: RefCell<Vec<Subscription>>,
    /// Strong handles to upstream sources so a derivation chain stays
    /// live while its tail is held. The reverse direction (source to
    /// derived) is weak, so there is no cycle.
    sources: RefCell<Vec<Rc<dyn std::any::Any>>>,
}

/// Observable holder of a single current value.
pub struct Property<T> {
    inner: Rc<PropertyInner<T>>,
}

impl<T> Clone for Property<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + 'static> Property<T> {
    /// A read/write property with no commit policy.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::build(value, Producer::None, true)
    }

    /// A property that rejects every `set`. Derived properties are
    /// built on this.
    #[must_use]
    pub fn read_only(value: T) -> Self {
        Self::build(value, Producer::None, false)
    }

    /// A read/write property whose commits route through `producer`:
    /// the committed value is whatever the producer returns, and a
    /// producer error rejects the commit.
    #[must_use]
    pub fn with_producer(value: T, producer: impl Fn(T, &Reason) -> Result<T> + 'static) -> Self {
        Self::build(value, Producer::Sync(Box::new(producer)), true)
    }

    /// Like [`with_producer`](Self::with_producer) but the producer
    /// resolves asynchronously; commits go through
    /// [`set_async`](Self::set_async).
    #[must_use]
    pub fn with_async_producer(
        value: T,
        producer: impl Fn(T, Reason) -> LocalBoxFuture<'static, Result<T>> + 'static,
    ) -> Self {
        Self::build(value, Producer::Async(Box::new(producer)), true)
    }

    fn build(value: T, producer: Producer<T>, writable: bool) -> Self {
        Self {
            inner: Rc::new(PropertyInner {
                value: RefCell::new(value),
                reason: RefCell::new(Reason::none()),
                changed: Event::new(),
                failed: Event::new(),
                producer,
                writable,
                upstream: RefCell::new(Vec::new()),
                sources: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Current value, synchronous, never fails.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Access the current value by reference without cloning.
    ///
    /// # Panics
    ///
    /// Panics if the closure commits to this same property (re-entrant
    /// borrow).
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// Reason attached to the last committed change.
    #[must_use]
    pub fn reason(&self) -> Reason {
        self.inner.reason.borrow().clone()
    }

    /// The `changed` notification channel.
    #[must_use]
    pub fn changed(&self) -> Event<Change<T>> {
        self.inner.changed.clone()
    }

    /// Channel reporting derived-recompute failures (e.g. a failing
    /// `reduce` aggregate). Never fires for plain read/write properties.
    #[must_use]
    pub fn failed(&self) -> Event<Error> {
        self.inner.failed.clone()
    }

    /// Register a `changed` listener. Shorthand for `changed().on(f)`.
    pub fn subscribe(&self, f: impl Fn(&Change<T>) + 'static) -> Subscription {
        self.inner.changed.on(f)
    }

    /// Commit a new value with no reason.
    pub fn set(&self, value: T) -> Result<()> {
        self.set_with_reason(value, Reason::none())
    }

    /// Attempt to commit a new value.
    ///
    /// Routes through the producer if one is installed; on rejection
    /// the current value and reason are left unchanged and the error is
    /// returned. On success all `changed` listeners run synchronously,
    /// in registration order, exactly once.
    pub fn set_with_reason(&self, value: T, reason: Reason) -> Result<()> {
        if !self.inner.writable {
            debug!("set rejected: read-only property");
            return Err(Error::rejected("read-only property"));
        }
        match &self.inner.producer {
            Producer::None => {
                self.commit(value, reason);
                Ok(())
            }
            Producer::Sync(producer) => {
                let committed = producer(value, &reason)?;
                self.commit(committed, reason);
                Ok(())
            }
            Producer::Async(_) => Err(Error::rejected(
                "property has an async producer; use set_async",
            )),
        }
    }

    /// Commit through the async producer, resolving on the caller's
    /// executor. Without an async producer this wraps the synchronous
    /// path in a ready future.
    pub fn set_async(&self, value: T, reason: Reason) -> LocalBoxFuture<'static, Result<()>> {
        if !self.inner.writable {
            return futures::future::ready(Err(Error::rejected("read-only property"))).boxed_local();
        }
        match &self.inner.producer {
            Producer::Async(producer) => {
                let pending = producer(value, reason.clone());
                let weak = Rc::downgrade(&self.inner);
                async move {
                    let committed = pending.await?;
                    if let Some(inner) = weak.upgrade() {
                        Property { inner }.commit(committed, reason);
                    }
                    Ok(())
                }
                .boxed_local()
            }
            _ => futures::future::ready(self.set_with_reason(value, reason)).boxed_local(),
        }
    }

    /// Read-only derived property holding `f(source value)`, recomputed
    /// synchronously on every source change.
    #[must_use]
    pub fn map<U: Clone + PartialEq + 'static>(
        &self,
        f: impl Fn(&T) -> U + 'static,
    ) -> Property<U> {
        let derived = Property::read_only(self.with(|v| f(v)));
        let weak = Rc::downgrade(&derived.inner);
        let sub = self.inner.changed.on(move |change: &Change<T>| {
            if let Some(inner) = weak.upgrade() {
                Property { inner }.commit(f(&change.value), change.reason.clone());
            }
        });
        derived.retain_upstream(sub);
        derived.retain_source(Rc::clone(&self.inner) as Rc<dyn std::any::Any>);
        derived
    }

    /// Read/write derived property that mirrors this source but routes
    /// local `set` calls through `set_fn` (custom commit policy, so the
    /// fork may diverge from the source between source changes).
    #[must_use]
    pub fn fork(&self, set_fn: impl Fn(T, &Reason) -> Result<T> + 'static) -> Property<T> {
        let derived = Property::with_producer(self.get(), set_fn);
        let weak = Rc::downgrade(&derived.inner);
        let sub = self.inner.changed.on(move |change: &Change<T>| {
            if let Some(inner) = weak.upgrade() {
                Property { inner }.commit(change.value.clone(), change.reason.clone());
            }
        });
        derived.retain_upstream(sub);
        derived.retain_source(Rc::clone(&self.inner) as Rc<dyn std::any::Any>);
        derived
    }

    /// Run `f` at most once, the first time the value satisfies `pred`.
    ///
    /// Fires immediately (and registers nothing) if already satisfied;
    /// otherwise the watch deregisters itself after firing. Dropping
    /// the returned guard cancels an unfired watch; use
    /// [`Subscription::forget`] for fire-and-forget.
    pub fn once(
        &self,
        pred: impl Fn(&T) -> bool + 'static,
        f: impl Fn(&T) + 'static,
    ) -> Subscription {
        if self.with(|v| pred(v)) {
            self.with(|v| f(v));
            return Subscription::spent();
        }
        let fired = Rc::new(Cell::new(false));
        let slot = Rc::new(Cell::new(None));
        let weak_channel = self.inner.changed.downgrade();

        let fired_in = Rc::clone(&fired);
        let slot_in = Rc::clone(&slot);
        let sub = self.inner.changed.on(move |change: &Change<T>| {
            if fired_in.get() || !pred(&change.value) {
                return;
            }
            fired_in.set(true);
            f(&change.value);
            if let Some(id) = slot_in.get() {
                weak_channel.off(id);
            }
        });
        slot.set(sub.id());
        sub
    }

    /// Run `f` on every transition into the state where `pred` holds,
    /// including registration time if already satisfied. Re-arms after
    /// a matching → non-matching → matching cycle.
    pub fn when(
        &self,
        pred: impl Fn(&T) -> bool + 'static,
        f: impl Fn(&T) + 'static,
    ) -> Subscription {
        let armed = Rc::new(Cell::new(true));
        if self.with(|v| pred(v)) {
            self.with(|v| f(v));
            armed.set(false);
        }
        self.inner.changed.on(move |change: &Change<T>| {
            if pred(&change.value) {
                if armed.get() {
                    armed.set(false);
                    f(&change.value);
                }
            } else {
                armed.set(true);
            }
        })
    }

    /// [`once`](Self::once) matching by value equality.
    pub fn once_value(&self, value: T, f: impl Fn(&T) + 'static) -> Subscription {
        self.once(move |v| *v == value, f)
    }

    /// [`when`](Self::when) matching by value equality.
    pub fn when_value(&self, value: T, f: impl Fn(&T) + 'static) -> Subscription {
        self.when(move |v| *v == value, f)
    }

    /// Commit unconditionally (internal path used by derivations and
    /// collection bookkeeping). Equal values are a silent no-op.
    pub(crate) fn commit(&self, value: T, reason: Reason) {
        {
            let mut current = self.inner.value.borrow_mut();
            if *current == value {
                return;
            }
            *current = value.clone();
            *self.inner.reason.borrow_mut() = reason.clone();
        }
        trace!("property commit");
        self.inner.changed.emit(&Change { value, reason });
    }

    /// Report a derived-recompute failure on the `failed` channel.
    pub(crate) fn fail(&self, error: Error) {
        debug!(%error, "derived recompute failed");
        self.inner.failed.emit(&error);
    }

    /// Keep an upstream subscription alive for this property's lifetime.
    pub(crate) fn retain_upstream(&self, sub: Subscription) {
        self.inner.upstream.borrow_mut().push(sub);
    }

    /// Keep an upstream source alive for this property's lifetime.
    pub(crate) fn retain_source(&self, source: Rc<dyn std::any::Any>) {
        self.inner.sources.borrow_mut().push(source);
    }

    /// Non-owning handle, used by source-side listeners so a source
    /// never keeps its derived nodes alive.
    pub(crate) fn downgrade(&self) -> WeakProperty<T> {
        WeakProperty {
            inner: Rc::downgrade(&self.inner),
        }
    }
}

/// Non-owning handle to a [`Property`].
pub(crate) struct WeakProperty<T> {
    inner: std::rc::Weak<PropertyInner<T>>,
}

impl<T> WeakProperty<T> {
    pub(crate) fn upgrade(&self) -> Option<Property<T>> {
        self.inner.upgrade().map(|inner| Property { inner })
    }
}

impl<T: std::fmt::Debug + 'static> std::fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Property")
            .field("value", &*self.inner.value.borrow())
            .field("writable", &self.inner.writable)
            .field("listeners", &self.inner.changed.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn get_returns_last_committed_value() {
        let p = Property::new(1);
        assert_eq!(p.get(), 1);
        p.set(2).unwrap();
        assert_eq!(p.get(), 2);
    }

    #[test]
    fn listeners_fire_once_per_commit_in_order() {
        let p = Property::new(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        let l1 = Rc::clone(&log);
        let s1 = p.subscribe(move |c| l1.borrow_mut().push((1, c.value)));
        let l2 = Rc::clone(&log);
        let s2 = p.subscribe(move |c| l2.borrow_mut().push((2, c.value)));

        p.set(5).unwrap();
        assert_eq!(*log.borrow(), vec![(1, 5), (2, 5)]);
        drop((s1, s2));
    }

    #[test]
    fn debug_reports_value_and_writability() {
        let p = Property::read_only(String::from("fixed"));
        assert_eq!(
            format!("{p:?}"),
            "Property { value: \"fixed\", writable: false, listeners: 0 }"
        );
    }

    #[test]
    fn equal_set_is_silent_noop() {
        let p = Property::new(7);
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let sub = p.subscribe(move |_| h.set(h.get() + 1));

        p.set(7).unwrap();
        assert_eq!(hits.get(), 0);
        assert_eq!(p.get(), 7);
        drop(sub);
    }

    #[test]
    fn reason_travels_with_change() {
        let p = Property::new(String::from("a"));
        let seen = Rc::new(RefCell::new(None));
        let s = Rc::clone(&seen);
        let sub = p.subscribe(move |c| {
            *s.borrow_mut() = c.reason.downcast_ref::<&str>().copied();
        });

        p.set_with_reason("b".into(), Reason::new("sync")).unwrap();
        assert_eq!(*seen.borrow(), Some("sync"));
        assert_eq!(p.reason().downcast_ref::<&str>(), Some(&"sync"));
        drop(sub);
    }

    #[test]
    fn read_only_rejects_set() {
        let p = Property::read_only(3);
        let err = p.set(4).unwrap_err();
        assert!(matches!(err, Error::RejectedCommit(_)));
        assert_eq!(p.get(), 3);
    }

    #[test]
    fn producer_rejection_leaves_state_unchanged() {
        let p = Property::with_producer(10, |v: i32, _| {
            if v < 0 {
                Err(Error::rejected("negative"))
            } else {
                Ok(v)
            }
        });
        assert!(p.set(-1).is_err());
        assert_eq!(p.get(), 10);
        assert!(p.reason().is_none());

        p.set(20).unwrap();
        assert_eq!(p.get(), 20);
    }

    #[test]
    fn producer_may_rewrite_committed_value() {
        let clamped = Property::with_producer(0, |v: i32, _| Ok(v.clamp(0, 100)));
        clamped.set(250).unwrap();
        assert_eq!(clamped.get(), 100);
    }

    #[test]
    fn async_producer_commits_on_resolution() {
        let p = Property::with_async_producer(0, |v: i32, _| {
            futures::future::ready(if v == 13 {
                Err(Error::rejected("unlucky"))
            } else {
                Ok(v * 2)
            })
            .boxed_local()
        });

        block_on(p.set_async(21, Reason::none())).unwrap();
        assert_eq!(p.get(), 42);

        let err = block_on(p.set_async(13, Reason::none())).unwrap_err();
        assert!(matches!(err, Error::RejectedCommit(_)));
        assert_eq!(p.get(), 42);

        // Plain sync set is refused so commits cannot bypass the producer.
        assert!(p.set(1).is_err());
    }

    #[test]
    fn map_recomputes_synchronously() {
        let p = Property::new(0);
        let d = p.map(|v| v * 2);
        assert_eq!(d.get(), 0);

        let observed = Rc::new(Cell::new(0));
        let o = Rc::clone(&observed);
        let sub = d.subscribe(move |c| o.set(c.value));

        p.set(5).unwrap();
        assert_eq!(d.get(), 10);
        assert_eq!(observed.get(), 10);

        // Derived property never accepts set.
        assert!(d.set(99).is_err());
        drop(sub);
    }

    #[test]
    fn map_holds_immediately_after_source_change() {
        let p = Property::new(1);
        let d = p.map(|v| v + 100);

        // The derived listener observes its own value already updated.
        let d_probe = d.clone();
        let consistent = Rc::new(Cell::new(true));
        let c = Rc::clone(&consistent);
        let sub = p.subscribe(move |chg| {
            c.set(c.get() && d_probe.get() == chg.value + 100);
        });

        // Derived wiring registered before this listener, so the
        // derived value is committed by the time it runs.
        p.set(9).unwrap();
        assert!(consistent.get());
        drop(sub);
    }

    #[test]
    fn dropping_derived_severs_the_edge() {
        let p = Property::new(0);
        let d = p.map(|v| *v);
        assert_eq!(p.changed().listener_count(), 1);
        drop(d);
        assert_eq!(p.changed().listener_count(), 0);
        p.set(1).unwrap();
    }

    #[test]
    fn derived_keeps_value_after_source_handle_drops() {
        let d;
        {
            let p = Property::new(5);
            d = p.map(|v| v * 3);
        }
        assert_eq!(d.get(), 15);
    }

    #[test]
    fn chained_derivation_survives_temporary_intermediate() {
        let p = Property::new(2);
        // The intermediate map node is not bound to a name; the tail
        // of the chain must keep it alive.
        let tail = p.map(|v| v * 2).map(|v| v + 1);
        assert_eq!(tail.get(), 5);
        p.set(10).unwrap();
        assert_eq!(tail.get(), 21);
    }

    #[test]
    fn fork_mirrors_source_and_diverges_locally() {
        let source = Property::new(10);
        let fork = source.fork(|v: i32, _| Ok(v + 1000)); // local commit policy

        assert_eq!(fork.get(), 10);

        // Local set goes through the policy.
        fork.set(1).unwrap();
        assert_eq!(fork.get(), 1001);
        assert_eq!(source.get(), 10, "source unaffected by fork set");

        // Source changes overwrite the divergence.
        source.set(20).unwrap();
        assert_eq!(fork.get(), 20);
    }

    #[test]
    fn fork_policy_rejection_keeps_local_state() {
        let source = Property::new(0);
        let fork = source.fork(|_, _| Err::<i32, _>(Error::rejected("no local writes")));
        assert!(fork.set(5).is_err());
        assert_eq!(fork.get(), 0);
    }

    #[test]
    fn once_fires_immediately_when_already_matching() {
        let p = Property::new(3);
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let sub = p.once(|v| *v == 3, move |_| h.set(h.get() + 1));
        assert_eq!(hits.get(), 1);
        assert!(sub.id().is_none(), "no listener registered");
    }

    #[test]
    fn once_fires_at_most_once_and_deregisters() {
        let p = Property::new(0);
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        p.once_value(2, move |_| h.set(h.get() + 1)).forget();

        p.set(1).unwrap();
        assert_eq!(hits.get(), 0);
        p.set(2).unwrap();
        assert_eq!(hits.get(), 1);
        assert_eq!(p.changed().listener_count(), 0, "auto-deregistered");

        p.set(0).unwrap();
        p.set(2).unwrap();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn once_guard_drop_cancels_unfired_watch() {
        let p = Property::new(0);
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let sub = p.once_value(1, move |_| h.set(h.get() + 1));
        drop(sub);
        p.set(1).unwrap();
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn when_rearms_on_each_transition() {
        let p = Property::new(0);
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        p.when_value(1, move |_| h.set(h.get() + 1)).forget();

        p.set(1).unwrap(); // transition in
        p.set(1).unwrap(); // equal no-op, not a transition
        assert_eq!(hits.get(), 1);

        p.set(0).unwrap(); // out
        p.set(1).unwrap(); // in again
        assert_eq!(hits.get(), 2);

        p.set(2).unwrap(); // out (still non-matching)
        p.set(3).unwrap(); // non-matching to non-matching
        assert_eq!(hits.get(), 2);

        p.set(1).unwrap();
        assert_eq!(hits.get(), 3);
    }

    #[test]
    fn when_fires_at_registration_if_matching_then_rearms() {
        let p = Property::new(5);
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        p.when(|v| *v >= 5, move |_| h.set(h.get() + 1)).forget();
        assert_eq!(hits.get(), 1);

        p.set(6).unwrap(); // still matching: no new transition
        assert_eq!(hits.get(), 1);

        p.set(0).unwrap();
        p.set(7).unwrap();
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn clone_shares_state() {
        let a = Property::new(1);
        let b = a.clone();
        b.set(2).unwrap();
        assert_eq!(a.get(), 2);
    }

    #[test]
    fn chained_maps_propagate_in_dependency_order() {
        let p = Property::new(1);
        let doubled = p.map(|v| v * 2);
        let plus_one = doubled.map(|v| v + 1);

        p.set(10).unwrap();
        assert_eq!(doubled.get(), 20);
        assert_eq!(plus_one.get(), 21);
    }
}
