#![forbid(unsafe_code)]

//! Ordered, observable, optionally keyed item collections.
//!
//! # Design
//!
//! [`Collection<T>`] holds an ordered sequence of [`Keyed`] entries in
//! shared storage. Mutation goes through the `add`/`remove`
//! [`Command`]s; every structural change updates the snapshot, commits
//! the `size` property, and fires `added`/`removed` plus `changed` —
//! in that order, all synchronously, before the mutation's result
//! future resolves. Listeners therefore never observe a snapshot that
//! disagrees with `size()`.
//!
//! Derived collections (`filter`, `map`, `sort`, `fork`) are wired to
//! the source `changed` channel and updated incrementally per delta,
//! never by rescanning. Their own `add`/`remove` commands are
//! permanently disabled, except for `fork`, which routes them through
//! caller-supplied functions.
//!
//! # Invariants
//!
//! 1. Indices are stable only between structural changes; each change
//!    fires a [`Delta`] describing the shift.
//! 2. `size()` equals the snapshot length at every observable instant.
//! 3. Derived projections preserve source relative order (`sort` keeps
//!    arrival order for equal-order items).
//! 4. The source side holds only weak references to derived nodes.
//!
//! # Failure Modes
//!
//! - **Duplicate key on add**: rejected, state unchanged.
//! - **Remove of an absent item**: rejected, state unchanged.
//! - **Keyed/indexed get miss**: resolves to `KeyNotFound` /
//!   `IndexOutOfBounds` after consulting the fetcher (if any).
//! - **Failing `reduce` aggregate**: the derived property keeps its
//!   value and reports on its `failed` channel.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::{Rc, Weak};

use futures::future::{FutureExt, LocalBoxFuture};
use tracing::{debug, trace};

use crate::command::Command;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::property::Property;
use crate::reason::Reason;
use crate::subscription::Subscription;

/// An item plus its optional string key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Keyed<T> {
    pub key: Option<Rc<str>>,
    pub value: T,
}

impl<T> Keyed<T> {
    /// An unkeyed item.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self { key: None, value }
    }

    /// An item addressable by `key` as well as by index.
    #[must_use]
    pub fn with_key(key: impl Into<Rc<str>>, value: T) -> Self {
        Self {
            key: Some(key.into()),
            value,
        }
    }
}

/// Which side of a structural change a [`Delta`] describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeltaKind {
    Added,
    Removed,
}

/// Description of one structural change: the item, the index it was
/// inserted at or removed from, and its key if any.
#[derive(Clone, Debug)]
pub struct Delta<T> {
    pub kind: DeltaKind,
    pub item: T,
    pub index: usize,
    pub key: Option<Rc<str>>,
}

type FetchAll<T> = Box<dyn Fn() -> LocalBoxFuture<'static, Result<Vec<Keyed<T>>>>>;

/// How a collection's `add`/`remove` commands behave.
enum MutationPolicy<T> {
    /// Commands mutate the local entries (root collections).
    Direct,
    /// Commands are permanently disabled (derived projections).
    Frozen,
    /// Commands route through caller-supplied functions (`fork`).
    Routed {
        add: Box<dyn Fn(Keyed<T>) -> Result<()>>,
        remove: Box<dyn Fn(T) -> Result<()>>,
    },
}

struct CollectionInner<T> {
    entries: RefCell<Vec<Keyed<T>>>,
    size: Property<usize>,
    added: Event<Delta<T>>,
    removed: Event<Delta<T>>,
    changed: Event<Delta<T>>,
    fetcher: Option<FetchAll<T>>,
    add_cmd: Command<Keyed<T>, ()>,
    remove_cmd: Command<T, ()>,
    /// Guards on the upstream source for derived collections.
    upstream: RefCell<Vec<Subscription>>,
    /// Strong handle to the upstream source so a derivation chain stays
    /// live while its tail is held; the reverse edge is weak.
    sources: RefCell<Vec<Rc<dyn std::any::Any>>>,
}

/// Ordered, index- and key-addressable observable item set.
pub struct Collection<T> {
    inner: Rc<CollectionInner<T>>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + 'static> Default for Collection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + PartialEq + 'static> Collection<T> {
    /// An empty, locally mutable collection.
    #[must_use]
    pub fn new() -> Self {
        Self::build(Vec::new(), None, MutationPolicy::Direct)
    }

    /// A collection seeded with unkeyed items.
    #[must_use]
    pub fn from_items(items: Vec<T>) -> Self {
        Self::from_keyed(items.into_iter().map(Keyed::new).collect())
    }

    /// A collection seeded with keyed entries.
    #[must_use]
    pub fn from_keyed(entries: Vec<Keyed<T>>) -> Self {
        Self::build(entries, None, MutationPolicy::Direct)
    }

    /// An empty collection backed by an external fetcher.
    ///
    /// The fetcher answers [`fetch`](Self::fetch) and lookup misses; it
    /// never mutates the local snapshot (mutations arrive only through
    /// `add`/`remove`).
    #[must_use]
    pub fn with_fetcher(
        fetch: impl Fn() -> LocalBoxFuture<'static, Result<Vec<Keyed<T>>>> + 'static,
    ) -> Self {
        Self::build(Vec::new(), Some(Box::new(fetch)), MutationPolicy::Direct)
    }

    fn build(
        initial: Vec<Keyed<T>>,
        fetcher: Option<FetchAll<T>>,
        policy: MutationPolicy<T>,
    ) -> Self {
        let len = initial.len();
        let inner = Rc::new_cyclic(|weak: &Weak<CollectionInner<T>>| {
            let (add_cmd, remove_cmd) = match policy {
                MutationPolicy::Direct => {
                    let w = Weak::clone(weak);
                    let add = Command::new(move |entry: Keyed<T>| match w.upgrade() {
                        Some(inner) => Collection { inner }.insert_checked(entry),
                        None => Err(Error::rejected("collection dropped")),
                    });
                    let w = Weak::clone(weak);
                    let remove = Command::new(move |item: T| match w.upgrade() {
                        Some(inner) => Collection { inner }.remove_first_equal(&item),
                        None => Err(Error::rejected("collection dropped")),
                    });
                    (add, remove)
                }
                MutationPolicy::Frozen => {
                    let backstop = "derived collection is read-only";
                    let add = Command::with_enabled(
                        move |_: Keyed<T>| Err(Error::rejected(backstop)),
                        Property::read_only(false),
                    );
                    let remove = Command::with_enabled(
                        move |_: T| Err(Error::rejected(backstop)),
                        Property::read_only(false),
                    );
                    (add, remove)
                }
                MutationPolicy::Routed { add, remove } => {
                    (Command::new(add), Command::new(remove))
                }
            };
            CollectionInner {
                entries: RefCell::new(initial),
                size: Property::read_only(len),
                added: Event::new(),
                removed: Event::new(),
                changed: Event::new(),
                fetcher,
                add_cmd,
                remove_cmd,
                upstream: RefCell::new(Vec::new()),
                sources: RefCell::new(Vec::new()),
            }
        });
        Self { inner }
    }

    // ── Synchronous access ──────────────────────────────────────────

    /// Snapshot of the current item values, local state only.
    #[must_use]
    pub fn items(&self) -> Vec<T> {
        self.inner
            .entries
            .borrow()
            .iter()
            .map(|e| e.value.clone())
            .collect()
    }

    /// Snapshot including keys.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Keyed<T>> {
        self.inner.entries.borrow().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.borrow().is_empty()
    }

    /// Local lookup by index.
    #[must_use]
    pub fn item_at(&self, index: usize) -> Option<T> {
        self.inner
            .entries
            .borrow()
            .get(index)
            .map(|e| e.value.clone())
    }

    /// Local lookup by key.
    #[must_use]
    pub fn item_by_key(&self, key: &str) -> Option<T> {
        self.inner
            .entries
            .borrow()
            .iter()
            .find(|e| e.key.as_deref() == Some(key))
            .map(|e| e.value.clone())
    }

    /// Live item count, kept consistent with the snapshot length.
    #[must_use]
    pub fn size(&self) -> Property<usize> {
        self.inner.size.clone()
    }

    // ── Events & commands ───────────────────────────────────────────

    #[must_use]
    pub fn added(&self) -> Event<Delta<T>> {
        self.inner.added.clone()
    }

    #[must_use]
    pub fn removed(&self) -> Event<Delta<T>> {
        self.inner.removed.clone()
    }

    #[must_use]
    pub fn changed(&self) -> Event<Delta<T>> {
        self.inner.changed.clone()
    }

    /// Register a `changed` listener.
    pub fn subscribe(&self, f: impl Fn(&Delta<T>) + 'static) -> Subscription {
        self.inner.changed.on(f)
    }

    /// The add command. Rejects duplicate keys.
    #[must_use]
    pub fn add(&self) -> Command<Keyed<T>, ()> {
        self.inner.add_cmd.clone()
    }

    /// The remove command. Removes the first equal item; rejects if
    /// the item is absent.
    #[must_use]
    pub fn remove(&self) -> Command<T, ()> {
        self.inner.remove_cmd.clone()
    }

    // ── Asynchronous access ─────────────────────────────────────────

    /// The authoritative full item list.
    ///
    /// With a fetcher installed this is a read-through to the external
    /// collaborator; the local snapshot is not modified. Without one it
    /// resolves to the local snapshot.
    pub fn fetch(&self) -> LocalBoxFuture<'static, Result<Vec<T>>> {
        match &self.inner.fetcher {
            Some(fetch) => {
                let pending = fetch();
                async move { Ok(pending.await?.into_iter().map(|e| e.value).collect()) }
                    .boxed_local()
            }
            None => futures::future::ready(Ok(self.items())).boxed_local(),
        }
    }

    /// Resolve a single item by key, consulting the fetcher on a local
    /// miss. Resolves to [`Error::KeyNotFound`] if the key does not
    /// exist after resolution.
    pub fn get_key(&self, key: &str) -> LocalBoxFuture<'static, Result<T>> {
        if let Some(found) = self.item_by_key(key) {
            return futures::future::ready(Ok(found)).boxed_local();
        }
        let key: Rc<str> = key.into();
        match &self.inner.fetcher {
            Some(fetch) => {
                let pending = fetch();
                async move {
                    pending
                        .await?
                        .into_iter()
                        .find(|e| e.key.as_deref() == Some(&*key))
                        .map(|e| e.value)
                        .ok_or(Error::KeyNotFound { key })
                }
                .boxed_local()
            }
            None => futures::future::ready(Err(Error::KeyNotFound { key })).boxed_local(),
        }
    }

    /// Resolve a single item by index, consulting the fetcher on a
    /// local miss. Resolves to [`Error::IndexOutOfBounds`] if the index
    /// does not exist after resolution.
    pub fn get_index(&self, index: usize) -> LocalBoxFuture<'static, Result<T>> {
        if let Some(found) = self.item_at(index) {
            return futures::future::ready(Ok(found)).boxed_local();
        }
        match &self.inner.fetcher {
            Some(fetch) => {
                let pending = fetch();
                async move {
                    let fetched = pending.await?;
                    let len = fetched.len();
                    fetched
                        .into_iter()
                        .nth(index)
                        .map(|e| e.value)
                        .ok_or(Error::IndexOutOfBounds { index, len })
                }
                .boxed_local()
            }
            None => futures::future::ready(Err(Error::IndexOutOfBounds {
                index,
                len: self.len(),
            }))
            .boxed_local(),
        }
    }

    // ── Operators ───────────────────────────────────────────────────

    /// Derived collection of the items currently satisfying `pred`, in
    /// source relative order, updated incrementally per source delta.
    #[must_use]
    pub fn filter(&self, pred: impl Fn(&T) -> bool + 'static) -> Collection<T> {
        let initial = self
            .inner
            .entries
            .borrow()
            .iter()
            .filter(|e| pred(&e.value))
            .cloned()
            .collect();
        let derived = Self::build(initial, None, MutationPolicy::Frozen);
        let pred = Rc::new(pred);
        self.wire(&derived, move |derived, source, delta| {
            if !pred(&delta.item) {
                return;
            }
            // Position in the projection = passing items before the
            // source index (the source snapshot is already mutated).
            let pos = source.passing_prefix(&*pred, delta.index);
            match delta.kind {
                DeltaKind::Added => derived.apply_insert(
                    pos,
                    Keyed {
                        key: delta.key.clone(),
                        value: delta.item.clone(),
                    },
                ),
                DeltaKind::Removed => derived.apply_remove(pos),
            }
        });
        derived
    }

    /// Derived collection holding `f(item)` per source item, mirrored
    /// positionally.
    #[must_use]
    pub fn map<U: Clone + PartialEq + 'static>(
        &self,
        f: impl Fn(&T) -> U + 'static,
    ) -> Collection<U> {
        let initial = self
            .inner
            .entries
            .borrow()
            .iter()
            .map(|e| Keyed {
                key: e.key.clone(),
                value: f(&e.value),
            })
            .collect();
        let derived = Collection::build(initial, None, MutationPolicy::Frozen);
        self.wire(&derived, move |derived, _source, delta| match delta.kind {
            DeltaKind::Added => derived.apply_insert(
                delta.index,
                Keyed {
                    key: delta.key.clone(),
                    value: f(&delta.item),
                },
            ),
            DeltaKind::Removed => derived.apply_remove(delta.index),
        });
        derived
    }

    /// Derived collection maintaining a stable sorted projection:
    /// equal-order items keep their arrival order.
    #[must_use]
    pub fn sort(&self, cmp: impl Fn(&T, &T) -> Ordering + 'static) -> Collection<T> {
        let mut initial: Vec<Keyed<T>> = self.inner.entries.borrow().clone();
        initial.sort_by(|a, b| cmp(&a.value, &b.value));
        let derived = Self::build(initial, None, MutationPolicy::Frozen);
        let cmp = Rc::new(cmp);
        self.wire(&derived, move |derived, _source, delta| match delta.kind {
            DeltaKind::Added => {
                // Upper bound: new arrivals land after their equals.
                let pos = derived.sorted_position(&*cmp, &delta.item);
                derived.apply_insert(
                    pos,
                    Keyed {
                        key: delta.key.clone(),
                        value: delta.item.clone(),
                    },
                );
            }
            DeltaKind::Removed => {
                if let Some(pos) = derived.position_of(&delta.item) {
                    derived.apply_remove(pos);
                }
            }
        });
        derived
    }

    /// Derived property holding the running aggregate of the items.
    ///
    /// Incremental on `Added`; a removal triggers a full refold (a fold
    /// is not invertible in general). A failing aggregate leaves the
    /// property's value unchanged and fires its `failed` channel.
    #[must_use]
    pub fn reduce<U: Clone + PartialEq + 'static>(
        &self,
        aggregate: impl Fn(U, &T) -> Result<U> + 'static,
        initial: U,
    ) -> Property<U> {
        let aggregate = Rc::new(aggregate);
        let seed = initial.clone();
        // No listener can exist on the derived property yet, so a
        // failure here cannot reach a `failed` channel; fall back to
        // the seed and leave a trace.
        let first = self.refold(&*aggregate, initial.clone()).unwrap_or_else(|err| {
            debug!(%err, "initial aggregate fold failed, seeding with the initial value");
            initial.clone()
        });
        let derived = Property::read_only(first);

        let weak_derived = derived.downgrade();
        let weak_source = Rc::downgrade(&self.inner);
        let sub = self.inner.changed.on(move |delta: &Delta<T>| {
            let Some(target) = weak_derived.upgrade() else {
                return;
            };
            let Some(source) = weak_source.upgrade() else {
                return;
            };
            let source = Collection { inner: source };
            let outcome = match delta.kind {
                DeltaKind::Added => aggregate(target.get(), &delta.item),
                DeltaKind::Removed => source.refold(&*aggregate, seed.clone()),
            };
            match outcome {
                Ok(value) => target.commit(value, Reason::none()),
                Err(err) => target.fail(err),
            }
        });
        derived.retain_upstream(sub);
        derived.retain_source(Rc::clone(&self.inner) as Rc<dyn std::any::Any>);
        derived
    }

    /// Derived collection that mirrors this source but routes local
    /// `add`/`remove` invocations through the supplied functions
    /// (typically toward the external collaborator, whose confirmed
    /// mutations then arrive back through the source).
    #[must_use]
    pub fn fork(
        &self,
        add_fn: impl Fn(Keyed<T>) -> Result<()> + 'static,
        remove_fn: impl Fn(T) -> Result<()> + 'static,
    ) -> Collection<T> {
        let derived = Self::build(
            self.snapshot(),
            None,
            MutationPolicy::Routed {
                add: Box::new(add_fn),
                remove: Box::new(remove_fn),
            },
        );
        self.wire(&derived, move |derived, _source, delta| match delta.kind {
            DeltaKind::Added => derived.apply_insert(
                delta.index,
                Keyed {
                    key: delta.key.clone(),
                    value: delta.item.clone(),
                },
            ),
            DeltaKind::Removed => derived.apply_remove(delta.index),
        });
        derived
    }

    // ── Internal plumbing ───────────────────────────────────────────

    /// Wire a derived collection to this source's `changed` channel.
    /// The listener holds only weak handles, so the source never keeps
    /// the derived node alive (and vice versa through the guard).
    fn wire<U: Clone + PartialEq + 'static>(
        &self,
        derived: &Collection<U>,
        on_delta: impl Fn(&Collection<U>, &Collection<T>, &Delta<T>) + 'static,
    ) {
        let weak_derived = Rc::downgrade(&derived.inner);
        let weak_source = Rc::downgrade(&self.inner);
        let sub = self.inner.changed.on(move |delta: &Delta<T>| {
            let Some(derived) = weak_derived.upgrade() else {
                return;
            };
            let Some(source) = weak_source.upgrade() else {
                return;
            };
            on_delta(
                &Collection { inner: derived },
                &Collection { inner: source },
                delta,
            );
        });
        derived.inner.upstream.borrow_mut().push(sub);
        derived
            .inner
            .sources
            .borrow_mut()
            .push(Rc::clone(&self.inner) as Rc<dyn std::any::Any>);
    }

    /// Duplicate-key check plus append (the `add` command action).
    fn insert_checked(&self, entry: Keyed<T>) -> Result<()> {
        if let Some(key) = &entry.key {
            let taken = self
                .inner
                .entries
                .borrow()
                .iter()
                .any(|e| e.key.as_deref() == Some(&**key));
            if taken {
                return Err(Error::rejected(format!("duplicate key {key:?}")));
            }
        }
        let index = self.len();
        self.apply_insert(index, entry);
        Ok(())
    }

    fn remove_first_equal(&self, item: &T) -> Result<()> {
        let pos = self
            .inner
            .entries
            .borrow()
            .iter()
            .position(|e| e.value == *item);
        match pos {
            Some(index) => {
                self.apply_remove(index);
                Ok(())
            }
            None => Err(Error::rejected("item not present")),
        }
    }

    /// Insert and notify: snapshot, then `size`, then `added`, then
    /// `changed`. Listener-visible state is consistent at every step.
    fn apply_insert(&self, index: usize, entry: Keyed<T>) {
        self.inner.entries.borrow_mut().insert(index, entry.clone());
        self.sync_size();
        trace!(index, "collection insert");
        let delta = Delta {
            kind: DeltaKind::Added,
            item: entry.value,
            index,
            key: entry.key,
        };
        self.inner.added.emit(&delta);
        self.inner.changed.emit(&delta);
    }

    fn apply_remove(&self, index: usize) {
        let entry = self.inner.entries.borrow_mut().remove(index);
        self.sync_size();
        trace!(index, "collection remove");
        let delta = Delta {
            kind: DeltaKind::Removed,
            item: entry.value,
            index,
            key: entry.key,
        };
        self.inner.removed.emit(&delta);
        self.inner.changed.emit(&delta);
    }

    fn sync_size(&self) {
        let len = self.inner.entries.borrow().len();
        self.inner.size.commit(len, Reason::none());
    }

    /// How many of the first `index` entries satisfy `pred`.
    fn passing_prefix(&self, pred: &dyn Fn(&T) -> bool, index: usize) -> usize {
        self.inner
            .entries
            .borrow()
            .iter()
            .take(index)
            .filter(|e| pred(&e.value))
            .count()
    }

    /// Upper-bound insertion point under `cmp`.
    fn sorted_position(&self, cmp: &dyn Fn(&T, &T) -> Ordering, item: &T) -> usize {
        self.inner
            .entries
            .borrow()
            .partition_point(|e| cmp(&e.value, item) != Ordering::Greater)
    }

    fn position_of(&self, item: &T) -> Option<usize> {
        self.inner
            .entries
            .borrow()
            .iter()
            .position(|e| e.value == *item)
    }

    fn refold<U: Clone>(&self, aggregate: &dyn Fn(U, &T) -> Result<U>, seed: U) -> Result<U> {
        // Snapshot first so the aggregate may read the collection.
        let values = self.items();
        let mut acc = seed;
        for value in &values {
            acc = aggregate(acc, value)?;
        }
        Ok(acc)
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("entries", &*self.inner.entries.borrow())
            .finish()
    }
}
