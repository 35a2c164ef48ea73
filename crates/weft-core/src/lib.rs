#![forbid(unsafe_code)]

//! Reactive state-propagation primitives.
//!
//! This crate provides the building blocks for a live, observable
//! object graph:
//!
//! - [`Property<T>`]: observable holder of a single current value with
//!   change notification, derivation (`map`, `fork`) and conditional
//!   watches (`once`, `when`).
//! - [`Event<A>`]: the multicast notification channel underlying every
//!   change signal, with RAII [`Subscription`] guards.
//! - [`Collection<T>`]: ordered, index- and key-addressable observable
//!   item set with command-gated mutation, delta events, and
//!   incremental derivations (`filter`, `map`, `sort`, `reduce`,
//!   `fork`).
//! - [`Command<A, R>`]: an invocable action gated by an `enabled`
//!   property.
//!
//! # Architecture
//!
//! Everything is single-threaded and cooperative: handles are
//! `Rc`-backed clones sharing interior state, dispatch and derived
//! recomputation run synchronously on the committing call stack
//! (source-before-derived within a branch), and the asynchronous entry
//! points (`Collection::fetch`/`get_*`, `Command::invoke`,
//! `Property::set_async`) are `LocalBoxFuture`s resolving on whatever
//! executor the caller drives. No primitive spawns a thread or takes a
//! lock.
//!
//! Dependency edges are weak from source to derived and strong from
//! derived to source, so a derivation chain stays live while its tail
//! is held and tears down when the tail is dropped.

pub mod collection;
pub mod command;
pub mod error;
pub mod event;
pub mod property;
pub mod reason;
pub mod subscription;

pub use collection::{Collection, Delta, DeltaKind, Keyed};
pub use command::Command;
pub use error::{Error, Result};
pub use event::Event;
pub use property::{Change, Property};
pub use reason::Reason;
pub use subscription::{ListenerId, Subscription};
