#![forbid(unsafe_code)]

//! Gated invocable actions.
//!
//! A [`Command`] pairs an action with an `enabled` [`Property`]. The
//! action runs only while `enabled()` is true; a disabled invocation is
//! a [`DisabledInvocation`](crate::error::Error::DisabledInvocation)
//! failure with no side effect. Invocation results are futures so the
//! contract is uniform with the other asynchronous entry points, even
//! though the action itself runs synchronously on the invoking stack.
//!
//! `bind` and `adapt` produce new command handles that **share** the
//! original's `enabled` property: disabling one gate disables every
//! handle derived from it.

use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture};
use tracing::debug;

use crate::error::{Error, Result};
use crate::property::Property;

/// An invocable action gated by an `enabled` property.
pub struct Command<A, R = ()> {
    action: Rc<dyn Fn(A) -> Result<R>>,
    enabled: Property<bool>,
}

impl<A, R> Clone for Command<A, R> {
    fn clone(&self) -> Self {
        Self {
            action: Rc::clone(&self.action),
            enabled: self.enabled.clone(),
        }
    }
}

impl<A: 'static, R: 'static> Command<A, R> {
    /// A command enabled by default.
    #[must_use]
    pub fn new(action: impl Fn(A) -> Result<R> + 'static) -> Self {
        Self::with_enabled(action, Property::new(true))
    }

    /// A command gated by an existing `enabled` property (shared, not
    /// copied).
    #[must_use]
    pub fn with_enabled(action: impl Fn(A) -> Result<R> + 'static, enabled: Property<bool>) -> Self {
        Self {
            action: Rc::new(action),
            enabled,
        }
    }

    /// The gate. Clone of a shared handle: setting it affects every
    /// command bound to the same gate.
    #[must_use]
    pub fn enabled(&self) -> Property<bool> {
        self.enabled.clone()
    }

    /// Invoke synchronously.
    ///
    /// Fails with [`Error::DisabledInvocation`] without running the
    /// action if the gate is closed.
    pub fn try_invoke(&self, args: A) -> Result<R> {
        if !self.enabled.get() {
            debug!("invocation refused: command disabled");
            return Err(Error::DisabledInvocation);
        }
        (self.action)(args)
    }

    /// Invoke, with the outcome delivered as a future resolving on the
    /// caller's executor.
    pub fn invoke(&self, args: A) -> LocalBoxFuture<'static, Result<R>> {
        futures::future::ready(self.try_invoke(args)).boxed_local()
    }

    /// Fix the arguments, producing a zero-argument command sharing
    /// this command's gate.
    #[must_use]
    pub fn bind(&self, args: A) -> Command<(), R>
    where
        A: Clone,
    {
        let action = Rc::clone(&self.action);
        Command {
            action: Rc::new(move |()| action(args.clone())),
            enabled: self.enabled.clone(),
        }
    }

    /// Re-map the argument type, producing a command sharing this
    /// command's gate. This is the typed rendition of leading-argument
    /// partial application: fix a prefix by closing over it in `f`.
    #[must_use]
    pub fn adapt<B: 'static>(&self, f: impl Fn(B) -> A + 'static) -> Command<B, R> {
        let action = Rc::clone(&self.action);
        Command {
            action: Rc::new(move |args| action(f(args))),
            enabled: self.enabled.clone(),
        }
    }
}

impl<A, R> std::fmt::Debug for Command<A, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("enabled", &self.enabled.get())
            .finish()
    }
}
