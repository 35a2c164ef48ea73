#![forbid(unsafe_code)]

//! Opaque change annotations.
//!
//! Every committed change carries a [`Reason`]: an arbitrary,
//! caller-supplied value describing *why* the change happened (a sync
//! origin tag, a user-action marker, a rollback notice). The core never
//! inspects it; listeners that know the concrete type can downcast.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Cheaply cloneable, opaque annotation attached to a committed change.
///
/// `Reason::none()` (the default) is what `set` without an explicit
/// reason commits with.
#[derive(Clone, Default)]
pub struct Reason(Option<Rc<dyn Any>>);

impl Reason {
    /// Wrap an arbitrary value as a change reason.
    #[must_use]
    pub fn new<R: Any>(reason: R) -> Self {
        Self(Some(Rc::new(reason)))
    }

    /// The absent reason.
    #[must_use]
    pub fn none() -> Self {
        Self(None)
    }

    /// Whether a reason value is present.
    #[must_use]
    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    /// Downcast to a concrete reason type, if present and matching.
    #[must_use]
    pub fn downcast_ref<R: Any>(&self) -> Option<&R> {
        self.0.as_deref().and_then(<dyn Any>::downcast_ref)
    }
}

impl fmt::Debug for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(_) => f.write_str("Reason(..)"),
            None => f.write_str("Reason(none)"),
        }
    }
}
