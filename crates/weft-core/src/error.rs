#![forbid(unsafe_code)]

//! Error taxonomy for the reactive core.
//!
//! Primitive-level failures are returned (or future-rejected) to the
//! immediate caller; a derived node that fails to recompute reports the
//! failure on its own `failed` channel instead of going stale silently.

use std::rc::Rc;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure conditions surfaced by the reactive primitives.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// A `Property` set or `Collection` mutation was rejected by the
    /// underlying producer/mutator. State is unchanged.
    #[error("commit rejected: {0}")]
    RejectedCommit(Rc<str>),

    /// A `Command` was invoked while its `enabled` property was false.
    /// The bound action was not executed.
    #[error("command is disabled")]
    DisabledInvocation,

    /// A keyed `Collection` lookup found no item after resolution.
    #[error("no item with key {key:?}")]
    KeyNotFound { key: Rc<str> },

    /// An indexed `Collection` lookup was out of bounds after resolution.
    #[error("index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    /// Root graph construction failed.
    #[error("initialization failed: {0}")]
    InitializationFailure(Rc<str>),
}

impl Error {
    #[must_use]
    pub fn rejected(message: impl Into<Rc<str>>) -> Self {
        Self::RejectedCommit(message.into())
    }

    #[must_use]
    pub fn key_not_found(key: impl Into<Rc<str>>) -> Self {
        Self::KeyNotFound { key: key.into() }
    }

    #[must_use]
    pub fn initialization(message: impl Into<Rc<str>>) -> Self {
        Self::InitializationFailure(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            Error::rejected("read-only").to_string(),
            "commit rejected: read-only"
        );
        assert_eq!(Error::DisabledInvocation.to_string(), "command is disabled");
        assert_eq!(
            Error::key_not_found("abc").to_string(),
            "no item with key \"abc\""
        );
        assert_eq!(
            Error::IndexOutOfBounds { index: 3, len: 2 }.to_string(),
            "index 3 out of bounds (len 2)"
        );
    }

    #[test]
    fn errors_compare_by_value() {
        assert_eq!(Error::rejected("x"), Error::rejected("x"));
        assert_ne!(Error::rejected("x"), Error::DisabledInvocation);
    }
}
