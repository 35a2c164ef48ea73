#![forbid(unsafe_code)]

//! Weft public facade crate.
//!
//! Re-exports the reactive primitives from `weft-core` and provides
//! the host entry points: [`initialize`] builds a caller-defined root
//! object graph out of those primitives, and [`version`] reports the
//! library version.

use futures::future::{FutureExt, LocalBoxFuture};
use tracing::debug;

pub use weft_core::{
    Change, Collection, Command, Delta, DeltaKind, Error, Event, Keyed, ListenerId, Property,
    Reason, Result, Subscription,
};

pub mod prelude {
    pub use weft_core::collection::{Collection, Delta, DeltaKind, Keyed};
    pub use weft_core::command::Command;
    pub use weft_core::error::{Error, Result};
    pub use weft_core::event::Event;
    pub use weft_core::property::{Change, Property};
    pub use weft_core::reason::Reason;
    pub use weft_core::subscription::{ListenerId, Subscription};
}

/// Library version identifier, synchronous.
#[must_use]
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Options for [`initialize`].
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Name attached to the root graph, for diagnostics.
    pub graph_name: Option<String>,
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_graph_name(mut self, name: impl Into<String>) -> Self {
        self.graph_name = Some(name.into());
        self
    }
}

/// Handle to an initialized root object graph.
pub struct Api<G> {
    graph: G,
}

impl<G> Api<G> {
    /// The root composed object graph.
    #[must_use]
    pub fn graph(&self) -> &G {
        &self.graph
    }

    /// Consume the handle, yielding the graph.
    #[must_use]
    pub fn into_graph(self) -> G {
        self.graph
    }

    /// Library version, same as the free [`version`] accessor.
    #[must_use]
    pub fn version(&self) -> &'static str {
        version()
    }
}

impl<G> std::fmt::Debug for Api<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Api").field("version", &version()).finish()
    }
}

/// Build the root object graph.
///
/// Runs the caller's constructor with the configuration and resolves to
/// an [`Api`] handle, or to [`Error::InitializationFailure`] wrapping
/// the constructor's error. Failures are always delivered through the
/// returned future, never thrown into the caller's stack.
pub fn initialize<G: 'static>(
    config: Config,
    build: impl FnOnce(&Config) -> Result<G>,
) -> LocalBoxFuture<'static, Result<Api<G>>> {
    let outcome = match build(&config) {
        Ok(graph) => {
            debug!(graph = config.graph_name.as_deref().unwrap_or("unnamed"), "graph initialized");
            Ok(Api { graph })
        }
        Err(err) => Err(Error::initialization(err.to_string())),
    };
    futures::future::ready(outcome).boxed_local()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    struct Roster {
        members: Collection<String>,
        headcount: Property<usize>,
    }

    fn build_roster(_config: &Config) -> Result<Roster> {
        let members: Collection<String> = Collection::new();
        let headcount = members.reduce(|acc, _| Ok(acc + 1), 0usize);
        Ok(Roster { members, headcount })
    }

    #[test]
    fn version_is_the_package_version() {
        assert_eq!(version(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn initialize_builds_a_live_graph() {
        let api = block_on(initialize(
            Config::new().with_graph_name("roster"),
            build_roster,
        ))
        .unwrap();

        let roster = api.graph();
        roster
            .members
            .add()
            .try_invoke(Keyed::new("ada".to_string()))
            .unwrap();
        assert_eq!(roster.headcount.get(), 1);
        assert_eq!(api.version(), version());
    }

    #[test]
    fn initialization_failure_arrives_through_the_future() {
        let result: Result<Api<()>> = block_on(initialize(Config::new(), |_| {
            Err(Error::rejected("backing store unavailable"))
        }));
        let err = result.unwrap_err();
        assert!(matches!(err, Error::InitializationFailure(_)));
        assert!(err.to_string().contains("backing store unavailable"));
    }
}
