//! Provider bundle trait for simplified type parameters.
//!
//! Bundles the network, time, and task providers into a single type
//! parameter so downstream code carries `P: Providers` instead of three
//! separate generics with repeated where clauses.

use crate::{
    HostResolver, NetworkProvider, StdResolver, TaskProvider, TimeProvider, TokioNetworkProvider,
    TokioTaskProvider, TokioTimeProvider,
};

/// Bundle of provider types for a runtime environment.
///
/// The trait uses associated types to preserve type information at compile
/// time without runtime dispatch; accessor methods hand out the individual
/// providers.
pub trait Providers: Clone + 'static {
    /// Network provider type for connections and listeners.
    type Network: NetworkProvider + Clone + 'static;

    /// Time provider type for sleep, timeout, and clock queries.
    type Time: TimeProvider + Clone + 'static;

    /// Task provider type for spawning local tasks.
    type Task: TaskProvider + Clone + 'static;

    /// Resolver type for destination-name lookup.
    type Resolver: HostResolver + Clone + 'static;

    /// Get the network provider instance.
    fn network(&self) -> &Self::Network;

    /// Get the time provider instance.
    fn time(&self) -> &Self::Time;

    /// Get the task provider instance.
    fn task(&self) -> &Self::Task;

    /// Get the resolver instance.
    fn resolver(&self) -> &Self::Resolver;
}

/// Production providers using the Tokio runtime and the system resolver.
#[derive(Clone)]
pub struct TokioProviders {
    network: TokioNetworkProvider,
    time: TokioTimeProvider,
    task: TokioTaskProvider,
    resolver: StdResolver,
}

impl TokioProviders {
    /// Create a new production providers bundle.
    pub fn new() -> Self {
        Self {
            network: TokioNetworkProvider::new(),
            time: TokioTimeProvider::new(),
            task: TokioTaskProvider,
            resolver: StdResolver::new(),
        }
    }
}

impl Default for TokioProviders {
    fn default() -> Self {
        Self::new()
    }
}

impl Providers for TokioProviders {
    type Network = TokioNetworkProvider;
    type Time = TokioTimeProvider;
    type Task = TokioTaskProvider;
    type Resolver = StdResolver;

    fn network(&self) -> &Self::Network {
        &self.network
    }

    fn time(&self) -> &Self::Time {
        &self.time
    }

    fn task(&self) -> &Self::Task {
        &self.task
    }

    fn resolver(&self) -> &Self::Resolver {
        &self.resolver
    }
}
