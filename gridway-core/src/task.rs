//! Task spawning abstraction for single-threaded runtimes.
//!
//! Background work (stream drivers, reply readers, retry timers) is spawned
//! through this trait so it runs on the same local executor as the relay
//! state. Futures are not required to be `Send`.

use std::future::Future;
use tokio::task::JoinHandle;

/// Provider trait for spawning local tasks.
pub trait TaskProvider: Clone {
    /// Spawn a named background task on the local executor.
    ///
    /// The name is used for tracing only.
    fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static;
}

/// Task provider backed by `tokio::task::spawn_local`.
///
/// Requires running inside a [`tokio::task::LocalSet`] (or a
/// current-thread runtime driving one).
#[derive(Debug, Clone, Default)]
pub struct TokioTaskProvider;

impl TaskProvider for TokioTaskProvider {
    fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        tracing::debug!(task = name, "spawning local task");
        tokio::task::spawn_local(future)
    }
}
