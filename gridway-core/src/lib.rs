//! # gridway-core
//!
//! Environment abstractions and shared primitives for the gridway batch
//! system.
//!
//! This crate provides the traits and types the relay layer builds on:
//!
//! - **Provider traits**: time, task spawning, networking, and hostname
//!   resolution, with Tokio-backed production implementations
//! - **Core types**: [`MsgId`], [`NodeAddress`], [`JobId`], [`ConnId`]
//! - **Codec trait**: pluggable payload serialization
//!
//! Everything is designed for a single-threaded async runtime: provider
//! traits are `?Send` and spawned work runs on the local executor.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod codec;
mod network;
mod providers;
mod resolve;
mod task;
mod time;
mod types;

// Codec exports
pub use codec::{CodecError, JsonCodec, PayloadCodec};

// Provider trait exports
pub use network::{NetListener, NetworkProvider, TokioListener, TokioNetworkProvider};
pub use providers::{Providers, TokioProviders};
pub use resolve::{HostResolver, ResolveError, StdResolver};
pub use task::{TaskProvider, TokioTaskProvider};
pub use time::{TimeError, TimeProvider, TokioTimeProvider};

// Core type exports
pub use types::{ConnId, JobId, MsgId, NodeAddress, NodeAddressParseError};
