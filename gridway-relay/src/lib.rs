//! # gridway-relay
//!
//! Inter-node command relay for the gridway batch system.
//!
//! This crate implements the mechanism by which a server issues
//! asynchronous commands to other servers and to per-node execution
//! agents, tracks each outstanding command until its reply arrives (or the
//! connection fails), and invokes the caller's completion callback exactly
//! once per command.
//!
//! Two transports are reconciled behind one tracking model:
//!
//! - **single-request connections** to other servers: one connection per
//!   command, the reply correlated by connection handle
//! - **persistent multiplexed streams** to execution agents: one stream
//!   per peer carrying many concurrent commands, replies correlated by
//!   message identifier in any order
//!
//! On top of that sit transient-failure retry with a fixed backoff and
//! ceiling, failover redirection, batch purge of everything pending on a
//! broken stream, and local dispatch through the same completion path.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

/// Command kinds and payloads.
pub mod command;

/// Relay timing and retry configuration.
pub mod config;

/// Background I/O tasks.
mod driver;

/// Command encoder registration table.
pub mod encode;

/// Error types.
pub mod error;

/// Peer table and stream state.
pub mod peer;

/// Task registry and tracking records.
pub mod registry;

/// The relay facade: dispatch and correlation.
pub mod relay;

/// Reply records and completion outcomes.
pub mod reply;

/// Timed retry and failover redirection.
pub mod retry;

/// Frame format shared by both transports.
pub mod wire;

pub use command::{Command, CommandBody, CommandKind, StageDirection};
pub use config::RelayConfig;
pub use encode::{EncodeFn, EncoderTable, EncoderTableBuilder};
pub use error::RelayError;
pub use peer::{Peer, PeerId, PeerKind, PeerTable};
pub use registry::{
    Destination, PendingRequest, ReplyCallback, TaskHandle, TaskRegistry, TaskState,
};
pub use relay::{IssueRejected, LocalDispatcher, Relay, Target};
pub use reply::{code, FailReason, Reply, ReplyBody, StatusEntry};
pub use retry::FailoverConfig;
pub use wire::{encode_frame, try_decode_frame, WireError, FRAME_HEADER_SIZE, MAX_FRAME_PAYLOAD};
