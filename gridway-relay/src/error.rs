//! Error types for the relay layer.

use gridway_core::{CodecError, ConnId, ResolveError};
use std::io;

use crate::command::CommandKind;

/// Errors surfaced by relay operations.
///
/// Failures of an *issued* request never travel through this type; they
/// terminate at the completion callback with a failed reply. `RelayError`
/// covers the immediate failures: a request that could not be posted at all.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The named peer is not known to the peer table.
    #[error("unknown peer: {name}")]
    UnknownPeer {
        /// The name that was looked up.
        name: String,
    },

    /// The peer has no live stream to relay on.
    #[error("cannot relay: peer stream is down")]
    NoRelay,

    /// No encoder is registered for the command kind.
    ///
    /// The encoder table is closed at initialization, so hitting this is a
    /// contract violation by the caller, not an external condition.
    #[error("unsupported command kind: {kind:?}")]
    UnsupportedCommand {
        /// The offending kind.
        kind: CommandKind,
    },

    /// Payload encoding failed.
    #[error("encode failed: {0}")]
    Encode(#[from] CodecError),

    /// Frame construction failed (oversized payload).
    #[error("frame error: {0}")]
    Wire(#[from] crate::wire::WireError),

    /// Destination name resolution failed.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Connection establishment failed.
    #[error("connect failed: {detail}")]
    ConnectFailed {
        /// Underlying failure detail.
        detail: String,
        /// Whether a later attempt could succeed.
        retryable: bool,
    },

    /// The connection handle is not open.
    #[error("connection handle not open: {0}")]
    UnknownConn(ConnId),

    /// An I/O operation on an established connection failed.
    #[error("i/o error: {0}")]
    Io(String),

    /// The retry ceiling elapsed without a successful attempt.
    #[error("retry ceiling exceeded")]
    RetryExhausted,
}

impl RelayError {
    /// Whether the retry manager should schedule another attempt for this
    /// failure. Only resolution and connect-level failures are ever
    /// retried; encode and post-connect I/O failures are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            RelayError::Resolve(e) => e.is_retryable(),
            RelayError::ConnectFailed { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Build a `ConnectFailed` from an I/O error, classifying it as
    /// retryable or fatal by error kind.
    pub fn from_connect_error(err: io::Error) -> Self {
        let retryable = !matches!(
            err.kind(),
            io::ErrorKind::PermissionDenied
                | io::ErrorKind::InvalidInput
                | io::ErrorKind::InvalidData
                | io::ErrorKind::Unsupported
                | io::ErrorKind::AddrNotAvailable
        );
        RelayError::ConnectFailed {
            detail: err.to_string(),
            retryable,
        }
    }
}

impl From<io::Error> for RelayError {
    fn from(err: io::Error) -> Self {
        RelayError::Io(err.to_string())
    }
}
