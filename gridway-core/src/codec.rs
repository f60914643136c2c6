//! Pluggable payload serialization.
//!
//! The [`PayloadCodec`] trait lets the relay stay agnostic of the byte-level
//! encoding of command payloads and replies. The default [`JsonCodec`] uses
//! serde_json; a binary codec can be swapped in without touching the relay.
//!
//! # Example
//!
//! ```rust
//! use gridway_core::{PayloadCodec, JsonCodec};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, Debug, PartialEq)]
//! struct Signal { job: String, signame: String }
//!
//! let codec = JsonCodec;
//! let msg = Signal { job: "12.svr".into(), signame: "SIGTERM".into() };
//!
//! let bytes = codec.encode(&msg).unwrap();
//! let decoded: Signal = codec.decode(&bytes).unwrap();
//! assert_eq!(msg, decoded);
//! ```

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Error type for codec operations.
#[derive(Debug)]
pub enum CodecError {
    /// Failed to encode a value to bytes.
    Encode(Box<dyn std::error::Error + Send + Sync>),
    /// Failed to decode bytes to a value.
    Decode(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Encode(e) => write!(f, "encode error: {}", e),
            CodecError::Decode(e) => write!(f, "decode error: {}", e),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CodecError::Encode(e) => Some(e.as_ref()),
            CodecError::Decode(e) => Some(e.as_ref()),
        }
    }
}

/// Pluggable serialization format for command payloads and replies.
///
/// `Clone + 'static` so codec instances can be stored in the encoder table
/// and in per-connection reader tasks.
pub trait PayloadCodec: Clone + 'static {
    /// Encode a serializable value to bytes.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes to a deserializable value.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Decode` if deserialization fails.
    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec using serde_json.
///
/// Human-readable and convenient for debugging; the relay does not depend on
/// any property of the format beyond round-tripping.
#[derive(Clone, Default, Debug, Copy)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(msg).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}
