//! Reply records and completion outcomes.
//!
//! Every issued request finishes with a [`Reply`] in its tracking record,
//! whether the reply was decoded off the wire or synthesized by the relay
//! (decode failure, broken stream, retry exhaustion). Transport-level
//! failures additionally carry a [`FailReason`] in the terminal task state;
//! a reply that arrived intact completes the task as `Completed` even when
//! its `code` reports a remote error — interpreting the code is the
//! caller's business.

use serde::{Deserialize, Serialize};

/// Result codes used in synthesized replies.
pub mod code {
    /// The command succeeded.
    pub const SUCCESS: i32 = 0;
    /// Internal error on the issuing side.
    pub const SYSTEM: i32 = 1001;
    /// The reply could not be decoded.
    pub const DECODE: i32 = 1002;
    /// The peer's stream broke before the reply arrived.
    pub const NO_RELAY: i32 = 1003;
    /// The retry ceiling elapsed without a successful send.
    pub const TIMED_OUT: i32 = 1004;
    /// The request was cancelled by its job's teardown.
    pub const CANCELLED: i32 = 1005;
}

/// Decoded body of a reply.
///
/// `Null` is the empty choice used whenever the relay synthesizes a reply
/// (the peer never produced a body).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReplyBody {
    /// No body.
    Null,
    /// Free-form text.
    Text(String),
    /// Status entries, one per queried object.
    Status(Vec<StatusEntry>),
}

/// One object's worth of status attributes in a status reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry {
    /// Object name (job id, node name, ...).
    pub name: String,
    /// Attribute name/value pairs.
    pub attrs: Vec<(String, String)>,
}

/// A reply to an issued command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Result code; `code::SUCCESS` on success.
    pub code: i32,
    /// Auxiliary code, command-specific.
    pub aux: i32,
    /// Decoded body.
    pub body: ReplyBody,
}

impl Reply {
    /// A successful reply with no body.
    pub fn ok() -> Self {
        Self {
            code: code::SUCCESS,
            aux: 0,
            body: ReplyBody::Null,
        }
    }

    /// Synthesize a failed reply with the given code and an empty body.
    pub fn synthesized(code: i32) -> Self {
        Self {
            code,
            aux: 0,
            body: ReplyBody::Null,
        }
    }

    /// Whether the reply reports success.
    pub fn is_ok(&self) -> bool {
        self.code == code::SUCCESS
    }
}

/// Why a request failed at the transport level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    /// The peer's stream broke, or the reply could not be relayed back.
    NoRelay,
    /// The reply arrived but could not be decoded.
    Decode,
    /// The retry ceiling elapsed without a successful attempt.
    Timeout,
    /// The request never reached a destination (permanent resolution or
    /// dispatch failure surfaced through the callback).
    Rejected,
    /// The origin job was torn down while the request was outstanding.
    Cancelled,
}

impl FailReason {
    /// The reply code carried by a reply synthesized for this reason.
    pub fn reply_code(self) -> i32 {
        match self {
            FailReason::NoRelay => code::NO_RELAY,
            FailReason::Decode => code::DECODE,
            FailReason::Timeout => code::TIMED_OUT,
            FailReason::Rejected => code::SYSTEM,
            FailReason::Cancelled => code::CANCELLED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_ok() {
        let reply = Reply::ok();
        assert!(reply.is_ok());
        assert_eq!(reply.body, ReplyBody::Null);
    }

    #[test]
    fn test_synthesized_reply_has_null_body() {
        let reply = Reply::synthesized(code::NO_RELAY);
        assert!(!reply.is_ok());
        assert_eq!(reply.code, code::NO_RELAY);
        assert_eq!(reply.body, ReplyBody::Null);
    }

    #[test]
    fn test_fail_reason_codes_distinct() {
        let reasons = [
            FailReason::NoRelay,
            FailReason::Decode,
            FailReason::Timeout,
            FailReason::Rejected,
            FailReason::Cancelled,
        ];
        for (i, a) in reasons.iter().enumerate() {
            for b in &reasons[i + 1..] {
                assert_ne!(a.reply_code(), b.reply_code());
            }
        }
    }

    #[test]
    fn test_reply_serde_roundtrip() {
        let reply = Reply {
            code: 0,
            aux: 7,
            body: ReplyBody::Status(vec![StatusEntry {
                name: "17.svr01".into(),
                attrs: vec![("job_state".into(), "R".into())],
            }]),
        };
        let json = serde_json::to_vec(&reply).expect("serialize");
        let decoded: Reply = serde_json::from_slice(&json).expect("deserialize");
        assert_eq!(reply, decoded);
    }
}
