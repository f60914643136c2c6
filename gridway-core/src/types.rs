//! Core identifier and addressing types.
//!
//! This module provides the fundamental types used across the relay layer:
//! - [`MsgId`]: 128-bit command identifier for multiplexed streams
//! - [`NodeAddress`]: IP address + port of a cluster node
//! - [`JobId`]: identifier of the job a request was issued for
//! - [`ConnId`]: handle of a single-request connection

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// 128-bit command identifier for multiplexed streams.
///
/// A `MsgId` is reserved when a command is sent and travels in the frame
/// header; the matching reply carries it back. The `epoch` half identifies
/// the stream incarnation it was reserved on, the `seq` half is a per-stream
/// monotonic counter, so identifiers stay distinct across reconnects.
///
/// Identifiers carry no meaning beyond equality.
///
/// # Examples
///
/// ```
/// use gridway_core::MsgId;
///
/// let id = MsgId::new(1, 42);
/// assert!(id.is_valid());
/// assert_ne!(id, MsgId::NONE);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MsgId {
    /// Stream incarnation the identifier was reserved on.
    pub epoch: u64,
    /// Per-stream sequence number.
    pub seq: u64,
}

impl MsgId {
    /// The null identifier, used in frames that carry no correlation id
    /// (single-request connections correlate by handle instead).
    pub const NONE: MsgId = MsgId { epoch: 0, seq: 0 };

    /// Create an identifier with explicit parts.
    pub const fn new(epoch: u64, seq: u64) -> Self {
        Self { epoch, seq }
    }

    /// Check whether this is a real identifier (non-null).
    pub const fn is_valid(&self) -> bool {
        self.epoch != 0 || self.seq != 0
    }
}

impl std::fmt::Display for MsgId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}{:016x}", self.epoch, self.seq)
    }
}

/// Network address of a cluster node (IPv4/IPv6 + port).
///
/// # Examples
///
/// ```
/// use gridway_core::NodeAddress;
/// use std::net::{IpAddr, Ipv4Addr};
///
/// let addr = NodeAddress::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 15001);
/// assert_eq!(addr.to_string(), "127.0.0.1:15001");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    /// IP address (IPv4 or IPv6).
    pub ip: IpAddr,
    /// Port number.
    pub port: u16,
}

impl NodeAddress {
    /// Create a new node address.
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    /// Parse from string `ip:port` format.
    ///
    /// Supports both IPv4 (`10.0.0.1:15001`) and IPv6 (`[::1]:15001`)
    /// notation.
    ///
    /// # Errors
    ///
    /// Returns an error if the IP or port cannot be parsed.
    pub fn parse(s: &str) -> Result<Self, NodeAddressParseError> {
        // Handle IPv6 bracket notation [::1]:port
        if let Some(bracket_end) = s.rfind(']') {
            if !s.starts_with('[') {
                return Err(NodeAddressParseError::InvalidIp);
            }
            let ip_str = &s[1..bracket_end];
            let port_str = s
                .get(bracket_end + 2..)
                .ok_or(NodeAddressParseError::MissingPort)?;
            let ip: IpAddr = ip_str
                .parse()
                .map_err(|_| NodeAddressParseError::InvalidIp)?;
            let port: u16 = port_str
                .parse()
                .map_err(|_| NodeAddressParseError::InvalidPort)?;
            Ok(Self::new(ip, port))
        } else {
            let (ip_str, port_str) = s
                .rsplit_once(':')
                .ok_or(NodeAddressParseError::MissingPort)?;
            let ip: IpAddr = ip_str
                .parse()
                .map_err(|_| NodeAddressParseError::InvalidIp)?;
            let port: u16 = port_str
                .parse()
                .map_err(|_| NodeAddressParseError::InvalidPort)?;
            Ok(Self::new(ip, port))
        }
    }
}

impl std::fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(f, "{}:{}", ip, self.port),
            IpAddr::V6(ip) => write!(f, "[{}]:{}", ip, self.port),
        }
    }
}

/// Error parsing a node address from string.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NodeAddressParseError {
    /// The IP address could not be parsed.
    #[error("invalid IP address")]
    InvalidIp,
    /// The port number could not be parsed.
    #[error("invalid port number")]
    InvalidPort,
    /// No port separator (`:`) found in the input.
    #[error("missing port separator")]
    MissingPort,
}

/// Identifier of a batch job.
///
/// Requests issued on behalf of a job are linked to it so the job lifecycle
/// can cancel or await its outstanding requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    /// Create a job identifier from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle of a single-request connection.
///
/// One connection carries exactly one request/reply pair; the reply is
/// correlated by this handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnId(pub u64);

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_msg_id_none_invalid() {
        assert!(!MsgId::NONE.is_valid());
        assert!(MsgId::new(1, 0).is_valid());
        assert!(MsgId::new(0, 1).is_valid());
    }

    #[test]
    fn test_msg_id_display() {
        let id = MsgId::new(0x123456789ABCDEF0, 0xFEDCBA9876543210);
        assert_eq!(id.to_string(), "123456789abcdef0fedcba9876543210");
    }

    #[test]
    fn test_msg_id_serde_roundtrip() {
        let id = MsgId::new(7, 99);
        let json = serde_json::to_string(&id).expect("serialize");
        let decoded: MsgId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(id, decoded);
    }

    #[test]
    fn test_node_address_ipv4() {
        let addr = NodeAddress::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)), 15001);
        assert_eq!(addr.to_string(), "192.168.1.1:15001");
    }

    #[test]
    fn test_node_address_ipv6() {
        let addr = NodeAddress::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 15001);
        assert_eq!(addr.to_string(), "[::1]:15001");
    }

    #[test]
    fn test_node_address_parse_ipv4() {
        let addr = NodeAddress::parse("127.0.0.1:15001").expect("parse");
        assert_eq!(addr.ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(addr.port, 15001);
    }

    #[test]
    fn test_node_address_parse_ipv6() {
        let addr = NodeAddress::parse("[::1]:15001").expect("parse");
        assert_eq!(addr.ip, IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert_eq!(addr.port, 15001);
    }

    #[test]
    fn test_node_address_parse_errors() {
        assert!(NodeAddress::parse("invalid").is_err());
        assert!(NodeAddress::parse("127.0.0.1").is_err()); // missing port
        assert!(NodeAddress::parse("127.0.0.1:abc").is_err()); // invalid port
        assert!(NodeAddress::parse("not_an_ip:15001").is_err()); // invalid IP
    }

    #[test]
    fn test_job_id_display() {
        let job = JobId::new("1234.svr01");
        assert_eq!(job.to_string(), "1234.svr01");
    }
}
