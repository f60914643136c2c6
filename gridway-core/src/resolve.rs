//! Hostname resolution with transient/permanent error classification.
//!
//! Destination names are resolved to [`NodeAddress`]es before connecting.
//! Resolution failures split into two classes: [`ResolveError::Retryable`]
//! (resolver temporarily unavailable, worth retrying later) and
//! [`ResolveError::Fatal`] (no such host, never retried). The retry manager
//! keys its behavior entirely off this classification.

use std::net::ToSocketAddrs;

use thiserror::Error;

use crate::types::NodeAddress;

/// Resolution failure, split by whether a later retry could succeed.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    /// The resolver is temporarily unable to answer; retry later.
    #[error("temporary resolution failure for {name}: {detail}")]
    Retryable {
        /// The name that failed to resolve.
        name: String,
        /// Resolver-specific detail.
        detail: String,
    },

    /// The name does not resolve and never will without operator action.
    #[error("unknown host {name}")]
    Fatal {
        /// The name that failed to resolve.
        name: String,
    },
}

impl ResolveError {
    /// Whether a later retry of the same resolution could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ResolveError::Retryable { .. })
    }
}

/// Provider trait for resolving destination names to addresses.
pub trait HostResolver: Clone {
    /// Resolve a `host` or `host:port` name to a node address.
    ///
    /// When the name carries no port, `default_port` is used.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Retryable`] or [`ResolveError::Fatal`]
    /// according to the failure class.
    fn resolve(&self, name: &str, default_port: u16) -> Result<NodeAddress, ResolveError>;
}

/// Resolver backed by the system resolver via [`std::net::ToSocketAddrs`].
///
/// The system resolver does not distinguish "temporarily unavailable" from
/// "no such host" portably; an I/O error from the lookup is treated as
/// retryable and an empty answer as fatal.
#[derive(Debug, Clone, Default)]
pub struct StdResolver;

impl StdResolver {
    /// Create a new system resolver.
    pub fn new() -> Self {
        Self
    }
}

impl HostResolver for StdResolver {
    fn resolve(&self, name: &str, default_port: u16) -> Result<NodeAddress, ResolveError> {
        // Already an address literal? Avoid the resolver round trip.
        if let Ok(addr) = NodeAddress::parse(name) {
            return Ok(addr);
        }

        let query = if name.contains(':') {
            name.to_string()
        } else {
            format!("{}:{}", name, default_port)
        };

        match query.to_socket_addrs() {
            Ok(mut addrs) => match addrs.next() {
                Some(sa) => Ok(NodeAddress::new(sa.ip(), sa.port())),
                None => Err(ResolveError::Fatal {
                    name: name.to_string(),
                }),
            },
            Err(e) => Err(ResolveError::Retryable {
                name: name.to_string(),
                detail: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_resolve_address_literal() {
        let resolver = StdResolver::new();
        let addr = resolver.resolve("127.0.0.1:15001", 15001).expect("resolve");
        assert_eq!(addr.ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(addr.port, 15001);
    }

    #[test]
    fn test_resolve_localhost_default_port() {
        let resolver = StdResolver::new();
        let addr = resolver.resolve("localhost", 15001).expect("resolve");
        assert_eq!(addr.port, 15001);
    }

    #[test]
    fn test_retryable_classification() {
        let err = ResolveError::Retryable {
            name: "x".into(),
            detail: "resolver down".into(),
        };
        assert!(err.is_retryable());

        let err = ResolveError::Fatal { name: "x".into() };
        assert!(!err.is_retryable());
    }
}
