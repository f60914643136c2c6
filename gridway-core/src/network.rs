//! Network provider abstraction.
//!
//! Trait-based networking that allows swapping real Tokio sockets for
//! in-memory transports in tests. This is the "connect capability" the relay
//! consumes: it yields a byte stream or an I/O error that the caller
//! classifies as retryable or fatal.

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

/// Provider trait for creating network connections and listeners.
///
/// Single-threaded design, so no Send bounds. Clone allows sharing one
/// provider across every peer.
#[async_trait(?Send)]
pub trait NetworkProvider: Clone {
    /// The stream type for this provider.
    type Stream: AsyncRead + AsyncWrite + Unpin + 'static;
    /// The listener type for this provider.
    type Listener: NetListener<Stream = Self::Stream> + 'static;

    /// Create a listener bound to the given address.
    async fn bind(&self, addr: &str) -> io::Result<Self::Listener>;

    /// Connect to a remote address.
    async fn connect(&self, addr: &str) -> io::Result<Self::Stream>;
}

/// Trait for listeners that accept incoming connections.
#[async_trait(?Send)]
pub trait NetListener {
    /// The stream type this listener produces.
    type Stream: AsyncRead + AsyncWrite + Unpin + 'static;

    /// Accept a single incoming connection.
    ///
    /// Returns the stream together with the remote address.
    async fn accept(&self) -> io::Result<(Self::Stream, String)>;

    /// Get the local address this listener is bound to.
    fn local_addr(&self) -> io::Result<String>;
}

/// Real Tokio networking implementation.
#[derive(Debug, Clone)]
pub struct TokioNetworkProvider;

impl TokioNetworkProvider {
    /// Create a new Tokio network provider.
    pub fn new() -> Self {
        Self
    }
}

impl Default for TokioNetworkProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl NetworkProvider for TokioNetworkProvider {
    type Stream = tokio::net::TcpStream;
    type Listener = TokioListener;

    async fn bind(&self, addr: &str) -> io::Result<Self::Listener> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        Ok(TokioListener { inner: listener })
    }

    async fn connect(&self, addr: &str) -> io::Result<Self::Stream> {
        tokio::net::TcpStream::connect(addr).await
    }
}

/// Wrapper for Tokio's TcpListener to implement [`NetListener`].
#[derive(Debug)]
pub struct TokioListener {
    inner: tokio::net::TcpListener,
}

#[async_trait(?Send)]
impl NetListener for TokioListener {
    type Stream = tokio::net::TcpStream;

    async fn accept(&self) -> io::Result<(Self::Stream, String)> {
        let (stream, addr) = self.inner.accept().await?;
        Ok((stream, addr.to_string()))
    }

    fn local_addr(&self) -> io::Result<String> {
        Ok(self.inner.local_addr()?.to_string())
    }
}
