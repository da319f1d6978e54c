//! Socket layer seam.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use thiserror::Error;

use super::{AddressFamily, SocketOption};
use crate::download::Protocol;

/// Why a socket could not be opened.
#[derive(Debug, Error)]
pub enum OpenError {
    /// The socket layer has no support for this address family.
    #[error("address family {0} not supported")]
    FamilyUnsupported(AddressFamily),

    /// The socket layer cannot open sockets of this protocol.
    #[error("protocol {0} not supported")]
    ProtocolUnsupported(Protocol),

    /// Any other failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Name resolution and socket creation.
#[async_trait]
pub trait Network: Send + Sync + 'static {
    /// Resolves `host` to addresses of the given family (`getaddrinfo`).
    ///
    /// An empty list is treated like a resolution failure.
    async fn resolve(
        &self,
        host: &str,
        port: u16,
        family: AddressFamily,
    ) -> io::Result<Vec<SocketAddr>>;

    /// Opens an unconnected socket (`socket`). TLS and DTLS sockets perform
    /// their handshake inside [`Socket::connect`].
    fn open(&self, family: AddressFamily, protocol: Protocol) -> Result<Box<dyn Socket>, OpenError>;
}

/// One socket of the underlying layer.
///
/// `send` and `recv` are single calls: partial sends are returned as such
/// and a `recv` of `Ok(0)` means the peer closed the connection.
#[async_trait]
pub trait Socket: Send {
    /// Applies a socket option (`setsockopt`).
    fn set_option(&mut self, option: &SocketOption) -> io::Result<()>;

    /// Connects to `addr`, including the TLS/DTLS handshake if any.
    async fn connect(&mut self, addr: SocketAddr) -> io::Result<()>;

    /// Sends some of `buf`, returning how many bytes were taken.
    async fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Receives into `buf`, returning how many bytes arrived.
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Closes the socket.
    fn close(&mut self) -> io::Result<()>;
}
