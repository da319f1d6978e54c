//! Socket layer on top of tokio's TCP and UDP sockets.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, trace};

use super::network::{Network, OpenError, Socket};
use super::{AddressFamily, SocketOption};
use crate::download::Protocol;

/// Plain TCP and UDP sockets from tokio.
///
/// TLS, DTLS and PDN binding belong to the platform socket layer: opening a
/// secure socket fails with [`OpenError::ProtocolUnsupported`] and a PDN
/// binding request is rejected as an unsupported option. Socket-level
/// timeouts are accepted and left to the transport's own timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioNetwork;

impl TokioNetwork {
    /// Creates the network.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn family_of(addr: &SocketAddr) -> AddressFamily {
    match addr {
        SocketAddr::V4(_) => AddressFamily::Ipv4,
        SocketAddr::V6(_) => AddressFamily::Ipv6,
    }
}

#[async_trait]
impl Network for TokioNetwork {
    async fn resolve(
        &self,
        host: &str,
        port: u16,
        family: AddressFamily,
    ) -> io::Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await?
            .filter(|addr| family_of(addr) == family)
            .collect();
        trace!(host, %family, count = addrs.len(), "resolved");
        Ok(addrs)
    }

    fn open(&self, family: AddressFamily, protocol: Protocol) -> Result<Box<dyn Socket>, OpenError> {
        if protocol.is_secure() {
            return Err(OpenError::ProtocolUnsupported(protocol));
        }
        Ok(Box::new(TokioSocket {
            family,
            protocol,
            inner: Inner::Unconnected,
        }))
    }
}

enum Inner {
    Unconnected,
    Tcp(TcpStream),
    Udp(UdpSocket),
    Closed,
}

struct TokioSocket {
    family: AddressFamily,
    protocol: Protocol,
    inner: Inner,
}

fn not_connected() -> io::Error {
    io::Error::from(io::ErrorKind::NotConnected)
}

#[async_trait]
impl Socket for TokioSocket {
    fn set_option(&mut self, option: &SocketOption) -> io::Result<()> {
        match option {
            SocketOption::SendTimeout(_) | SocketOption::RecvTimeout(_) => Ok(()),
            other => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("{} is not available on tokio sockets", other.name()),
            )),
        }
    }

    async fn connect(&mut self, addr: SocketAddr) -> io::Result<()> {
        self.inner = match self.protocol {
            Protocol::Tcp => Inner::Tcp(TcpStream::connect(addr).await?),
            Protocol::Udp => {
                let local: SocketAddr = match self.family {
                    AddressFamily::Ipv4 => (Ipv4Addr::UNSPECIFIED, 0).into(),
                    AddressFamily::Ipv6 => (Ipv6Addr::UNSPECIFIED, 0).into(),
                };
                let socket = UdpSocket::bind(local).await?;
                socket.connect(addr).await?;
                Inner::Udp(socket)
            }
            Protocol::Tls | Protocol::Dtls => {
                return Err(io::Error::from(io::ErrorKind::Unsupported));
            }
        };
        debug!(%addr, protocol = %self.protocol, "socket connected");
        Ok(())
    }

    async fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.inner {
            Inner::Tcp(stream) => stream.write(buf).await,
            Inner::Udp(socket) => socket.send(buf).await,
            Inner::Unconnected | Inner::Closed => Err(not_connected()),
        }
    }

    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            Inner::Tcp(stream) => stream.read(buf).await,
            Inner::Udp(socket) => socket.recv(buf).await,
            Inner::Unconnected | Inner::Closed => Err(not_connected()),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        self.inner = Inner::Closed;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_open_rejects_secure_protocols() {
        let net = TokioNetwork::new();
        for protocol in [Protocol::Tls, Protocol::Dtls] {
            assert!(matches!(
                net.open(AddressFamily::Ipv4, protocol),
                Err(OpenError::ProtocolUnsupported(p)) if p == protocol
            ));
        }
    }

    #[test]
    fn test_pdn_binding_is_unsupported() {
        let net = TokioNetwork::new();
        let mut socket = net.open(AddressFamily::Ipv4, Protocol::Tcp).unwrap();
        let err = socket.set_option(&SocketOption::BindToPdn(1)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
        assert!(socket
            .set_option(&SocketOption::RecvTimeout(std::time::Duration::from_secs(1)))
            .is_ok());
    }

    #[tokio::test]
    async fn test_resolve_filters_family() {
        let net = TokioNetwork::new();
        let v4 = net.resolve("127.0.0.1", 80, AddressFamily::Ipv4).await.unwrap();
        assert_eq!(v4, vec!["127.0.0.1:80".parse::<SocketAddr>().unwrap()]);
        let v6 = net.resolve("127.0.0.1", 80, AddressFamily::Ipv6).await.unwrap();
        assert!(v6.is_empty());
    }

    #[tokio::test]
    async fn test_udp_round_trip() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let net = TokioNetwork::new();
        let mut socket = net.open(AddressFamily::Ipv4, Protocol::Udp).unwrap();
        socket.connect(server_addr).await.unwrap();
        assert_eq!(socket.send(b"ping").await.unwrap(), 4);

        let mut buf = [0u8; 16];
        let (n, peer) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        server.send_to(b"pong", peer).await.unwrap();

        let n = socket.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"pong");
        socket.close().unwrap();
        assert_eq!(
            socket.send(b"x").await.unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
    }
}
