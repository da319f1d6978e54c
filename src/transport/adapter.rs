//! Connection setup and socket I/O with download-level error mapping.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, instrument, trace, warn};

use super::network::{Network, OpenError, Socket};
use super::{AddressFamily, SocketOption};
use crate::download::{DownloadError, HostOptions, Protocol};

/// Family order used when the target does not pin one.
const FAMILY_PREFERENCE: [AddressFamily; 2] = [AddressFamily::Ipv6, AddressFamily::Ipv4];

/// Opens connections on a [`Network`].
#[derive(Clone)]
pub struct Transport {
    network: Arc<dyn Network>,
    connect_timeout: Duration,
    send_timeout: Duration,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("connect_timeout", &self.connect_timeout)
            .field("send_timeout", &self.send_timeout)
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Creates a transport over `network`.
    #[must_use]
    pub fn new(network: Arc<dyn Network>, connect_timeout: Duration, send_timeout: Duration) -> Self {
        Self {
            network,
            connect_timeout,
            send_timeout,
        }
    }

    /// Resolves `host`, opens a socket, configures it and connects.
    ///
    /// Without a pinned family IPv6 is tried first and IPv4 second; a family
    /// that fails to resolve, to open or to connect falls through to the
    /// next one. A failing socket option aborts immediately.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::HostUnreachable`] when no family resolves or accepts
    ///   the connection.
    /// - [`DownloadError::AddressFamilyUnsupported`] when every resolved
    ///   family is unsupported by the socket layer.
    /// - [`DownloadError::ProtocolUnsupported`] when the socket layer cannot
    ///   open `protocol` sockets.
    /// - [`DownloadError::Socket`] when a socket option is rejected.
    #[instrument(skip(self, options, recv_timeout))]
    pub async fn connect(
        &self,
        host: &str,
        port: u16,
        protocol: Protocol,
        options: &HostOptions,
        recv_timeout: Duration,
    ) -> Result<Connection, DownloadError> {
        let families: &[AddressFamily] = match &options.family {
            Some(family) => std::slice::from_ref(family),
            None => &FAMILY_PREFERENCE,
        };
        let socket_options = socket_options(host, protocol, options, self.send_timeout, recv_timeout);

        let mut last_error = None;
        for &family in families {
            let addr = match self.network.resolve(host, port, family).await {
                Ok(addrs) => match addrs.first() {
                    Some(addr) => *addr,
                    None => {
                        debug!(%family, "no addresses");
                        continue;
                    }
                },
                Err(e) => {
                    debug!(%family, error = %e, "resolution failed");
                    continue;
                }
            };

            let mut socket = match self.network.open(family, protocol) {
                Ok(socket) => socket,
                Err(OpenError::FamilyUnsupported(_)) => {
                    debug!(%family, "address family not supported by socket layer");
                    last_error = Some(DownloadError::address_family_unsupported(host));
                    continue;
                }
                Err(OpenError::ProtocolUnsupported(p)) => {
                    warn!(protocol = %p, "socket layer cannot open socket");
                    return Err(DownloadError::protocol_unsupported(p.to_string()));
                }
                Err(OpenError::Io(e)) => {
                    warn!(%family, error = %e, "failed to open socket");
                    last_error = Some(DownloadError::host_unreachable(host));
                    continue;
                }
            };

            for option in &socket_options {
                trace!(option = option.name(), "setting socket option");
                if let Err(e) = socket.set_option(option) {
                    warn!(option = option.name(), error = %e, "failed to set socket option");
                    close_quietly(socket.as_mut());
                    return Err(DownloadError::socket(option.name(), e.to_string()));
                }
            }

            debug!(%addr, "connecting");
            match timeout(self.connect_timeout, socket.connect(addr)).await {
                Ok(Ok(())) => {
                    debug!(%addr, "connected");
                    return Ok(Connection {
                        socket,
                        protocol,
                        peer: addr,
                        send_timeout: self.send_timeout,
                        closed: false,
                    });
                }
                Ok(Err(e)) => {
                    warn!(%addr, error = %e, "connect failed");
                }
                Err(_) => {
                    warn!(%addr, timeout = ?self.connect_timeout, "connect timed out");
                }
            }
            close_quietly(socket.as_mut());
            last_error = Some(DownloadError::host_unreachable(host));
        }

        Err(last_error.unwrap_or_else(|| DownloadError::host_unreachable(host)))
    }
}

/// Socket options in the order they are applied.
fn socket_options(
    host: &str,
    protocol: Protocol,
    options: &HostOptions,
    send_timeout: Duration,
    recv_timeout: Duration,
) -> Vec<SocketOption> {
    let mut list = Vec::new();
    if let Some(pdn) = options.pdn_id {
        list.push(SocketOption::BindToPdn(pdn));
    }
    if protocol.is_secure() {
        list.push(SocketOption::PeerVerify(options.peer_verify));
        list.push(SocketOption::SecTagList(options.sec_tags.clone()));
        if options.hostname_check {
            list.push(SocketOption::Hostname(host.to_string()));
        }
        if protocol == Protocol::Dtls && options.dtls_cid {
            list.push(SocketOption::DtlsConnectionId);
        }
    }
    list.push(SocketOption::SendTimeout(send_timeout));
    list.push(SocketOption::RecvTimeout(recv_timeout));
    list
}

fn close_quietly(socket: &mut dyn Socket) {
    if let Err(e) = socket.close() {
        debug!(error = %e, "socket close failed");
    }
}

/// Maps a socket error during a transfer to a download error.
fn transfer_error(err: &io::Error, operation: &'static str) -> DownloadError {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => DownloadError::timeout(operation),
        io::ErrorKind::UnexpectedEof => DownloadError::PeerClosed,
        _ => DownloadError::ConnectionReset,
    }
}

/// An open connection.
///
/// Closing is idempotent and also happens on drop.
pub struct Connection {
    socket: Box<dyn Socket>,
    protocol: Protocol,
    peer: SocketAddr,
    send_timeout: Duration,
    closed: bool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("protocol", &self.protocol)
            .field("peer", &self.peer)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Protocol this connection speaks.
    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Remote address.
    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Sends all of `bytes`, looping over partial sends.
    ///
    /// # Errors
    ///
    /// [`DownloadError::Timeout`] if a send call stalls past the send
    /// timeout, [`DownloadError::ConnectionReset`] if the socket fails.
    pub async fn send(&mut self, bytes: &[u8]) -> Result<usize, DownloadError> {
        let mut remaining = bytes;
        while !remaining.is_empty() {
            let sent = match timeout(self.send_timeout, self.socket.send(remaining)).await {
                Err(_) => return Err(DownloadError::timeout("sending")),
                Ok(Err(e)) => {
                    debug!(error = %e, "send failed");
                    return Err(transfer_error(&e, "sending"));
                }
                Ok(Ok(0)) => return Err(DownloadError::ConnectionReset),
                Ok(Ok(n)) => n.min(remaining.len()),
            };
            remaining = &remaining[sent..];
        }
        trace!(len = bytes.len(), "sent");
        Ok(bytes.len())
    }

    /// Receives once into `buf`.
    ///
    /// # Errors
    ///
    /// [`DownloadError::Timeout`] when nothing arrives within `limit`,
    /// [`DownloadError::PeerClosed`] on a zero-length read and
    /// [`DownloadError::ConnectionReset`] on a socket failure.
    pub async fn receive(&mut self, buf: &mut [u8], limit: Duration) -> Result<usize, DownloadError> {
        match timeout(limit, self.socket.recv(buf)).await {
            Err(_) => Err(DownloadError::timeout("receiving")),
            Ok(Err(e)) => {
                debug!(error = %e, "recv failed");
                Err(transfer_error(&e, "receiving"))
            }
            Ok(Ok(0)) => Err(DownloadError::PeerClosed),
            Ok(Ok(n)) => {
                trace!(len = n, "received");
                Ok(n)
            }
        }
    }

    /// Closes the socket. Further calls do nothing.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            debug!(peer = %self.peer, "closing connection");
            close_quietly(self.socket.as_mut());
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PeerVerify;

    const SEND: Duration = Duration::from_secs(30);
    const RECV: Duration = Duration::from_secs(4);

    fn names(list: &[SocketOption]) -> Vec<&'static str> {
        list.iter().map(SocketOption::name).collect()
    }

    #[test]
    fn test_socket_options_plain_udp_with_pdn() {
        let opts = HostOptions::default().with_pdn_id(1);
        let list = socket_options("example.com", Protocol::Udp, &opts, SEND, RECV);
        assert_eq!(names(&list), ["SO_BINDTOPDN", "SO_SNDTIMEO", "SO_RCVTIMEO"]);
        assert_eq!(list[2], SocketOption::RecvTimeout(RECV));
    }

    #[test]
    fn test_socket_options_dtls_order() {
        let opts = HostOptions {
            hostname_check: false,
            ..HostOptions::default()
        }
        .with_pdn_id(1)
        .with_sec_tags(vec![1, 2, 3])
        .with_dtls_cid(true);
        let list = socket_options("example.com", Protocol::Dtls, &opts, SEND, RECV);
        assert_eq!(
            names(&list),
            [
                "SO_BINDTOPDN",
                "TLS_PEER_VERIFY",
                "TLS_SEC_TAG_LIST",
                "TLS_DTLS_CID",
                "SO_SNDTIMEO",
                "SO_RCVTIMEO",
            ]
        );
        assert_eq!(list[1], SocketOption::PeerVerify(PeerVerify::Required));
        assert_eq!(list[2], SocketOption::SecTagList(vec![1, 2, 3]));
    }

    #[test]
    fn test_socket_options_tls_hostname() {
        let opts = HostOptions::default().with_sec_tags(vec![7]).with_dtls_cid(true);
        let list = socket_options("example.com", Protocol::Tls, &opts, SEND, RECV);
        assert!(list.contains(&SocketOption::Hostname("example.com".to_string())));
        // Connection ids are DTLS only.
        assert!(!list.contains(&SocketOption::DtlsConnectionId));
    }

    #[test]
    fn test_transfer_error_mapping() {
        let timed_out = io::Error::from(io::ErrorKind::TimedOut);
        assert_eq!(
            transfer_error(&timed_out, "receiving"),
            DownloadError::timeout("receiving")
        );
        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        assert_eq!(transfer_error(&reset, "sending"), DownloadError::ConnectionReset);
        let other = io::Error::other("EBADF");
        assert_eq!(transfer_error(&other, "sending"), DownloadError::ConnectionReset);
    }
}
