//! Transport adapter and the socket layer it sits on.
//!
//! The socket layer itself (name resolution, sockets, TLS/DTLS session
//! setup) is an external collaborator reached through the [`Network`] and
//! [`Socket`] traits, shaped after the BSD socket calls it stands for:
//! `getaddrinfo`, `socket`, `setsockopt`, `connect`, `send`, `recv`,
//! `close`. [`TokioNetwork`] is the stock implementation on top of tokio;
//! platforms with offloaded TLS/DTLS or PDN binding supply their own.
//!
//! [`Transport`] is the adapter the engine talks to. It owns the resolution
//! order, socket option sequence, send loop and receive timeouts, and it
//! translates every socket error into a [`DownloadError`](crate::DownloadError).

mod adapter;
mod network;
mod tokio_net;

use std::fmt;
use std::time::Duration;

pub use adapter::{Connection, Transport};
pub use network::{Network, OpenError, Socket};
pub use tokio_net::TokioNetwork;

/// Address family of a resolved host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    /// IPv4.
    Ipv4,
    /// IPv6.
    Ipv6,
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ipv4 => "IPv4",
            Self::Ipv6 => "IPv6",
        })
    }
}

/// TLS/DTLS peer verification level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerVerify {
    /// Do not verify the peer.
    None,
    /// Verify when the peer presents a certificate.
    Optional,
    /// Fail the handshake unless the peer verifies.
    Required,
}

impl PeerVerify {
    /// Numeric value used by BSD-style TLS socket options.
    #[must_use]
    pub fn as_raw(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Optional => 1,
            Self::Required => 2,
        }
    }
}

/// Socket options applied before connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketOption {
    /// Bind to a packet data network context.
    BindToPdn(u8),
    /// TLS/DTLS peer verification.
    PeerVerify(PeerVerify),
    /// Security credential tags for the handshake.
    SecTagList(Vec<u32>),
    /// Host name checked against the server certificate.
    Hostname(String),
    /// Request a DTLS connection id.
    DtlsConnectionId,
    /// Socket-level send timeout.
    SendTimeout(Duration),
    /// Socket-level receive timeout.
    RecvTimeout(Duration),
}

impl SocketOption {
    /// BSD-style option name, for logs and errors.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::BindToPdn(_) => "SO_BINDTOPDN",
            Self::PeerVerify(_) => "TLS_PEER_VERIFY",
            Self::SecTagList(_) => "TLS_SEC_TAG_LIST",
            Self::Hostname(_) => "TLS_HOSTNAME",
            Self::DtlsConnectionId => "TLS_DTLS_CID",
            Self::SendTimeout(_) => "SO_SNDTIMEO",
            Self::RecvTimeout(_) => "SO_RCVTIMEO",
        }
    }
}
