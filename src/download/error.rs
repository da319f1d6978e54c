//! Error types for the download module.
//!
//! Two families of errors exist:
//! - [`ClientError`] is returned synchronously by the [`Client`](super::Client)
//!   API and never travels through the event sink.
//! - [`DownloadError`] is what the engine reports through
//!   [`Event::Error`](super::Event::Error) once a download is under way.
//!
//! Raw socket and parser errors are translated into these variants before
//! they reach the caller.

use thiserror::Error;

/// Classification of a [`DownloadError`], used by the engine to decide
/// whether a reconnect is offered to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Resolution or connection setup failed; the download does not start
    /// (or does not resume) and no reconnect is attempted.
    Connection,

    /// Transport fault that may go away on a fresh connection.
    ///
    /// The engine offers a reconnect-and-resume unless the caller refuses it.
    Transient,

    /// The byte stream itself is unusable. Terminal, no reconnect.
    Protocol,
}

/// Errors surfaced through the event sink while a download is running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    /// The host name could not be resolved, or no resolved address accepted
    /// a connection.
    #[error("host unreachable: {host}")]
    HostUnreachable {
        /// Host name as given in the locator.
        host: String,
    },

    /// The socket layer does not support the address family that the host
    /// resolved to.
    #[error("address family not supported for {host}")]
    AddressFamilyUnsupported {
        /// Host name as given in the locator.
        host: String,
    },

    /// The socket layer cannot open a socket for the selected protocol, or a
    /// redirect pointed at an unknown scheme.
    #[error("protocol not supported: {protocol}")]
    ProtocolUnsupported {
        /// Protocol or scheme label.
        protocol: String,
    },

    /// A send or receive did not complete in time.
    #[error("timeout while {operation}")]
    Timeout {
        /// What the engine was doing, e.g. `"receiving"`.
        operation: &'static str,
    },

    /// The connection was reset, or a socket call failed mid-transfer.
    #[error("connection reset")]
    ConnectionReset,

    /// The peer closed the connection (zero-length read).
    #[error("peer closed connection")]
    PeerClosed,

    /// The response could not be interpreted.
    #[error("malformed response: {reason}")]
    Malformed {
        /// Human-readable parse failure.
        reason: String,
    },

    /// A response header or block did not fit in the receive buffer.
    #[error("response does not fit the {capacity}-byte receive buffer")]
    BufferOverflow {
        /// Receive buffer capacity in bytes.
        capacity: usize,
    },

    /// The server kept redirecting.
    #[error("too many redirects (limit {limit})")]
    TooManyRedirects {
        /// Configured redirect limit.
        limit: u8,
    },

    /// A socket could not be configured before connecting.
    #[error("failed to set socket option {option}: {reason}")]
    Socket {
        /// Option that failed.
        option: &'static str,
        /// Reason reported by the socket layer.
        reason: String,
    },
}

impl DownloadError {
    /// Creates a host-unreachable error.
    pub fn host_unreachable(host: impl Into<String>) -> Self {
        Self::HostUnreachable { host: host.into() }
    }

    /// Creates an address-family error.
    pub fn address_family_unsupported(host: impl Into<String>) -> Self {
        Self::AddressFamilyUnsupported { host: host.into() }
    }

    /// Creates a protocol-unsupported error.
    pub fn protocol_unsupported(protocol: impl Into<String>) -> Self {
        Self::ProtocolUnsupported {
            protocol: protocol.into(),
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(operation: &'static str) -> Self {
        Self::Timeout { operation }
    }

    /// Creates a malformed-response error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    /// Creates a socket-option error.
    pub fn socket(option: &'static str, reason: impl Into<String>) -> Self {
        Self::Socket {
            option,
            reason: reason.into(),
        }
    }

    /// Classifies this error for the engine's recovery decision.
    ///
    /// | Error | Kind |
    /// |-------|------|
    /// | HostUnreachable, AddressFamilyUnsupported, ProtocolUnsupported, Socket | Connection |
    /// | Timeout, ConnectionReset, PeerClosed | Transient |
    /// | Malformed, BufferOverflow, TooManyRedirects | Protocol |
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::HostUnreachable { .. }
            | Self::AddressFamilyUnsupported { .. }
            | Self::ProtocolUnsupported { .. }
            | Self::Socket { .. } => FailureKind::Connection,
            Self::Timeout { .. } | Self::ConnectionReset | Self::PeerClosed => {
                FailureKind::Transient
            }
            Self::Malformed { .. } | Self::BufferOverflow { .. } | Self::TooManyRedirects { .. } => {
                FailureKind::Protocol
            }
        }
    }

    /// Returns true when the engine may offer a reconnect for this error.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        self.kind() == FailureKind::Transient
    }
}

/// Errors returned synchronously by the client API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// A required argument is missing or malformed.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with the argument.
        reason: String,
    },

    /// A download is already in flight on this client.
    #[error("a download is already in progress")]
    AlreadyInProgress,

    /// The requested receive buffer exceeds the supported maximum.
    #[error("receive buffer of {requested} bytes exceeds the maximum of {max}")]
    BufferTooLarge {
        /// Requested capacity.
        requested: usize,
        /// Largest supported capacity.
        max: usize,
    },

    /// The locator names a scheme this client does not speak.
    #[error("protocol not supported: {scheme}")]
    ProtocolUnsupported {
        /// The unrecognized scheme.
        scheme: String,
    },

    /// The worker task has exited; the client can no longer be used.
    #[error("download worker is not running")]
    WorkerStopped,
}

impl ClientError {
    /// Creates an invalid-argument error.
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Creates a protocol-unsupported error.
    pub fn protocol_unsupported(scheme: impl Into<String>) -> Self {
        Self::ProtocolUnsupported {
            scheme: scheme.into(),
        }
    }
}
