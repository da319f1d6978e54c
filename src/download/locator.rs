//! Locator parsing and protocol selection.
//!
//! A locator has the shape `[scheme://]host[:port][/path]`. The scheme picks
//! the wire protocol:
//!
//! | Scheme | Protocol | Default port |
//! |--------|----------|--------------|
//! | `http` | TCP | 80 |
//! | `https` | TLS | 443 |
//! | `coap` | UDP | 5683 |
//! | `coaps` | DTLS | 5684 |
//! | (none) | TCP, or TLS when security tags are configured | 80 / 443 |

use std::fmt;

use tracing::{debug, trace};
use url::Url;

use super::config::HostOptions;
use super::error::ClientError;

/// Placeholder scheme used while parsing.
///
/// A non-special scheme keeps explicit default ports (`:80`) and accepts
/// schemes the client does not speak, so they can be reported precisely.
const PARSE_SCHEME: &str = "locator";

/// Wire protocol selected for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Plain HTTP over TCP.
    Tcp,
    /// HTTP over TLS.
    Tls,
    /// Plain CoAP over UDP.
    Udp,
    /// CoAP over DTLS.
    Dtls,
}

impl Protocol {
    /// Port used when the locator names none.
    #[must_use]
    pub fn default_port(self) -> u16 {
        match self {
            Self::Tcp => 80,
            Self::Tls => 443,
            Self::Udp => 5683,
            Self::Dtls => 5684,
        }
    }

    /// Returns true for TLS and DTLS.
    #[must_use]
    pub fn is_secure(self) -> bool {
        matches!(self, Self::Tls | Self::Dtls)
    }

    /// Returns true for the datagram protocols (CoAP).
    #[must_use]
    pub fn is_datagram(self) -> bool {
        matches!(self, Self::Udp | Self::Dtls)
    }

    /// Scheme that selects this protocol.
    #[must_use]
    pub fn scheme(self) -> &'static str {
        match self {
            Self::Tcp => "http",
            Self::Tls => "https",
            Self::Udp => "coap",
            Self::Dtls => "coaps",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Tcp => "TCP",
            Self::Tls => "TLS",
            Self::Udp => "UDP",
            Self::Dtls => "DTLS",
        };
        f.write_str(label)
    }
}

/// A parsed resource locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    scheme: Option<String>,
    host: String,
    port: Option<u16>,
    path: String,
}

impl Locator {
    /// Parses a locator string.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidArgument`] when the string is empty or
    /// carries no host.
    ///
    /// # Examples
    ///
    /// ```
    /// use downloader_client::Locator;
    ///
    /// let locator = Locator::parse("coap://example.com/fw/app.bin").unwrap();
    /// assert_eq!(locator.host(), "example.com");
    /// assert_eq!(locator.path(), "fw/app.bin");
    /// ```
    #[tracing::instrument(level = "debug")]
    pub fn parse(input: &str) -> Result<Self, ClientError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ClientError::invalid_argument("locator is empty"));
        }

        let (scheme, rest) = match trimmed.split_once("://") {
            Some((scheme, rest)) => (Some(scheme.to_ascii_lowercase()), rest),
            None => (None, trimmed),
        };

        let url = Url::parse(&format!("{PARSE_SCHEME}://{rest}"))
            .map_err(|e| ClientError::invalid_argument(format!("invalid locator {input}: {e}")))?;

        let host = url
            .host_str()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ClientError::invalid_argument(format!("no host in {input}")))?;

        let mut path = url.path().trim_start_matches('/').to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        trace!(?scheme, %host, port = ?url.port(), %path, "parsed locator");

        Ok(Self {
            scheme,
            host,
            port: url.port(),
            path,
        })
    }

    /// Scheme as written, lowercased. `None` when the locator had none.
    #[must_use]
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    /// Host name or address literal (IPv6 literals without brackets).
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Explicit port, if the locator named one.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Resource path without the leading slash; may be empty.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns a copy of this locator pointing at another resource path.
    #[must_use]
    pub fn with_path(&self, path: &str) -> Self {
        Self {
            path: path.trim_start_matches('/').to_string(),
            ..self.clone()
        }
    }

    /// Selects the wire protocol for this locator.
    ///
    /// # Errors
    ///
    /// - [`ClientError::ProtocolUnsupported`] for an unrecognized scheme.
    /// - [`ClientError::InvalidArgument`] for `https`/`coaps` without
    ///   security tags.
    pub fn protocol(&self, options: &HostOptions) -> Result<Protocol, ClientError> {
        let protocol = match self.scheme.as_deref() {
            None if options.has_credentials() => Protocol::Tls,
            None | Some("http") => Protocol::Tcp,
            Some("https") => Protocol::Tls,
            Some("coap") => Protocol::Udp,
            Some("coaps") => Protocol::Dtls,
            Some(other) => return Err(ClientError::protocol_unsupported(other)),
        };

        if protocol.is_secure() && !options.has_credentials() {
            return Err(ClientError::invalid_argument(format!(
                "no security tag provided for {protocol}"
            )));
        }

        debug!(host = %self.host, %protocol, "selected protocol");
        Ok(protocol)
    }

    /// Port to connect to: explicit, or the protocol default.
    #[must_use]
    pub fn port_or_default(&self, protocol: Protocol) -> u16 {
        self.port.unwrap_or_else(|| protocol.default_port())
    }

    /// Resolves an HTTP `Location` value against this locator.
    ///
    /// Absolute locations replace the whole locator, absolute paths keep the
    /// host, and relative paths replace the last path segment.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidArgument`] when an absolute location
    /// cannot be parsed.
    pub fn redirect(&self, location: &str) -> Result<Self, ClientError> {
        let location = location.trim();
        if location.contains("://") {
            return Self::parse(location);
        }
        if let Some(stripped) = location.strip_prefix('/') {
            return Ok(self.with_path(stripped));
        }
        let base = match self.path.rsplit_once('/') {
            Some((dir, _)) => format!("{dir}/{location}"),
            None => location.to_string(),
        };
        Ok(self.with_path(&base))
    }

    /// Returns true when both locators reach the same endpoint over the same
    /// protocol, so an open connection can be reused.
    #[must_use]
    pub fn same_endpoint(&self, other: &Self, protocol: Protocol, other_protocol: Protocol) -> bool {
        protocol == other_protocol
            && self.host.eq_ignore_ascii_case(&other.host)
            && self.port_or_default(protocol) == other.port_or_default(other_protocol)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scheme) = &self.scheme {
            write!(f, "{scheme}://")?;
        }
        if self.host.contains(':') {
            write!(f, "[{}]", self.host)?;
        } else {
            f.write_str(&self.host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        write!(f, "/{}", self.path)
    }
}
