//! Client-wide configuration and per-target host options.

use std::time::Duration;

use super::constants::{
    COAP_ACK_RANDOM_PERCENT, COAP_ACK_TIMEOUT, COAP_BLOCK_SIZE, COAP_MAX_RETRANSMISSIONS,
    CONNECT_TIMEOUT, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_REDIRECTS, HTTP_RECV_TIMEOUT,
    MAX_BUFFER_SIZE, SEND_TIMEOUT,
};
use super::error::ClientError;
use crate::transport::{AddressFamily, PeerVerify};

/// CoAP transmission parameters (RFC 7252 §4.8) and block size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapParams {
    /// Block2 size in bytes: a power of two between 16 and 1024.
    pub block_size: u16,
    /// Initial retransmission timeout.
    pub ack_timeout: Duration,
    /// Upper bound of the random factor applied to `ack_timeout`, in percent
    /// (100 disables randomization).
    pub ack_random_percent: u32,
    /// Retransmissions before the request is given up.
    pub max_retransmissions: u8,
}

impl Default for CoapParams {
    fn default() -> Self {
        Self {
            block_size: COAP_BLOCK_SIZE,
            ack_timeout: COAP_ACK_TIMEOUT,
            ack_random_percent: COAP_ACK_RANDOM_PERCENT,
            max_retransmissions: COAP_MAX_RETRANSMISSIONS,
        }
    }
}

/// Configuration fixed for the lifetime of a [`Client`](super::Client).
///
/// # Default Values
///
/// - `buffer_size`: 2048 bytes
/// - `connect_timeout`, `send_timeout`, `http_recv_timeout`: 30 seconds
/// - `allow_range_requests`: true
/// - `max_redirects`: 5
/// - `coap`: 512-byte blocks, 2 s ACK timeout, 4 retransmissions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Receive buffer capacity. Every incoming byte lands here.
    pub buffer_size: usize,
    /// Timeout for establishing a connection.
    pub connect_timeout: Duration,
    /// Timeout for flushing one request.
    pub send_timeout: Duration,
    /// Timeout for a single HTTP receive call.
    pub http_recv_timeout: Duration,
    /// Whether HTTP requests may carry a `Range` header.
    ///
    /// When disabled, every reconnect restarts the whole transfer and
    /// progress goes back to zero.
    pub allow_range_requests: bool,
    /// Redirects followed within one download.
    pub max_redirects: u8,
    /// CoAP transmission parameters.
    pub coap: CoapParams,
    /// Dump request and response headers at trace level.
    pub log_headers: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            connect_timeout: CONNECT_TIMEOUT,
            send_timeout: SEND_TIMEOUT,
            http_recv_timeout: HTTP_RECV_TIMEOUT,
            allow_range_requests: true,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            coap: CoapParams::default(),
            log_headers: false,
        }
    }
}

impl ClientConfig {
    /// Sets the receive buffer capacity.
    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Sets the CoAP block size.
    #[must_use]
    pub fn with_coap_block_size(mut self, block_size: u16) -> Self {
        self.coap.block_size = block_size;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidArgument`] for a zero-sized buffer, zero
    /// timeouts or an unsupported CoAP block size, and
    /// [`ClientError::BufferTooLarge`] for a buffer above the maximum.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.buffer_size == 0 {
            return Err(ClientError::invalid_argument("buffer size must be non-zero"));
        }
        if self.buffer_size > MAX_BUFFER_SIZE {
            return Err(ClientError::BufferTooLarge {
                requested: self.buffer_size,
                max: MAX_BUFFER_SIZE,
            });
        }
        for (name, value) in [
            ("connect_timeout", self.connect_timeout),
            ("send_timeout", self.send_timeout),
            ("http_recv_timeout", self.http_recv_timeout),
            ("coap.ack_timeout", self.coap.ack_timeout),
        ] {
            if value.is_zero() {
                return Err(ClientError::invalid_argument(format!(
                    "{name} must be non-zero"
                )));
            }
        }
        let block = self.coap.block_size;
        if !block.is_power_of_two() || !(16..=1024).contains(&block) {
            return Err(ClientError::invalid_argument(format!(
                "CoAP block size {block} is not a power of two in 16..=1024"
            )));
        }
        if self.coap.ack_random_percent < 100 {
            return Err(ClientError::invalid_argument(
                "coap.ack_random_percent must be at least 100",
            ));
        }
        Ok(())
    }
}

/// Options attached to a download target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostOptions {
    /// Security credential tags. A non-empty list upgrades scheme-less
    /// locators to TLS and is required for `https`/`coaps`.
    pub sec_tags: Vec<u32>,
    /// Peer verification level for TLS/DTLS sockets.
    pub peer_verify: PeerVerify,
    /// Verify the server certificate against the host name.
    pub hostname_check: bool,
    /// HTTP fragment size override: when non-zero, each request asks for at
    /// most this many bytes.
    pub range_override: usize,
    /// Packet data network to bind the socket to.
    pub pdn_id: Option<u8>,
    /// Pin the address family instead of trying IPv6 first.
    pub family: Option<AddressFamily>,
    /// Request a DTLS connection id.
    pub dtls_cid: bool,
    /// Keep the socket open after the download so the next download to the
    /// same host can reuse it.
    pub keep_connection: bool,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            sec_tags: Vec::new(),
            peer_verify: PeerVerify::Required,
            hostname_check: true,
            range_override: 0,
            pdn_id: None,
            family: None,
            dtls_cid: false,
            keep_connection: false,
        }
    }
}

impl HostOptions {
    /// Sets the security credential tags.
    #[must_use]
    pub fn with_sec_tags(mut self, sec_tags: impl Into<Vec<u32>>) -> Self {
        self.sec_tags = sec_tags.into();
        self
    }

    /// Sets the HTTP fragment size override.
    #[must_use]
    pub fn with_range_override(mut self, range_override: usize) -> Self {
        self.range_override = range_override;
        self
    }

    /// Binds sockets to the given packet data network.
    #[must_use]
    pub fn with_pdn_id(mut self, pdn_id: u8) -> Self {
        self.pdn_id = Some(pdn_id);
        self
    }

    /// Pins the address family.
    #[must_use]
    pub fn with_family(mut self, family: AddressFamily) -> Self {
        self.family = Some(family);
        self
    }

    /// Requests a DTLS connection id.
    #[must_use]
    pub fn with_dtls_cid(mut self, dtls_cid: bool) -> Self {
        self.dtls_cid = dtls_cid;
        self
    }

    /// Keeps the connection open after the download.
    #[must_use]
    pub fn with_keep_connection(mut self, keep_connection: bool) -> Self {
        self.keep_connection = keep_connection;
        self
    }

    /// Returns true when at least one security tag is configured.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.sec_tags.is_empty()
    }
}
