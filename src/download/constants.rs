//! Constants for the download module (timeouts, buffer limits, CoAP defaults).

use std::time::Duration;

/// Default connect timeout (30 seconds).
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default send timeout (30 seconds).
pub const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Default HTTP receive timeout (30 seconds).
pub const HTTP_RECV_TIMEOUT: Duration = Duration::from_secs(30);

/// Default receive buffer capacity.
pub const DEFAULT_BUFFER_SIZE: usize = 2048;

/// Largest receive buffer a client accepts.
pub const MAX_BUFFER_SIZE: usize = 65_536;

/// Default limit on HTTP redirects followed within one download.
pub const DEFAULT_MAX_REDIRECTS: u8 = 5;

/// Default CoAP block size (Block2 SZX 5).
pub const COAP_BLOCK_SIZE: u16 = 512;

/// Default CoAP `ACK_TIMEOUT` (RFC 7252 §4.8).
pub const COAP_ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Default CoAP `ACK_RANDOM_FACTOR`, in percent.
pub const COAP_ACK_RANDOM_PERCENT: u32 = 150;

/// Default CoAP `MAX_RETRANSMIT`.
pub const COAP_MAX_RETRANSMISSIONS: u8 = 4;

/// Upper bound on a single CoAP retransmission timeout.
pub const COAP_MAX_RETRANSMIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Smallest first payload forwarded over HTTP, so the caller can identify
/// the object type from the first fragment.
pub const MIN_FIRST_FRAGMENT: usize = 32;

/// Receive buffer space reserved for an HTTP response header on top of
/// [`MIN_FIRST_FRAGMENT`].
pub const HTTP_HEADER_ROOM: usize = 96;

/// Receive buffer space reserved for the CoAP header, token and options on
/// top of one block.
pub const COAP_HEADER_ROOM: usize = 64;
