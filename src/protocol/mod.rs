//! Protocol codecs.
//!
//! The engine speaks to exactly two wire protocols through one trait,
//! [`ProtocolCodec`]. A codec is selected once per download from the
//! target's [`Protocol`](crate::Protocol) and lives until the download ends,
//! so state such as the total size survives reconnects.
//!
//! Codecs never touch sockets: they build request bytes and interpret the
//! receive buffer the engine hands them.

pub mod coap;
pub mod http;

use std::ops::Range;
use std::time::Duration;

use crate::download::{ClientConfig, DownloadError, HostOptions, Locator, Protocol};

pub use coap::CoapCodec;
pub use http::HttpCodec;

/// What the codec made of the bytes currently buffered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The header or block is incomplete. Stream protocols keep the buffered
    /// bytes and receive more; datagram protocols drop the datagram and
    /// wait for the next one.
    NeedMoreData,

    /// A payload slice is ready.
    PayloadReady {
        /// Payload bytes within the buffer; empty for duplicates.
        payload: Range<usize>,
        /// Bytes to drop from the front of the buffer once the payload has
        /// been forwarded.
        consumed: usize,
        /// The block was already accounted for and must not be forwarded.
        duplicate: bool,
    },

    /// The server moved the resource to this location.
    Redirect(String),

    /// The stream cannot be interpreted.
    Malformed(String),
}

/// What to do when a receive timed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retransmission {
    /// Send these bytes again and keep waiting.
    Resend(Vec<u8>),
    /// Give up and report a timeout.
    GiveUp,
}

/// Request building and response interpretation for one protocol.
pub trait ProtocolCodec: Send + Sync {
    /// Builds the request for the data following `progress`.
    ///
    /// Resets all per-response parse state.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Malformed`] when the target cannot be
    /// expressed as a request of this protocol.
    fn build_request(&mut self, target: &Locator, progress: usize) -> Result<Vec<u8>, DownloadError>;

    /// Interprets the buffered bytes. `progress` is the payload delivered so
    /// far in this download.
    fn on_bytes(&mut self, buf: &[u8], progress: usize) -> Outcome;

    /// Total object size, once known.
    fn total_size(&self) -> Option<usize>;

    /// True when the last payload completed the current request and the
    /// next chunk needs a new one.
    fn request_owed(&self) -> bool;

    /// True when the server announced it will close the connection.
    fn server_requests_close(&self) -> bool;

    /// Timeout for the next receive call.
    fn recv_timeout(&self) -> Duration;

    /// Called when a receive timed out.
    fn retransmission_due(&mut self) -> Retransmission;
}

/// Creates the codec for `protocol`.
#[must_use]
pub fn codec_for(
    protocol: Protocol,
    config: &ClientConfig,
    options: &HostOptions,
) -> Box<dyn ProtocolCodec> {
    if protocol.is_datagram() {
        Box::new(CoapCodec::new(config.coap.clone()))
    } else {
        Box::new(HttpCodec::new(config, options))
    }
}
