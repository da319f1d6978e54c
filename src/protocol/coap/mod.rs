//! CoAP block-wise download codec.
//!
//! Every block is fetched with its own confirmable `GET` carrying a Block2
//! option whose number is derived from the download progress, so resuming
//! after a reconnect needs no extra state. The first request also carries
//! `Size2: 0` to ask the server for the object size.
//!
//! Reliability is handled here rather than by the transport: a receive
//! timeout triggers a retransmission of the same message (same id and
//! token) with exponential backoff, capped at
//! [`COAP_MAX_RETRANSMIT_TIMEOUT`], until the retransmission limit is
//! reached.
//!
//! Responses arriving as separate CON messages are accepted but not
//! acknowledged; the server's own retransmission covers the missing ACK.

pub mod message;

use std::time::Duration;

use rand::Rng;
use tracing::{debug, trace, warn};

use self::message::{Block, CoapOption, Message, MessageType, code, option};
use super::{Outcome, ProtocolCodec, Retransmission};
use crate::download::constants::COAP_MAX_RETRANSMIT_TIMEOUT;
use crate::download::{CoapParams, DownloadError, Locator};

/// CoAP codec state for one download.
#[derive(Debug)]
pub struct CoapCodec {
    params: CoapParams,
    block_size: usize,
    szx: u8,

    message_id: u16,
    token: u32,
    total_size: Option<usize>,

    // Per request.
    request: Vec<u8>,
    retransmissions: u8,
    timeout: Duration,
    request_owed: bool,
}

impl CoapCodec {
    /// Creates a codec with random initial message id and token.
    #[must_use]
    pub fn new(params: CoapParams) -> Self {
        let mut rng = rand::thread_rng();
        let block_size = usize::from(params.block_size);
        let szx = Block::szx_for(params.block_size);
        let timeout = params.ack_timeout;
        Self {
            params,
            block_size,
            szx,
            message_id: rng.r#gen(),
            token: rng.r#gen(),
            total_size: None,
            request: Vec::new(),
            retransmissions: 0,
            timeout,
            request_owed: true,
        }
    }

    /// Block size currently in use. A server may negotiate it down.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// First retransmission timeout: the ACK timeout scaled by a random
    /// factor between 1 and `ack_random_percent / 100`.
    fn initial_timeout(&self) -> Duration {
        let percent = rand::thread_rng().gen_range(100..=self.params.ack_random_percent.max(100));
        (self.params.ack_timeout.saturating_mul(percent) / 100).min(COAP_MAX_RETRANSMIT_TIMEOUT)
    }

    fn token_bytes(&self) -> [u8; 4] {
        self.token.to_be_bytes()
    }
}

impl ProtocolCodec for CoapCodec {
    fn build_request(&mut self, target: &Locator, progress: usize) -> Result<Vec<u8>, DownloadError> {
        let num = u32::try_from(progress / self.block_size)
            .ok()
            .filter(|num| *num <= Block::MAX_NUM)
            .ok_or_else(|| {
                DownloadError::malformed(format!("offset {progress} is beyond the last CoAP block"))
            })?;

        self.message_id = self.message_id.wrapping_add(1);
        self.token = self.token.wrapping_add(1);

        let (path, query) = match target.path().split_once('?') {
            Some((path, query)) => (path, query),
            None => (target.path(), ""),
        };
        let mut options: Vec<CoapOption<'_>> = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| CoapOption::bytes(option::URI_PATH, segment.as_bytes()))
            .collect();
        options.extend(
            query
                .split('&')
                .filter(|arg| !arg.is_empty())
                .map(|arg| CoapOption::bytes(option::URI_QUERY, arg.as_bytes())),
        );
        let block = Block {
            num,
            more: false,
            szx: self.szx,
        };
        options.push(
            block
                .to_option(option::BLOCK2)
                .map_err(|e| DownloadError::malformed(e.to_string()))?,
        );
        if self.total_size.is_none() {
            options.push(CoapOption::uint(option::SIZE2, 0));
        }

        let token = self.token_bytes();
        let request = Message {
            kind: MessageType::Confirmable,
            code: code::GET,
            message_id: self.message_id,
            token: token.as_slice().into(),
            options,
            payload: &[],
        }
        .encode()
        .map_err(|e| DownloadError::malformed(e.to_string()))?;

        debug!(
            block = num,
            block_size = self.block_size,
            message_id = self.message_id,
            "CoAP block request"
        );

        self.request.clone_from(&request);
        self.retransmissions = 0;
        self.timeout = self.initial_timeout();
        self.request_owed = false;
        Ok(request)
    }

    fn on_bytes(&mut self, buf: &[u8], progress: usize) -> Outcome {
        let message = match Message::decode(buf) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, len = buf.len(), "dropping undecodable datagram");
                return Outcome::NeedMoreData;
            }
        };

        if message.kind == MessageType::Reset {
            warn!(message_id = message.message_id, "server reset the request");
            return Outcome::NeedMoreData;
        }
        if message.code == code::EMPTY {
            trace!(message_id = message.message_id, "empty ACK, response follows separately");
            return Outcome::NeedMoreData;
        }
        if *message.token != self.token_bytes() {
            debug!(message_id = message.message_id, "token mismatch, ignoring");
            return Outcome::NeedMoreData;
        }
        if message.kind == MessageType::Acknowledgement && message.message_id != self.message_id {
            debug!(
                message_id = message.message_id,
                expected = self.message_id,
                "message id mismatch, ignoring"
            );
            return Outcome::NeedMoreData;
        }
        if message.code != code::CONTENT {
            warn!(code = %code::display(message.code), "unexpected CoAP response code");
            return Outcome::NeedMoreData;
        }

        let block = match message.block2() {
            Ok(Some(block)) => block,
            Ok(None) => Block {
                num: 0,
                more: false,
                szx: self.szx,
            },
            Err(e) => return Outcome::Malformed(e.to_string()),
        };
        if block.size() < self.block_size {
            debug!(block_size = block.size(), "server negotiated a smaller block size");
            self.block_size = block.size();
            self.szx = block.szx;
        }

        let offset = block.num as usize * block.size();
        let end = offset + message.payload.len();
        if offset < progress && end <= progress {
            debug!(block = block.num, progress, "duplicate block");
            return Outcome::PayloadReady {
                payload: 0..0,
                consumed: buf.len(),
                duplicate: true,
            };
        }
        if offset > progress {
            warn!(block = block.num, progress, "block out of sequence, ignoring");
            return Outcome::NeedMoreData;
        }
        if block.more && message.payload.is_empty() {
            return Outcome::Malformed(format!("block {} carries no payload", block.num));
        }

        if self.total_size.is_none() {
            if let Some(size) = message.size2().filter(|size| *size > 0) {
                debug!(size, "file size");
                self.total_size = Some(size as usize);
            } else if !block.more {
                self.total_size = Some(end);
            }
        }

        self.request_owed = block.more;
        // A resume offset inside the block skips the bytes already held.
        let start = buf.len() - message.payload.len() + (progress - offset);
        trace!(block = block.num, len = end - progress, more = block.more, "block received");

        Outcome::PayloadReady {
            payload: start..buf.len(),
            consumed: buf.len(),
            duplicate: false,
        }
    }

    fn total_size(&self) -> Option<usize> {
        self.total_size
    }

    fn request_owed(&self) -> bool {
        self.request_owed
    }

    fn server_requests_close(&self) -> bool {
        false
    }

    fn recv_timeout(&self) -> Duration {
        self.timeout
    }

    fn retransmission_due(&mut self) -> Retransmission {
        if self.retransmissions >= self.params.max_retransmissions {
            warn!(
                retransmissions = self.retransmissions,
                "no response, giving up"
            );
            return Retransmission::GiveUp;
        }
        self.retransmissions += 1;
        self.timeout = self.timeout.saturating_mul(2).min(COAP_MAX_RETRANSMIT_TIMEOUT);
        debug!(
            attempt = self.retransmissions,
            next_timeout = ?self.timeout,
            message_id = self.message_id,
            "retransmitting CoAP request"
        );
        Retransmission::Resend(self.request.clone())
    }
}
