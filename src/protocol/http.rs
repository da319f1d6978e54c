//! HTTP/1.1 codec.
//!
//! Requests are plain `GET`s with `Connection: keep-alive`. Three request
//! shapes exist:
//!
//! - whole object: no `Range` header;
//! - resume: `Range: bytes=<progress>-`, size taken from
//!   `Content-Length + progress`;
//! - fragmented (non-zero range override): `Range: bytes=<p>-<end>`, size
//!   taken from `Content-Range: bytes a-b/<total>`, and a new request is owed
//!   once the whole range has been delivered.

use std::time::Duration;

use tracing::{debug, info, trace, warn};

use super::{Outcome, ProtocolCodec, Retransmission};
use crate::download::constants::MIN_FIRST_FRAGMENT;
use crate::download::{ClientConfig, DownloadError, HostOptions, Locator};

const HEADER_END: &[u8] = b"\r\n\r\n";
const STATUS_OK: u16 = 200;
const STATUS_PARTIAL_CONTENT: u16 = 206;
const REDIRECT_STATUSES: [u16; 5] = [301, 302, 303, 307, 308];

/// The fields of a response header the download cares about.
#[derive(Debug, Default, PartialEq, Eq)]
struct ResponseHeader {
    status: Option<u16>,
    location: Option<String>,
    content_length: Option<usize>,
    content_range_total: Option<usize>,
    connection_close: bool,
}

impl ResponseHeader {
    /// Parses a complete header block. Header names are case-insensitive;
    /// values keep their case.
    fn parse(text: &str) -> Self {
        let mut lines = text.split("\r\n");
        let mut header = Self {
            status: lines.next().and_then(parse_status_line),
            ..Self::default()
        };

        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match name.trim().to_ascii_lowercase().as_str() {
                "location" => header.location = Some(value.to_string()),
                "content-length" => header.content_length = value.parse().ok(),
                "content-range" => {
                    header.content_range_total = value
                        .rsplit_once('/')
                        .and_then(|(_, total)| total.trim().parse().ok());
                }
                "connection" => {
                    header.connection_close = value
                        .split(',')
                        .any(|token| token.trim().eq_ignore_ascii_case("close"));
                }
                _ => {}
            }
        }
        header
    }
}

/// Extracts the status code from `HTTP/1.1 200 OK`.
fn parse_status_line(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    let version = parts.next()?;
    if !version.to_ascii_lowercase().starts_with("http/") {
        return None;
    }
    parts.next()?.parse().ok()
}

/// HTTP codec state for one download.
#[derive(Debug)]
pub struct HttpCodec {
    range_override: usize,
    recv_timeout: Duration,
    log_headers: bool,

    total_size: Option<usize>,

    // Per request.
    ranged: bool,
    ranged_progress: usize,
    /// Header bytes still at the front of the buffer, once the header is
    /// complete.
    body_offset: Option<usize>,
    request_owed: bool,
    connection_close: bool,
}

impl HttpCodec {
    /// Creates a codec. The range override only applies when range
    /// requests are allowed.
    #[must_use]
    pub fn new(config: &ClientConfig, options: &HostOptions) -> Self {
        let range_override = if config.allow_range_requests {
            options.range_override
        } else {
            0
        };
        Self {
            range_override,
            recv_timeout: config.http_recv_timeout,
            log_headers: config.log_headers,
            total_size: None,
            ranged: false,
            ranged_progress: 0,
            body_offset: None,
            request_owed: true,
            connection_close: false,
        }
    }

    fn parse_header(&mut self, buf: &[u8], progress: usize) -> Result<usize, Outcome> {
        let Some(pos) = buf.windows(HEADER_END.len()).position(|w| w == HEADER_END) else {
            return Err(Outcome::NeedMoreData);
        };
        let end = pos + HEADER_END.len();
        let text = String::from_utf8_lossy(&buf[..end]);
        if self.log_headers {
            trace!(header = %text, "HTTP response header");
        }
        let header = ResponseHeader::parse(&text);
        debug!(status = ?header.status, len = end, "response header complete");

        match (header.status, header.location) {
            (Some(status), Some(location)) if REDIRECT_STATUSES.contains(&status) => {
                info!(status, %location, "resource moved");
                return Err(Outcome::Redirect(location));
            }
            _ => {}
        }

        if self.total_size.is_none() {
            self.total_size = if self.ranged {
                header.content_range_total
            } else {
                header.content_length.map(|len| len + progress)
            };
            if let Some(size) = self.total_size {
                debug!(size, "file size");
            }
        }

        if header.connection_close {
            warn!("peer will close the connection");
            self.connection_close = true;
        }

        let Some(status) = header.status else {
            return Err(Outcome::Malformed("status code not found".to_string()));
        };
        let expected = if self.ranged || progress > 0 {
            STATUS_PARTIAL_CONTENT
        } else {
            STATUS_OK
        };
        if status != expected {
            return Err(Outcome::Malformed(format!(
                "unexpected HTTP status {status}, expected {expected}"
            )));
        }
        if self.total_size.is_none() {
            return Err(Outcome::Malformed("file size not set".to_string()));
        }
        Ok(end)
    }
}

impl ProtocolCodec for HttpCodec {
    fn build_request(&mut self, target: &Locator, progress: usize) -> Result<Vec<u8>, DownloadError> {
        let host = if target.host().contains(':') {
            format!("[{}]", target.host())
        } else {
            target.host().to_string()
        };

        let range = if self.range_override > 0 {
            let mut end = progress + self.range_override - 1;
            if let Some(size) = self.total_size {
                end = end.min(size.saturating_sub(1));
            }
            debug!(start = progress, end, "range request");
            Some(format!("bytes={progress}-{end}"))
        } else if progress > 0 {
            Some(format!("bytes={progress}-"))
        } else {
            None
        };

        self.ranged = self.range_override > 0;
        self.ranged_progress = 0;
        self.body_offset = None;
        self.request_owed = false;
        self.connection_close = false;

        let mut request = format!("GET /{} HTTP/1.1\r\nHost: {host}\r\n", target.path());
        if let Some(range) = range {
            request.push_str("Range: ");
            request.push_str(&range);
            request.push_str("\r\n");
        }
        request.push_str("Connection: keep-alive\r\n\r\n");

        if self.log_headers {
            trace!(%request, "HTTP request");
        }
        Ok(request.into_bytes())
    }

    fn on_bytes(&mut self, buf: &[u8], progress: usize) -> Outcome {
        let offset = match self.body_offset {
            Some(offset) => offset,
            None => match self.parse_header(buf, progress) {
                Ok(end) => {
                    self.body_offset = Some(end);
                    end
                }
                Err(outcome) => return outcome,
            },
        };

        // The header parse guarantees a size from here on.
        let remaining = self.total_size.unwrap_or(0).saturating_sub(progress);
        let mut wanted = remaining;
        if self.ranged {
            wanted = wanted.min(self.range_override.saturating_sub(self.ranged_progress));
        }

        let available = buf.len().saturating_sub(offset).min(wanted);
        if available < MIN_FIRST_FRAGMENT.min(wanted) {
            trace!(available, wanted, "waiting for more payload");
            return Outcome::NeedMoreData;
        }

        if self.ranged {
            self.ranged_progress += available;
            if self.ranged_progress >= self.range_override {
                self.request_owed = true;
            }
        }
        self.body_offset = Some(0);

        Outcome::PayloadReady {
            payload: offset..offset + available,
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
        self.connection_close
    }

    fn recv_timeout(&self) -> Duration {
        self.recv_timeout
    }

    fn retransmission_due(&mut self) -> Retransmission {
        Retransmission::GiveUp
    }
}
