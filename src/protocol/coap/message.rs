//! CoAP message encoding (RFC 7252 §3) with the Block2 and Size2 options of
//! RFC 7959.

use std::borrow::Cow;

use thiserror::Error;

/// Protocol version carried in every message.
const VERSION: u8 = 1;
const PAYLOAD_MARKER: u8 = 0xFF;
const MAX_TOKEN_LEN: usize = 8;

/// Option numbers used by the downloader.
pub mod option {
    /// Uri-Path, one per path segment.
    pub const URI_PATH: u16 = 11;
    /// Uri-Query, one per `key=value` argument.
    pub const URI_QUERY: u16 = 15;
    /// Block2 (RFC 7959).
    pub const BLOCK2: u16 = 23;
    /// Size2 (RFC 7959).
    pub const SIZE2: u16 = 28;
}

/// Message codes used by the downloader.
pub mod code {
    /// 0.00, empty message.
    pub const EMPTY: u8 = 0x00;
    /// 0.01 GET.
    pub const GET: u8 = 0x01;
    /// 2.05 Content.
    pub const CONTENT: u8 = 0x45;

    /// Formats a code as `class.detail`.
    #[must_use]
    pub fn display(code: u8) -> String {
        format!("{}.{:02}", code >> 5, code & 0x1F)
    }
}

/// Errors decoding or encoding a CoAP message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    /// Fewer bytes than the fixed header or a declared field.
    #[error("message truncated")]
    Truncated,

    /// Unknown protocol version.
    #[error("unsupported CoAP version {0}")]
    BadVersion(u8),

    /// Token length above 8.
    #[error("token length {0} exceeds 8")]
    TokenTooLong(usize),

    /// Option delta or length nibble 15 outside the payload marker.
    #[error("reserved option nibble")]
    ReservedOptionNibble,

    /// Payload marker followed by nothing.
    #[error("payload marker without payload")]
    EmptyPayload,

    /// Block option with the reserved SZX value 7 or a number too large.
    #[error("invalid block option")]
    InvalidBlock,
}

/// Message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// CON.
    Confirmable,
    /// NON.
    NonConfirmable,
    /// ACK.
    Acknowledgement,
    /// RST.
    Reset,
}

impl MessageType {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Self::Confirmable,
            1 => Self::NonConfirmable,
            2 => Self::Acknowledgement,
            _ => Self::Reset,
        }
    }

    fn bits(self) -> u8 {
        match self {
            Self::Confirmable => 0,
            Self::NonConfirmable => 1,
            Self::Acknowledgement => 2,
            Self::Reset => 3,
        }
    }
}

/// One option instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapOption<'a> {
    /// Option number.
    pub number: u16,
    /// Raw option value.
    pub value: Cow<'a, [u8]>,
}

impl<'a> CoapOption<'a> {
    /// Option with an opaque or string value.
    pub fn bytes(number: u16, value: impl Into<Cow<'a, [u8]>>) -> Self {
        Self {
            number,
            value: value.into(),
        }
    }

    /// Option with an unsigned integer value, minimally encoded.
    #[must_use]
    pub fn uint(number: u16, value: u32) -> Self {
        let bytes = value.to_be_bytes();
        let skip = bytes.iter().take_while(|&&b| b == 0).count();
        Self {
            number,
            value: Cow::Owned(bytes[skip..].to_vec()),
        }
    }

    /// Interprets the value as an unsigned integer.
    #[must_use]
    pub fn as_uint(&self) -> Option<u32> {
        if self.value.len() > 4 {
            return None;
        }
        Some(self.value.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b)))
    }
}

/// Block option value: block number, more flag and size exponent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Block number.
    pub num: u32,
    /// More blocks follow.
    pub more: bool,
    /// Size exponent; the block size is `2^(szx + 4)`.
    pub szx: u8,
}

impl Block {
    /// Largest block number that fits the 20-bit field.
    pub const MAX_NUM: u32 = (1 << 20) - 1;

    /// Block size in bytes.
    #[must_use]
    pub fn size(self) -> usize {
        1 << (self.szx + 4)
    }

    /// Size exponent for a power-of-two block size in 16..=1024.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn szx_for(size: u16) -> u8 {
        // trailing_zeros of 16..=1024 is 4..=10
        (size.trailing_zeros().saturating_sub(4)).min(6) as u8
    }

    /// Encodes the block as an option value.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::InvalidBlock`] for a number above
    /// [`Block::MAX_NUM`] or a reserved SZX.
    pub fn to_option(self, number: u16) -> Result<CoapOption<'static>, MessageError> {
        if self.num > Self::MAX_NUM || self.szx > 6 {
            return Err(MessageError::InvalidBlock);
        }
        let value = (self.num << 4) | (u32::from(self.more) << 3) | u32::from(self.szx);
        Ok(CoapOption::uint(number, value))
    }

    /// Decodes a block option value.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::InvalidBlock`] for values over three bytes or
    /// the reserved SZX 7.
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_option(option: &CoapOption<'_>) -> Result<Self, MessageError> {
        if option.value.len() > 3 {
            return Err(MessageError::InvalidBlock);
        }
        let value = option.as_uint().ok_or(MessageError::InvalidBlock)?;
        let szx = (value & 0x07) as u8;
        if szx == 7 {
            return Err(MessageError::InvalidBlock);
        }
        Ok(Self {
            num: value >> 4,
            more: value & 0x08 != 0,
            szx,
        })
    }
}

/// A CoAP message. Decoded messages borrow from the datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message<'a> {
    /// Message type.
    pub kind: MessageType,
    /// Method or response code.
    pub code: u8,
    /// Message id, used to match ACKs.
    pub message_id: u16,
    /// Token, used to match responses.
    pub token: Cow<'a, [u8]>,
    /// Options, in ascending number order once encoded.
    pub options: Vec<CoapOption<'a>>,
    /// Payload.
    pub payload: &'a [u8],
}

impl<'a> Message<'a> {
    /// First option with this number.
    #[must_use]
    pub fn option(&self, number: u16) -> Option<&CoapOption<'a>> {
        self.options.iter().find(|o| o.number == number)
    }

    /// Decoded Block2 option, if present.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::InvalidBlock`] when the option is malformed.
    pub fn block2(&self) -> Result<Option<Block>, MessageError> {
        self.option(option::BLOCK2).map(Block::from_option).transpose()
    }

    /// Size2 value, if present.
    #[must_use]
    pub fn size2(&self) -> Option<u32> {
        self.option(option::SIZE2).and_then(CoapOption::as_uint)
    }

    /// Encodes the message.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::TokenTooLong`] for tokens above 8 bytes.
    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        if self.token.len() > MAX_TOKEN_LEN {
            return Err(MessageError::TokenTooLong(self.token.len()));
        }

        let mut out = Vec::with_capacity(4 + self.token.len() + self.payload.len() + 32);
        #[allow(clippy::cast_possible_truncation)]
        out.push((VERSION << 6) | (self.kind.bits() << 4) | self.token.len() as u8);
        out.push(self.code);
        out.extend_from_slice(&self.message_id.to_be_bytes());
        out.extend_from_slice(&self.token);

        let mut options: Vec<&CoapOption<'_>> = self.options.iter().collect();
        options.sort_by_key(|o| o.number);
        let mut previous = 0u16;
        for opt in options {
            let delta = opt.number - previous;
            previous = opt.number;
            let (delta_nibble, delta_ext) = extended(usize::from(delta));
            let (len_nibble, len_ext) = extended(opt.value.len());
            out.push((delta_nibble << 4) | len_nibble);
            out.extend_from_slice(&delta_ext);
            out.extend_from_slice(&len_ext);
            out.extend_from_slice(&opt.value);
        }

        if !self.payload.is_empty() {
            out.push(PAYLOAD_MARKER);
            out.extend_from_slice(self.payload);
        }
        Ok(out)
    }

    /// Decodes a datagram.
    ///
    /// # Errors
    ///
    /// Returns a [`MessageError`] describing the first violation found.
    pub fn decode(buf: &'a [u8]) -> Result<Self, MessageError> {
        let header = buf.get(..4).ok_or(MessageError::Truncated)?;
        let version = header[0] >> 6;
        if version != VERSION {
            return Err(MessageError::BadVersion(version));
        }
        let kind = MessageType::from_bits(header[0] >> 4);
        let token_len = usize::from(header[0] & 0x0F);
        if token_len > MAX_TOKEN_LEN {
            return Err(MessageError::TokenTooLong(token_len));
        }
        let code = header[1];
        let message_id = u16::from_be_bytes([header[2], header[3]]);
        let token = buf.get(4..4 + token_len).ok_or(MessageError::Truncated)?;

        let mut pos = 4 + token_len;
        let mut options = Vec::new();
        let mut number = 0u16;
        let mut payload: &[u8] = &[];
        while pos < buf.len() {
            let byte = buf[pos];
            pos += 1;
            if byte == PAYLOAD_MARKER {
                payload = &buf[pos..];
                if payload.is_empty() {
                    return Err(MessageError::EmptyPayload);
                }
                break;
            }
            let delta = read_extended(buf, &mut pos, byte >> 4)?;
            let len = read_extended(buf, &mut pos, byte & 0x0F)?;
            number = u16::try_from(usize::from(number) + delta)
                .map_err(|_| MessageError::ReservedOptionNibble)?;
            let value = buf.get(pos..pos + len).ok_or(MessageError::Truncated)?;
            pos += len;
            options.push(CoapOption::bytes(number, value));
        }

        Ok(Self {
            kind,
            code,
            message_id,
            token: Cow::Borrowed(token),
            options,
            payload,
        })
    }
}

/// Splits an option delta or length into its nibble and extension bytes.
#[allow(clippy::cast_possible_truncation)]
fn extended(value: usize) -> (u8, Vec<u8>) {
    match value {
        0..=12 => (value as u8, Vec::new()),
        13..=268 => (13, vec![(value - 13) as u8]),
        _ => (14, ((value - 269) as u16).to_be_bytes().to_vec()),
    }
}

fn read_extended(buf: &[u8], pos: &mut usize, nibble: u8) -> Result<usize, MessageError> {
    match nibble {
        0..=12 => Ok(usize::from(nibble)),
        13 => {
            let b = *buf.get(*pos).ok_or(MessageError::Truncated)?;
            *pos += 1;
            Ok(usize::from(b) + 13)
        }
        14 => {
            let b = buf.get(*pos..*pos + 2).ok_or(MessageError::Truncated)?;
            *pos += 2;
            Ok(usize::from(u16::from_be_bytes([b[0], b[1]])) + 269)
        }
        _ => Err(MessageError::ReservedOptionNibble),
    }
}
