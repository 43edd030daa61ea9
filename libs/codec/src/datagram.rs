//! # Datagram Framing
//!
//! ## Purpose
//!
//! Wire layout used over UDP and DTLS (RFC 7252 §3). Every message carries a
//! type and a 16-bit message ID used for deduplication and ACK matching by
//! the processing layer above the core.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |Ver| T |  TKL  |      Code     |          Message ID           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   Token (if any, TKL bytes) ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   Options (if any) ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |1 1 1 1 1 1 1 1|    Payload (if any) ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! A datagram holds exactly one message, so decoding always consumes the
//! whole buffer.

use crate::constants::{COAP_VERSION, DATAGRAM_HEADER_SIZE, PAYLOAD_MARKER};
use crate::error::{CodecError, CodecResult};
use crate::framing::{Decoded, FrameRef, Framing};
use crate::options;
use bytes::Bytes;
use coap_types::{Code, Options, MAX_TOKEN_SIZE};
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::atomic::{AtomicU16, Ordering};

/// Reliability class of a datagram message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Type {
    Confirmable = 0,
    #[default]
    NonConfirmable = 1,
    Acknowledgement = 2,
    Reset = 3,
}

impl Type {
    /// Two-bit wire value; only the low bits are looked at
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Type::Confirmable,
            1 => Type::NonConfirmable,
            2 => Type::Acknowledgement,
            _ => Type::Reset,
        }
    }

    pub fn short_name(self) -> &'static str {
        match self {
            Type::Confirmable => "CON",
            Type::NonConfirmable => "NON",
            Type::Acknowledgement => "ACK",
            Type::Reset => "RST",
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Fields only the datagram framing carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DatagramHeader {
    /// Unset until explicitly assigned
    pub message_id: Option<u16>,
    pub message_type: Type,
}

impl DatagramHeader {
    /// # Panics
    ///
    /// Panics when no message ID has been assigned. Sending a datagram without
    /// one is a caller bug, not a network condition.
    pub fn message_id(&self) -> u16 {
        match self.message_id {
            Some(mid) => mid,
            None => panic!("message ID is not set"),
        }
    }
}

/// Marker type for the datagram framing
#[derive(Debug, Clone, Copy)]
pub struct Datagram;

impl Framing for Datagram {
    type Header = DatagramHeader;

    const NAME: &'static str = "datagram";

    fn encoded_size(header: &DatagramHeader, frame: &FrameRef<'_>) -> CodecResult<usize> {
        // Checked before any size work so an unset ID never reaches the wire
        header.message_id();
        check_token(frame)?;
        Ok(DATAGRAM_HEADER_SIZE
            + frame.token_len()
            + options::encoded_size(frame.options)?
            + frame.payload_size())
    }

    fn encode(header: &DatagramHeader, frame: &FrameRef<'_>, buf: &mut [u8]) -> CodecResult<usize> {
        let size = Self::encoded_size(header, frame)?;
        if buf.len() < size {
            return Err(CodecError::BufferTooSmall {
                need: size,
                got: buf.len(),
            });
        }

        let token = frame.token.unwrap_or_default();
        buf[0] = (COAP_VERSION << 6) | ((header.message_type as u8) << 4) | token.len() as u8;
        buf[1] = frame.code.0;
        buf[2..4].copy_from_slice(&header.message_id().to_be_bytes());
        let mut pos = DATAGRAM_HEADER_SIZE;

        buf[pos..pos + token.len()].copy_from_slice(token);
        pos += token.len();

        pos += options::encode(frame.options, &mut buf[pos..size])?;

        if !frame.payload.is_empty() {
            buf[pos] = PAYLOAD_MARKER;
            pos += 1;
            buf[pos..pos + frame.payload.len()].copy_from_slice(frame.payload);
            pos += frame.payload.len();
        }
        Ok(pos)
    }

    fn decode(data: &Bytes, options: &mut Options) -> CodecResult<Decoded<DatagramHeader>> {
        if data.len() < DATAGRAM_HEADER_SIZE {
            return Err(CodecError::message_too_small(
                DATAGRAM_HEADER_SIZE,
                data.len(),
                "datagram header",
            ));
        }

        let version = data[0] >> 6;
        if version != COAP_VERSION {
            return Err(CodecError::UnsupportedVersion {
                version,
                expected: COAP_VERSION,
            });
        }
        let message_type = Type::from_bits(data[0] >> 4);
        let token_len = usize::from(data[0] & 0x0f);
        if token_len > MAX_TOKEN_SIZE {
            return Err(CodecError::InvalidTokenLength {
                length: token_len,
                max: MAX_TOKEN_SIZE,
            });
        }
        let code = Code(data[1]);
        let message_id = u16::from_be_bytes([data[2], data[3]]);

        let token_end = DATAGRAM_HEADER_SIZE + token_len;
        if data.len() < token_end {
            return Err(CodecError::message_too_small(token_end, data.len(), "datagram token"));
        }
        let token = (token_len > 0).then(|| data.slice(DATAGRAM_HEADER_SIZE..token_end));

        let payload = match options::decode(data, token_end, data.len(), options)? {
            Some(start) => data.slice(start..),
            None => Bytes::new(),
        };

        Ok(Decoded {
            header: DatagramHeader {
                message_id: Some(message_id),
                message_type,
            },
            code,
            token,
            payload,
            consumed: data.len(),
        })
    }
}

pub(crate) fn check_token(frame: &FrameRef<'_>) -> CodecResult<()> {
    if frame.token_len() > MAX_TOKEN_SIZE {
        return Err(CodecError::InvalidTokenLength {
            length: frame.token_len(),
            max: MAX_TOKEN_SIZE,
        });
    }
    Ok(())
}

static MESSAGE_ID: Lazy<AtomicU16> = Lazy::new(|| AtomicU16::new(rand::random()));

/// Next process-wide message ID, starting from a random value
pub fn next_message_id() -> u16 {
    MESSAGE_ID.fetch_add(1, Ordering::Relaxed)
}
