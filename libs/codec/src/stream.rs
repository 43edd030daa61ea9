//! # Stream Framing
//!
//! ## Purpose
//!
//! Wire layout used over TCP and TLS (RFC 8323 §3.2). The transport is
//! already reliable and ordered, so there is no type and no message ID;
//! instead a length field tells the reader where each message ends.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Len  |  TKL  | Extended Length (0-4 bytes) ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      Code     | Token (TKL bytes) ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Options (if any) ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |1 1 1 1 1 1 1 1|    Payload (if any) ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! `Len` covers options, marker and payload. Values 0-12 are literal; 13, 14
//! and 15 select a 1, 2 or 4 byte extended length holding `len - 13`,
//! `len - 269` and `len - 65805`.
//!
//! A buffer may hold a partial frame or several frames. Decoding reports
//! [`CodecError::ShortRead`] for the former and the consumed byte count for
//! the latter, so the reader can keep accumulating or advance.

use crate::constants::PAYLOAD_MARKER;
use crate::datagram::check_token;
use crate::error::{CodecError, CodecResult};
use crate::framing::{Decoded, FrameRef, Framing};
use crate::options;
use bytes::Bytes;
use coap_types::{Code, Options, MAX_TOKEN_SIZE};

const LEN_EXT_BYTE: u8 = 13;
const LEN_EXT_WORD: u8 = 14;
const LEN_EXT_DWORD: u8 = 15;
const LEN_EXT_BYTE_OFFSET: usize = 13;
const LEN_EXT_WORD_OFFSET: usize = 269;
const LEN_EXT_DWORD_OFFSET: usize = 65805;

/// Largest options + payload section the 4-byte extended length can carry
pub const MAX_FRAME_BODY_SIZE: usize = u32::MAX as usize + LEN_EXT_DWORD_OFFSET;

/// Marker type for the stream framing
#[derive(Debug, Clone, Copy)]
pub struct Stream;

fn length_nibble(len: usize) -> CodecResult<(u8, usize)> {
    match len {
        l if l < LEN_EXT_BYTE_OFFSET => Ok((l as u8, 0)),
        l if l < LEN_EXT_WORD_OFFSET => Ok((LEN_EXT_BYTE, 1)),
        l if l < LEN_EXT_DWORD_OFFSET => Ok((LEN_EXT_WORD, 2)),
        l if l <= MAX_FRAME_BODY_SIZE => Ok((LEN_EXT_DWORD, 4)),
        l => Err(CodecError::FrameTooLarge {
            size: l,
            limit: MAX_FRAME_BODY_SIZE,
        }),
    }
}

fn extension_width(nibble: u8) -> usize {
    match nibble {
        LEN_EXT_BYTE => 1,
        LEN_EXT_WORD => 2,
        LEN_EXT_DWORD => 4,
        _ => 0,
    }
}

fn body_size(frame: &FrameRef<'_>) -> CodecResult<usize> {
    Ok(options::encoded_size(frame.options)? + frame.payload_size())
}

/// Parsed fixed part of a stream header
struct StreamHeader {
    token_len: usize,
    /// First byte, extended length and code
    header_len: usize,
    body_len: usize,
}

impl StreamHeader {
    fn total(&self) -> usize {
        self.header_len + self.token_len + self.body_len
    }
}

/// Parse the header, or `None` when `data` does not reach the code byte yet
fn parse_header(data: &[u8]) -> CodecResult<Option<StreamHeader>> {
    let Some(&first) = data.first() else {
        return Ok(None);
    };
    let token_len = usize::from(first & 0x0f);
    if token_len > MAX_TOKEN_SIZE {
        return Err(CodecError::InvalidTokenLength {
            length: token_len,
            max: MAX_TOKEN_SIZE,
        });
    }

    let nibble = first >> 4;
    let ext = extension_width(nibble);
    let header_len = 1 + ext + 1;
    if data.len() < header_len {
        return Ok(None);
    }

    let body_len = match nibble {
        LEN_EXT_BYTE => usize::from(data[1]) + LEN_EXT_BYTE_OFFSET,
        LEN_EXT_WORD => usize::from(u16::from_be_bytes([data[1], data[2]])) + LEN_EXT_WORD_OFFSET,
        LEN_EXT_DWORD => {
            u32::from_be_bytes([data[1], data[2], data[3], data[4]]) as usize + LEN_EXT_DWORD_OFFSET
        }
        literal => usize::from(literal),
    };

    Ok(Some(StreamHeader {
        token_len,
        header_len,
        body_len,
    }))
}

/// Total length of the next frame in `data`, once its header is complete
///
/// Returns `Ok(None)` while the header itself is still incomplete.
pub fn frame_length(data: &[u8]) -> CodecResult<Option<usize>> {
    Ok(parse_header(data)?.map(|header| header.total()))
}

impl Framing for Stream {
    type Header = ();

    const NAME: &'static str = "stream";

    fn encoded_size(_header: &(), frame: &FrameRef<'_>) -> CodecResult<usize> {
        check_token(frame)?;
        let body = body_size(frame)?;
        let (_, ext) = length_nibble(body)?;
        Ok(1 + ext + 1 + frame.token_len() + body)
    }

    fn encode(header: &(), frame: &FrameRef<'_>, buf: &mut [u8]) -> CodecResult<usize> {
        let size = Self::encoded_size(header, frame)?;
        if buf.len() < size {
            return Err(CodecError::BufferTooSmall {
                need: size,
                got: buf.len(),
            });
        }

        let body = body_size(frame)?;
        let (nibble, ext) = length_nibble(body)?;
        let token = frame.token.unwrap_or_default();

        buf[0] = (nibble << 4) | token.len() as u8;
        let mut pos = 1;
        match ext {
            1 => buf[pos] = (body - LEN_EXT_BYTE_OFFSET) as u8,
            2 => buf[pos..pos + 2]
                .copy_from_slice(&((body - LEN_EXT_WORD_OFFSET) as u16).to_be_bytes()),
            4 => buf[pos..pos + 4]
                .copy_from_slice(&((body - LEN_EXT_DWORD_OFFSET) as u32).to_be_bytes()),
            _ => {}
        }
        pos += ext;

        buf[pos] = frame.code.0;
        pos += 1;

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

    fn decode(data: &Bytes, options: &mut Options) -> CodecResult<Decoded<()>> {
        let header = match parse_header(data)? {
            Some(header) => header,
            None => {
                return Err(CodecError::ShortRead {
                    need: data.len() + 1,
                    got: data.len(),
                })
            }
        };

        let total = header.total();
        if data.len() < total {
            return Err(CodecError::ShortRead {
                need: total,
                got: data.len(),
            });
        }

        let code = Code(data[header.header_len - 1]);
        let token_end = header.header_len + header.token_len;
        let token = (header.token_len > 0).then(|| data.slice(header.header_len..token_end));

        let payload = match options::decode(data, token_end, total, options)? {
            Some(start) => data.slice(start..total),
            None => Bytes::new(),
        };

        Ok(Decoded {
            header: (),
            code,
            token,
            payload,
            consumed: total,
        })
    }
}
