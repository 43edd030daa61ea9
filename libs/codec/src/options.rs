//! # Option Codec
//!
//! Delta/length encoding shared by both framings (RFC 7252 §3.1).
//!
//! ```text
//!   0   1   2   3   4   5   6   7
//! +---------------+---------------+
//! |  Option Delta | Option Length |   1 byte
//! +---------------+---------------+
//! |         Option Delta          |   0-2 bytes (nibble 13 or 14)
//! |          (extended)           |
//! +-------------------------------+
//! |         Option Length         |   0-2 bytes (nibble 13 or 14)
//! |          (extended)           |
//! +-------------------------------+
//! |         Option Value          |   0 or more bytes
//! +-------------------------------+
//! ```
//!
//! Nibble 13 adds one byte holding `value - 13`, nibble 14 adds two bytes
//! holding `value - 269`, nibble 15 is reserved (a full `0xFF` byte is the
//! payload marker instead).

use crate::constants::PAYLOAD_MARKER;
use crate::error::{CodecError, CodecResult};
use bytes::Bytes;
use coap_types::{CoapOption, OptionId, Options, MAX_OPTION_VALUE_SIZE};

const EXT_BYTE: u8 = 13;
const EXT_WORD: u8 = 14;
const RESERVED: u8 = 15;
const EXT_BYTE_OFFSET: usize = 13;
const EXT_WORD_OFFSET: usize = 269;

/// Nibble and extension width for a delta or length value
fn nibble(value: usize) -> Option<(u8, usize)> {
    if value < EXT_BYTE_OFFSET {
        Some((value as u8, 0))
    } else if value < EXT_WORD_OFFSET {
        Some((EXT_BYTE, 1))
    } else if value <= MAX_OPTION_VALUE_SIZE {
        Some((EXT_WORD, 2))
    } else {
        None
    }
}

fn write_extension(buf: &mut [u8], pos: usize, value: usize, width: usize) {
    match width {
        1 => buf[pos] = (value - EXT_BYTE_OFFSET) as u8,
        2 => buf[pos..pos + 2].copy_from_slice(&((value - EXT_WORD_OFFSET) as u16).to_be_bytes()),
        _ => {}
    }
}

fn delta_of(previous: u16, option: &CoapOption) -> CodecResult<usize> {
    option
        .id
        .0
        .checked_sub(previous)
        .map(usize::from)
        .ok_or(CodecError::InvalidOptionOrder {
            previous,
            current: option.id.0,
        })
}

fn value_nibble(option: &CoapOption) -> CodecResult<(u8, usize)> {
    nibble(option.value.len()).ok_or(CodecError::OptionTooLong {
        option: option.id.0,
        size: option.value.len(),
        limit: MAX_OPTION_VALUE_SIZE,
    })
}

/// Encoded size of the option list
pub(crate) fn encoded_size(options: &Options) -> CodecResult<usize> {
    let mut previous = 0u16;
    let mut size = 0usize;
    for option in options {
        let delta = delta_of(previous, option)?;
        // Deltas are bounded by u16, so the nibble lookup cannot fail
        let (_, delta_ext) = nibble(delta).unwrap_or((EXT_WORD, 2));
        let (_, len_ext) = value_nibble(option)?;
        size += 1 + delta_ext + len_ext + option.value.len();
        previous = option.id.0;
    }
    Ok(size)
}

/// Write the option list into `buf`, which must hold `encoded_size` bytes
pub(crate) fn encode(options: &Options, buf: &mut [u8]) -> CodecResult<usize> {
    let mut previous = 0u16;
    let mut pos = 0usize;
    for option in options {
        let delta = delta_of(previous, option)?;
        let (delta_nibble, delta_ext) = nibble(delta).unwrap_or((EXT_WORD, 2));
        let (len_nibble, len_ext) = value_nibble(option)?;
        let need = 1 + delta_ext + len_ext + option.value.len();
        if buf.len() < pos + need {
            return Err(CodecError::BufferTooSmall {
                need: pos + need,
                got: buf.len(),
            });
        }

        buf[pos] = (delta_nibble << 4) | len_nibble;
        pos += 1;
        write_extension(buf, pos, delta, delta_ext);
        pos += delta_ext;
        write_extension(buf, pos, option.value.len(), len_ext);
        pos += len_ext;
        buf[pos..pos + option.value.len()].copy_from_slice(&option.value);
        pos += option.value.len();
        previous = option.id.0;
    }
    Ok(pos)
}

fn read_extended(data: &[u8], pos: &mut usize, nib: u8, end: usize) -> CodecResult<usize> {
    match nib {
        EXT_BYTE => {
            if *pos + 1 > end {
                return Err(CodecError::invalid_option(*pos, "truncated 1-byte extension"));
            }
            let value = usize::from(data[*pos]) + EXT_BYTE_OFFSET;
            *pos += 1;
            Ok(value)
        }
        EXT_WORD => {
            if *pos + 2 > end {
                return Err(CodecError::invalid_option(*pos, "truncated 2-byte extension"));
            }
            let value = usize::from(u16::from_be_bytes([data[*pos], data[*pos + 1]])) + EXT_WORD_OFFSET;
            *pos += 2;
            Ok(value)
        }
        RESERVED => Err(CodecError::invalid_option(*pos, "reserved nibble 15")),
        direct => Ok(usize::from(direct)),
    }
}

/// Decode options from `data[start..end]` into `options`
///
/// Values are zero-copy slices of `data`. Returns the payload start when a
/// payload marker was found.
pub(crate) fn decode(
    data: &Bytes,
    start: usize,
    end: usize,
    options: &mut Options,
) -> CodecResult<Option<usize>> {
    options.clear();
    let mut pos = start;
    let mut previous = 0usize;

    while pos < end {
        let header = data[pos];
        if header == PAYLOAD_MARKER {
            if pos + 1 == end {
                return Err(CodecError::EmptyPayload { offset: pos });
            }
            return Ok(Some(pos + 1));
        }
        pos += 1;

        let delta = read_extended(data, &mut pos, header >> 4, end)?;
        let length = read_extended(data, &mut pos, header & 0x0f, end)?;

        let number = previous + delta;
        if number > usize::from(u16::MAX) {
            return Err(CodecError::invalid_option(pos, "option number exceeds 65535"));
        }
        if pos + length > end {
            return Err(CodecError::invalid_option(pos, "truncated option value"));
        }

        options.push(CoapOption {
            id: OptionId(number as u16),
            value: data.slice(pos..pos + length),
        });
        pos += length;
        previous = number;
    }
    Ok(None)
}
