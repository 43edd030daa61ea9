//! Framing abstraction
//!
//! A [`Framing`] describes one wire layout. Pooled messages and pools are
//! generic over it, so the datagram and stream variants share every piece of
//! buffer management and differ only in header fields and byte layout.

use crate::error::CodecResult;
use bytes::Bytes;
use coap_types::{Code, Options};
use std::fmt;

/// Borrowed view of the framing-independent fields being encoded
#[derive(Debug, Clone, Copy)]
pub struct FrameRef<'a> {
    pub code: Code,
    pub token: Option<&'a [u8]>,
    pub options: &'a Options,
    pub payload: &'a [u8],
}

impl FrameRef<'_> {
    pub(crate) fn token_len(&self) -> usize {
        self.token.map_or(0, <[u8]>::len)
    }

    /// Marker plus payload, or nothing when the payload is empty
    pub(crate) fn payload_size(&self) -> usize {
        if self.payload.is_empty() {
            0
        } else {
            1 + self.payload.len()
        }
    }
}

/// Decoded fields other than the options, which are decoded in place
#[derive(Debug)]
pub struct Decoded<H> {
    pub header: H,
    pub code: Code,
    pub token: Option<Bytes>,
    pub payload: Bytes,
    /// Bytes of the input that belong to this message
    pub consumed: usize,
}

/// One wire layout
pub trait Framing: Send + Sync + 'static {
    /// Fields only this framing carries
    type Header: Default + fmt::Debug + Send + Sync;

    /// Short name used in logs
    const NAME: &'static str;

    /// Exact number of bytes `encode` will write
    fn encoded_size(header: &Self::Header, frame: &FrameRef<'_>) -> CodecResult<usize>;

    /// Write the message into `buf`, returning the bytes written
    fn encode(header: &Self::Header, frame: &FrameRef<'_>, buf: &mut [u8]) -> CodecResult<usize>;

    /// Parse one message; option values and payload are slices of `data`
    fn decode(data: &Bytes, options: &mut Options) -> CodecResult<Decoded<Self::Header>>;
}
