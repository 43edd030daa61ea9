//! # Pooled Messages
//!
//! ## Purpose
//!
//! [`PooledMessage`] is the reusable wire message handed out by
//! [`MessagePool`](crate::pool::MessagePool). It composes a [`MessageBase`]
//! with the framing header and two scratch buffers that survive a reset, so
//! a busy connection decodes and encodes without allocating per message.
//!
//! ## Buffer Handling
//!
//! ```text
//! unmarshal(data) ─► decode_buf (BytesMut) ─► split().freeze() ─► Bytes
//!                                                                  │
//!                        token / option values / body ◄── slice ───┘
//!
//! marshal() ─► encode_buf (Vec<u8>, grows only) ─► &[u8]
//! ```
//!
//! Decoded fields are zero-copy slices of the frozen decode buffer. Once
//! they are dropped (on reset or the next unmarshal) the allocation goes
//! back to `decode_buf` through `BytesMut::reserve`. Scratch buffers that
//! grew past the shrink threshold are replaced on reset so one oversized
//! message does not pin memory in the pool.
//!
//! ## Atomicity
//!
//! Decoding writes into message-local scratch state first and only swaps it
//! into the visible fields when the whole frame parsed, so a failed
//! `unmarshal` leaves the previous field values untouched.

use crate::datagram::{Datagram, DatagramHeader, Type};
use crate::error::{CodecError, CodecResult};
use crate::framing::{FrameRef, Framing};
use crate::stream::Stream;
use bytes::{Bytes, BytesMut};
use coap_types::{Body, CoapMessage, Code, Context, Message, MessageBase, Options, Token};
use std::fmt;

/// Scratch buffer sizing shared by every message of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLimits {
    /// Capacity of freshly allocated scratch buffers
    pub baseline: usize,
    /// Buffers above this size are replaced by baseline ones on reset
    pub shrink_threshold: usize,
}

impl Default for BufferLimits {
    fn default() -> Self {
        Self {
            baseline: crate::constants::MESSAGE_BUFFER_BASELINE,
            shrink_threshold: crate::constants::MAX_MESSAGE_BUFFER_SIZE,
        }
    }
}

/// Reusable message bound to one framing
pub struct PooledMessage<F: Framing> {
    pub(crate) base: MessageBase,
    pub(crate) header: F::Header,
    pub(crate) ctx: Option<Context>,
    modified: bool,
    decode_buf: BytesMut,
    /// Largest decode reservation since the last reset
    decode_size: usize,
    decode_options: Options,
    encode_buf: Vec<u8>,
    limits: BufferLimits,
}

/// Pooled message using the datagram framing (UDP, DTLS)
pub type DatagramMessage = PooledMessage<Datagram>;

/// Pooled message using the stream framing (TCP, TLS)
pub type StreamMessage = PooledMessage<Stream>;

impl<F: Framing> PooledMessage<F> {
    pub(crate) fn new(limits: BufferLimits) -> Self {
        Self {
            base: MessageBase::new(),
            header: F::Header::default(),
            ctx: None,
            modified: false,
            decode_buf: BytesMut::with_capacity(limits.baseline),
            decode_size: limits.baseline,
            decode_options: Options::with_capacity(16),
            encode_buf: Vec::with_capacity(limits.baseline),
            limits,
        }
    }

    /// Return every field to its empty state and shrink oversized buffers
    ///
    /// The execution context is kept; the pool detaches it on release.
    pub fn reset(&mut self) {
        self.base.reset();
        self.header = F::Header::default();
        self.decode_options.clear();
        self.modified = false;

        if self.decode_size > self.limits.shrink_threshold {
            self.decode_buf = BytesMut::with_capacity(self.limits.baseline);
            self.decode_size = self.limits.baseline;
        } else {
            self.decode_buf.clear();
        }
        if self.encode_buf.capacity() > self.limits.shrink_threshold {
            self.encode_buf = Vec::with_capacity(self.limits.baseline);
        }
    }

    /// Execution context the message was acquired with
    pub fn context(&self) -> Option<&Context> {
        self.ctx.as_ref()
    }

    pub fn base(&self) -> &MessageBase {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut MessageBase {
        &mut self.base
    }

    /// Size of the decode scratch buffer as seen by the shrink policy
    pub fn decode_capacity(&self) -> usize {
        self.decode_size
    }

    pub fn encode_capacity(&self) -> usize {
        self.encode_buf.capacity()
    }

    /// Decode one message from `data`, returning the bytes consumed
    ///
    /// On error the message keeps its previous field values.
    pub fn unmarshal(&mut self, data: &[u8]) -> CodecResult<usize> {
        self.decode_buf.clear();
        self.decode_buf.reserve(data.len());
        self.decode_size = self.decode_size.max(data.len());
        self.decode_buf.extend_from_slice(data);
        let frozen = self.decode_buf.split().freeze();

        let decoded = F::decode(&frozen, &mut self.decode_options)?;

        self.header = decoded.header;
        self.base.set_code(decoded.code);
        self.base.set_token(decoded.token);
        std::mem::swap(self.base.options_mut(), &mut self.decode_options);
        self.decode_options.clear();
        let body = (!decoded.payload.is_empty()).then(|| Body::from_bytes(decoded.payload));
        self.base.set_body(body);

        self.base.set_modified(false);
        self.modified = false;
        Ok(decoded.consumed)
    }

    /// Encode into the message-owned scratch buffer
    ///
    /// The returned slice is valid until the next call that mutates the
    /// message.
    pub fn marshal(&mut self) -> CodecResult<&[u8]> {
        let payload = self.base.read_body().map_err(CodecError::body)?;
        let frame = FrameRef {
            code: self.base.code(),
            token: self.base.token().map(|token| token.as_ref()),
            options: self.base.options(),
            payload: &payload,
        };

        let size = F::encoded_size(&self.header, &frame)?;
        if self.encode_buf.len() < size {
            self.encode_buf.resize(size, 0);
        }
        let written = F::encode(&self.header, &frame, &mut self.encode_buf[..size])?;
        Ok(&self.encode_buf[..written])
    }

    /// Owned copy that shares no storage with this message
    pub fn convert_to(&mut self) -> CodecResult<Message> {
        let body = match self.base.body_mut() {
            Some(body) => {
                let payload = body.read_all().map_err(CodecError::body)?;
                Some(Body::from_bytes(Bytes::copy_from_slice(&payload)))
            }
            None => None,
        };
        Ok(Message {
            context: self.ctx.clone(),
            code: self.base.code(),
            token: self.base.token().map(|token| Bytes::copy_from_slice(token)),
            options: self.base.options().deep_clone(),
            body,
        })
    }
}

impl<F: Framing> CoapMessage for PooledMessage<F> {
    fn code(&self) -> Code {
        self.base.code()
    }

    fn set_code(&mut self, code: Code) {
        self.base.set_code(code);
    }

    fn token(&self) -> Option<&Token> {
        self.base.token()
    }

    fn set_token(&mut self, token: Option<Token>) {
        self.base.set_token(token);
    }

    fn options(&self) -> &Options {
        self.base.options()
    }

    fn options_mut(&mut self) -> &mut Options {
        self.base.options_mut()
    }

    fn body(&self) -> Option<&Body> {
        self.base.body()
    }

    fn body_mut(&mut self) -> Option<&mut Body> {
        self.base.body_mut()
    }

    fn set_body(&mut self, body: Option<Body>) {
        self.base.set_body(body);
    }

    fn is_modified(&self) -> bool {
        self.modified || self.base.is_modified()
    }

    fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
        self.base.set_modified(modified);
    }
}

impl PooledMessage<Datagram> {
    /// # Panics
    ///
    /// Panics when the message ID was never set. Use
    /// [`try_message_id`](Self::try_message_id) to check without panicking.
    pub fn message_id(&self) -> u16 {
        self.header.message_id()
    }

    pub fn try_message_id(&self) -> Option<u16> {
        self.header.message_id
    }

    pub fn set_message_id(&mut self, mid: u16) {
        self.header.message_id = Some(mid);
        self.modified = true;
    }

    /// Assign `mid` only when no ID is set yet; returns the effective ID
    pub fn upsert_message_id(&mut self, mid: u16) -> u16 {
        *self.header.message_id.get_or_insert(mid)
    }

    pub fn message_type(&self) -> Type {
        self.header.message_type
    }

    pub fn set_message_type(&mut self, message_type: Type) {
        self.header.message_type = message_type;
        self.modified = true;
    }

    /// Empty ACK announcing that the response follows separately
    pub fn is_separate(&self) -> bool {
        self.base.code().is_empty()
            && self.base.token().is_none()
            && self.header.message_type == Type::Acknowledgement
            && self.base.options().is_empty()
            && self.base.body().is_none()
    }

    pub fn header(&self) -> &DatagramHeader {
        &self.header
    }
}

impl fmt::Display for PooledMessage<Datagram> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type: {}, ", self.header.message_type)?;
        if let Some(mid) = self.header.message_id {
            write!(f, "MessageID: {mid}, ")?;
        }
        write!(f, "{}", self.base)
    }
}

impl fmt::Display for PooledMessage<Stream> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base)
    }
}

impl<F: Framing> fmt::Debug for PooledMessage<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledMessage")
            .field("framing", &F::NAME)
            .field("header", &self.header)
            .field("base", &self.base)
            .field("modified", &self.modified)
            .finish_non_exhaustive()
    }
}
