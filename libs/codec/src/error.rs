//! Codec errors for both framings
//!
//! Decode errors describe bad network input and are always returned, never
//! panicked. Encode errors describe a message that cannot be expressed on the
//! wire. `InvalidContext` is the one contract violation surfaced as an error,
//! because conversions are fed by application code.

use coap_types::TypesError;
use thiserror::Error;

/// Wire encoding/decoding errors with enough context to locate the fault
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    /// Buffer is too small to hold the structure being decoded
    #[error("Message too small: need {need} bytes, got {got} (context: {context})")]
    MessageTooSmall {
        need: usize,
        got: usize,
        context: &'static str,
    },

    /// Stream frame is not complete yet; the reader should wait for more bytes
    #[error("Short read: frame needs {need} bytes, buffer has {got}")]
    ShortRead { need: usize, got: usize },

    /// Datagram header carries an unknown protocol version
    #[error("Unsupported version {version}: expected {expected}")]
    UnsupportedVersion { version: u8, expected: u8 },

    /// TKL nibble above the token size limit
    #[error("Invalid token length {length}: maximum is {max}")]
    InvalidTokenLength { length: usize, max: usize },

    /// Option header or value is malformed or truncated
    #[error("Invalid option encoding at offset {offset}: {description}")]
    InvalidOption {
        offset: usize,
        description: &'static str,
    },

    /// Payload marker is the last byte of the message
    #[error("Payload marker at offset {offset} is not followed by a payload")]
    EmptyPayload { offset: usize },

    /// Option numbers decrease, so they cannot be delta encoded
    #[error("Options out of order: {previous} followed by {current}")]
    InvalidOptionOrder { previous: u16, current: u16 },

    /// Option value longer than the extended length field can express
    #[error("Option {option} value too long: {size} bytes exceeds limit {limit}")]
    OptionTooLong {
        option: u16,
        size: usize,
        limit: usize,
    },

    /// Stream frame body longer than the 32-bit extended length can express
    #[error("Frame too large: {size} bytes exceeds limit {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    /// Destination buffer smaller than the computed message size
    #[error("Encode buffer too small: need {need} bytes, got {got}")]
    BufferTooSmall { need: usize, got: usize },

    /// Generic message has no execution context to attach to a pooled message
    #[error("Invalid context: message has no execution context")]
    InvalidContext,

    /// Body reader failed while materialising the payload
    #[error("Cannot read body: {message}")]
    Body { message: String },

    #[error(transparent)]
    Types(#[from] TypesError),
}

impl CodecError {
    pub fn message_too_small(need: usize, got: usize, context: &'static str) -> Self {
        Self::MessageTooSmall { need, got, context }
    }

    pub fn invalid_option(offset: usize, description: &'static str) -> Self {
        Self::InvalidOption {
            offset,
            description,
        }
    }

    pub fn body(source: std::io::Error) -> Self {
        Self::Body {
            message: source.to_string(),
        }
    }

    /// True for errors that only mean "not enough bytes yet"
    pub fn is_short_read(&self) -> bool {
        matches!(self, Self::ShortRead { .. })
    }
}

/// Result type for codec operations
pub type CodecResult<T> = std::result::Result<T, CodecError>;
