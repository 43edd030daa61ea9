//! Errors raised while building messages in memory

use thiserror::Error;

/// Errors produced by message-level operations that never touch the wire
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypesError {
    /// Option value exceeds what the option codec can express
    #[error("Option {option} value too long: {size} bytes exceeds limit {limit}")]
    OptionValueTooLong {
        option: u16,
        size: usize,
        limit: usize,
    },

    /// Token exceeds the eight bytes allowed by the header nibble
    #[error("Token too long: {size} bytes exceeds limit {limit}")]
    TokenTooLong { size: usize, limit: usize },

    /// Uint option holds more bytes than fit in a u32
    #[error("Option {option} is not a valid uint: {size} bytes")]
    InvalidUint { option: u16, size: usize },
}

/// Result type for message-level operations
pub type TypesResult<T> = std::result::Result<T, TypesError>;
