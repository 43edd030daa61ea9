//! Transport Error Types
//!
//! Errors that end a session loop or fail a single write: socket failures,
//! context cancellation, codec failures on the write path and errors
//! reported by the upstream processor.

use coap_codec::CodecError;
use coap_types::ContextError;
use thiserror::Error;

/// Main transport error type
#[derive(Error, Debug)]
pub enum TransportError {
    /// Network connectivity errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The execution context was cancelled
    #[error("context canceled")]
    Canceled,

    /// The execution context deadline passed
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// Operation on a connection that was already closed
    #[error("connection closed")]
    Closed,

    /// Encoding an outgoing message failed
    #[error("cannot marshal: {0}")]
    Marshal(#[from] CodecError),

    /// The upstream processor rejected received data
    #[error("Processor error: {message}")]
    Processor {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Message has no execution context to write under
    #[error("invalid context: message has no execution context")]
    InvalidContext,

    /// Protocol violations on the byte stream
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Generic I/O errors
    #[error("I/O error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error with source
    pub fn network_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a processor error
    pub fn processor(message: impl Into<String>) -> Self {
        Self::Processor {
            message: message.into(),
            source: None,
        }
    }

    /// Create a processor error with source
    pub fn processor_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Processor {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create an I/O error
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// True when the error only reports context cancellation or expiry
    pub fn is_context_error(&self) -> bool {
        matches!(self, Self::Canceled | Self::DeadlineExceeded)
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            TransportError::Network { .. } => "network",
            TransportError::Canceled => "canceled",
            TransportError::DeadlineExceeded => "deadline_exceeded",
            TransportError::Closed => "closed",
            TransportError::Marshal(_) => "marshal",
            TransportError::Processor { .. } => "processor",
            TransportError::InvalidContext => "invalid_context",
            TransportError::Protocol { .. } => "protocol",
            TransportError::Io { .. } => "io",
        }
    }
}

impl From<ContextError> for TransportError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Canceled => TransportError::Canceled,
            ContextError::DeadlineExceeded => TransportError::DeadlineExceeded,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io {
            message: err.to_string(),
            source: err,
        }
    }
}
