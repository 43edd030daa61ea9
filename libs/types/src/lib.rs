//! # CoAP Message Types
//!
//! Message-level building blocks shared by the codec and network crates.
//!
//! ## Architecture Role
//!
//! ```text
//! libs/types → libs/codec → libs/network
//!     ↑            ↓             ↓
//! Codes,       Wire framing,  Sessions,
//! Options,     Pooled         Sockets
//! Contexts     messages
//! ```
//!
//! ## What This Crate Contains
//! - [`Code`] and its request/response/signaling constants
//! - [`Options`]: the ordered option container used by every framing
//! - [`Body`]: a seekable payload backed by [`bytes::Bytes`] or any reader
//! - [`Context`]: the cancellable execution context every blocking call runs under
//! - [`Message`]: the owned, framing-independent message
//! - [`MessageBase`] and the [`CoapMessage`] capability trait composed by pooled messages
//!
//! ## What This Crate Does NOT Contain
//! - Wire encoding (belongs in libs/codec)
//! - Socket management or connection handling (belongs in libs/network)

pub mod body;
pub mod code;
pub mod context;
pub mod error;
pub mod message;
pub mod options;

pub use body::Body;
pub use code::Code;
pub use context::{Context, ContextError};
pub use error::{TypesError, TypesResult};
pub use message::{generate_token, CoapMessage, Message, MessageBase, Token, MAX_TOKEN_SIZE};
pub use options::{CoapOption, OptionId, Options, MAX_OPTION_VALUE_SIZE};
