//! # CoAP Wire Codec
//!
//! ## Purpose
//!
//! Encoding and decoding of CoAP messages for both transport families, plus
//! the pooled message type and the bounded pool that recycles it:
//! - Datagram framing (UDP, DTLS) with type and message ID
//! - Stream framing (TCP, TLS) with a variable-width length field
//! - [`PooledMessage`]: reusable message with decode/encode scratch buffers
//! - [`MessagePool`]: bounded free list with an atomic idle counter
//!
//! ## Architecture Role
//!
//! ```text
//! libs/types → [codec] → libs/network
//!     ↑           ↓            ↓
//! Codes,     Framing,      Sessions,
//! Options    Pooling       Connections
//! ```
//!
//! ## What This Crate Does NOT Contain
//! - Retransmission, deduplication, block-wise transfer or observation
//! - Socket management or connection handling (belongs in libs/network)
//!
//! ## Performance Profile
//!
//! - Decoded token, option values and payload are zero-copy slices of one
//!   frozen receive buffer per message
//! - Encoding writes into a message-owned buffer that only grows, so steady
//!   state marshalling does not allocate
//! - Acquire/release are a lock-free channel pop/push plus one atomic update

pub mod constants;
pub mod datagram;
pub mod error;
pub mod framing;
mod options;
pub mod message;
pub mod pool;
pub mod stream;

pub use constants::*;
pub use datagram::{next_message_id, Datagram, DatagramHeader, Type};
pub use error::{CodecError, CodecResult};
pub use framing::{Decoded, FrameRef, Framing};
pub use message::{BufferLimits, DatagramMessage, PooledMessage, StreamMessage};
pub use pool::{DatagramPool, MessagePool, StreamPool};
pub use stream::{frame_length, Stream, MAX_FRAME_BODY_SIZE};
