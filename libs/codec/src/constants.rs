//! Protocol and pooling constants

/// Datagram header version field (RFC 7252 §3)
pub const COAP_VERSION: u8 = 1;

/// Separates options from the payload in both framings
pub const PAYLOAD_MARKER: u8 = 0xFF;

/// Fixed datagram header: ver/type/tkl, code, 16-bit message ID
pub const DATAGRAM_HEADER_SIZE: usize = 4;

/// Maximum number of idle messages a pool retains
pub const MAX_MESSAGE_POOL: usize = coap_config::defaults::pool::CAPACITY;

/// Scratch buffers above this capacity are replaced on reset
pub const MAX_MESSAGE_BUFFER_SIZE: usize = coap_config::defaults::pool::BUFFER_SHRINK_THRESHOLD;

/// Capacity of freshly allocated scratch buffers
pub const MESSAGE_BUFFER_BASELINE: usize = coap_config::defaults::pool::BUFFER_BASELINE;
