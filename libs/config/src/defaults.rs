//! Default values shared across the transport core
//!
//! The codec and network crates take their compile-time constants from here
//! so the configuration defaults and the library defaults cannot drift.

/// Message pool defaults
pub mod pool {
    /// Idle messages a pool retains before releases are dropped
    pub const CAPACITY: usize = 10240;

    /// Scratch buffer size for freshly allocated messages (bytes)
    pub const BUFFER_BASELINE: usize = 256;

    /// Scratch buffers above this size are replaced on reset (bytes)
    pub const BUFFER_SHRINK_THRESHOLD: usize = 2048;
}

/// Session defaults
pub mod session {
    /// Read buffer size per session (bytes)
    pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

    /// Sessions close their connection on teardown
    pub const CLOSE_SOCKET: bool = true;
}
