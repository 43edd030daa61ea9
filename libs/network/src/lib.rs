//! # CoAP Network Sessions
//!
//! ## Purpose
//!
//! Per-peer session driver and the connections it runs on:
//! - [`Session`]: read loop, close hooks, done signal, single teardown
//! - [`Connection`]: context-aware read/write/close over a transport
//! - [`UdpConn`] / [`UdpPeerConn`]: shared UDP socket and its per-peer view
//! - [`TcpConn`]: TCP stream delivering one stream frame per read
//! - [`Processor`]: the upstream consumer every read is handed to
//!
//! ## Architecture Role
//!
//! ```text
//! libs/types → libs/codec → [network]
//!                  ↑            │
//!          PooledMessage ◄── write_message
//!                               │
//!             Processor ◄── run (read loop)
//! ```
//!
//! ## What This Crate Does NOT Contain
//! - Retransmission, deduplication or request routing (processor side)
//! - Listener/accept loops and client construction
//! - DTLS/TLS handshakes; secure transports plug in through [`Connection`]

pub mod error;
pub mod processor;
pub mod session;
pub mod transports;

// Re-export commonly used types
pub use error::{Result, TransportError};
pub use processor::Processor;
pub use session::{CloseHook, Session};
pub use transports::{Connection, TcpConn, UdpConn, UdpPeerConn};
