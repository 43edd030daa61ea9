//! Transport Connections
//!
//! The byte-level connections a session drives. Every blocking call takes
//! the [`Context`] it runs under and returns as soon as that context is
//! cancelled or its deadline passes, so a session can always unblock its
//! reader by cancelling.

use crate::{Result, TransportError};
use async_trait::async_trait;
use coap_types::Context;
use std::future::Future;
use std::net::SocketAddr;

pub mod tcp;
pub mod udp;

// Re-export transport types
pub use tcp::TcpConn;
pub use udp::{UdpConn, UdpPeerConn};

/// Connection a session reads from and writes to
#[async_trait]
pub trait Connection: Send + Sync {
    /// Read one unit of data (a datagram, or one delimited stream frame)
    async fn read_with_context(&self, ctx: &Context, buf: &mut [u8]) -> Result<usize>;

    /// Write all of `data`, bounded by `ctx`
    async fn write_with_context(&self, ctx: &Context, data: &[u8]) -> Result<()>;

    /// Close the connection; pending reads and writes return `Closed`
    async fn close(&self) -> Result<()>;

    fn remote_addr(&self) -> SocketAddr;
}

/// Drive `operation` until it finishes or `ctx` stops
pub(crate) async fn with_context<T, F>(ctx: &Context, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if let Some(err) = ctx.err() {
        return Err(err.into());
    }
    tokio::select! {
        biased;
        reason = ctx.done() => Err(TransportError::from(reason)),
        result = operation => result,
    }
}
