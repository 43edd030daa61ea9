//! TCP Connections
//!
//! [`TcpConn`] carries stream-framed CoAP messages. Reads are frame
//! delimited: each successful read yields exactly one complete frame, so
//! the processor above always receives a unit it can unmarshal in one go.
//!
//! ```text
//! socket ─► pending (BytesMut) ─► frame_length() ─► one frame ─► caller buf
//! ```

use super::{with_context, Connection};
use crate::{Result, TransportError};
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use coap_codec::frame_length;
use coap_types::Context;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 4096;

struct ReadState {
    half: OwnedReadHalf,
    pending: BytesMut,
}

/// Stream-framed TCP connection
pub struct TcpConn {
    reader: Mutex<ReadState>,
    writer: Mutex<OwnedWriteHalf>,
    peer_addr: SocketAddr,
    closed: CancellationToken,
}

impl TcpConn {
    /// Connect to `addr`, giving up after `connect_timeout`
    pub async fn connect(addr: SocketAddr, connect_timeout: Duration) -> Result<Self> {
        info!("Connecting to TCP peer at {}", addr);

        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::DeadlineExceeded)?
            .map_err(|e| TransportError::network_with_source("Failed to connect to TCP peer", e))?;

        Self::from_stream(stream)
    }

    /// Wrap an accepted or connected stream
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        // Configure TCP socket
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }

        let peer_addr = stream
            .peer_addr()
            .map_err(|e| TransportError::network_with_source("Failed to get peer address", e))?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: Mutex::new(ReadState {
                half: read_half,
                pending: BytesMut::with_capacity(READ_CHUNK),
            }),
            writer: Mutex::new(write_half),
            peer_addr,
            closed: CancellationToken::new(),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    async fn read_frame(&self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.reader.lock().await;
        loop {
            if let Some(len) = frame_length(&state.pending)
                .map_err(|e| TransportError::protocol(format!("Invalid stream frame: {e}")))?
            {
                if len > buf.len() {
                    return Err(TransportError::protocol(format!(
                        "Frame size {} exceeds maximum {}",
                        len,
                        buf.len()
                    )));
                }
                if state.pending.len() >= len {
                    buf[..len].copy_from_slice(&state.pending[..len]);
                    state.pending.advance(len);
                    debug!(peer = %self.peer_addr, bytes = len, "Received TCP frame");
                    return Ok(len);
                }
            }

            let ReadState { half, pending } = &mut *state;
            pending.reserve(READ_CHUNK);
            let n = half
                .read_buf(pending)
                .await
                .map_err(|e| TransportError::network_with_source("Failed to read from TCP stream", e))?;
            if n == 0 {
                if !pending.is_empty() {
                    return Err(TransportError::protocol(format!(
                        "Connection closed inside a frame ({} bytes pending)",
                        pending.len()
                    )));
                }
                return Err(TransportError::Closed);
            }
        }
    }

    async fn write_all(&self, data: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(data)
            .await
            .map_err(|e| TransportError::network_with_source("Failed to write message", e))?;
        writer
            .flush()
            .await
            .map_err(|e| TransportError::network_with_source("Failed to flush TCP stream", e))?;
        debug!(peer = %self.peer_addr, bytes = data.len(), "Sent TCP frame");
        Ok(())
    }
}

#[async_trait]
impl Connection for TcpConn {
    async fn read_with_context(&self, ctx: &Context, buf: &mut [u8]) -> Result<usize> {
        with_context(ctx, async {
            tokio::select! {
                biased;
                _ = self.closed.cancelled() => Err(TransportError::Closed),
                read = self.read_frame(buf) => read,
            }
        })
        .await
    }

    async fn write_with_context(&self, ctx: &Context, data: &[u8]) -> Result<()> {
        with_context(ctx, async {
            tokio::select! {
                biased;
                _ = self.closed.cancelled() => Err(TransportError::Closed),
                written = self.write_all(data) => written,
            }
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.closed.cancel();

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            warn!("Error shutting down TCP connection: {}", e);
            return Err(TransportError::network_with_source(
                "Failed to shut down TCP stream",
                e,
            ));
        }
        info!("Closed TCP connection to {}", self.peer_addr);
        Ok(())
    }

    fn remote_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl std::fmt::Debug for TcpConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConn")
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}
