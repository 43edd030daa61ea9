//! UDP Connections
//!
//! [`UdpConn`] wraps one socket that may be shared by many peer sessions.
//! [`UdpPeerConn`] binds a shared socket to a single remote address and is
//! what a datagram session drives. Whether a session closes the socket on
//! teardown is decided by the session's ownership flag, not by the peer
//! connection.
//!
//! ## Sharing One Socket
//!
//! Every peer view registers an inbox on its socket. All views read the
//! socket concurrently; a datagram from another registered peer is queued
//! into that peer's inbox instead of being returned, so whichever view
//! happens to receive it, the right session sees it.
//!
//! ```text
//!              ┌─► from == own peer ──► returned
//! recv_from ───┼─► registered peer ────► that peer's inbox
//!              └─► unknown sender ─────► dropped (warn)
//! ```

use super::{with_context, Connection};
use crate::{Result, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use coap_types::Context;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Datagrams queued for one peer view before further ones are dropped
const PEER_INBOX_CAPACITY: usize = 64;

type PeerRegistry = Mutex<HashMap<SocketAddr, mpsc::Sender<Bytes>>>;

/// Shared UDP socket with context-aware read and write
#[derive(Debug, Clone)]
pub struct UdpConn {
    socket: Arc<UdpSocket>,
    closed: CancellationToken,
    peers: Arc<PeerRegistry>,
}

impl UdpConn {
    /// Bind a new socket
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| TransportError::network_with_source("Failed to bind UDP socket", e))?;
        info!("UDP socket listening on: {}", addr);
        Ok(Self::from_socket(socket))
    }

    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket: Arc::new(socket),
            closed: CancellationToken::new(),
            peers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| TransportError::network_with_source("Failed to get local address", e))
    }

    /// Receive one datagram and its sender
    ///
    /// Reads the socket directly; datagrams for registered peer views are
    /// returned here too.
    pub async fn read_from_with_context(
        &self,
        ctx: &Context,
        buf: &mut [u8],
    ) -> Result<(usize, SocketAddr)> {
        with_context(ctx, async {
            tokio::select! {
                biased;
                _ = self.closed.cancelled() => Err(TransportError::Closed),
                received = self.socket.recv_from(buf) => received.map_err(|e| {
                    TransportError::network_with_source("Failed to receive UDP datagram", e)
                }),
            }
        })
        .await
    }

    /// Send `data` as one datagram to `addr`
    pub async fn write_to_with_context(
        &self,
        ctx: &Context,
        addr: SocketAddr,
        data: &[u8],
    ) -> Result<()> {
        let sent = with_context(ctx, async {
            tokio::select! {
                biased;
                _ = self.closed.cancelled() => Err(TransportError::Closed),
                sent = self.socket.send_to(data, addr) => sent.map_err(|e| {
                    TransportError::network_with_source("Failed to send UDP datagram", e)
                }),
            }
        })
        .await?;

        if sent != data.len() {
            return Err(TransportError::network(format!(
                "Partial UDP send to {}: {} of {} bytes",
                addr,
                sent,
                data.len()
            )));
        }
        debug!(peer = %addr, bytes = sent, "Sent UDP datagram");
        Ok(())
    }

    /// Stop every pending and future operation on this socket
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Number of peer views currently registered on this socket
    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// Queue a datagram read by one view for the view that owns `from`
    fn dispatch(&self, from: SocketAddr, data: &[u8]) {
        let inbox = self.peers.lock().get(&from).cloned();
        match inbox {
            Some(inbox) => match inbox.try_send(Bytes::copy_from_slice(data)) {
                Ok(()) => debug!(peer = %from, bytes = data.len(), "Queued UDP datagram for peer"),
                Err(_) => warn!(peer = %from, bytes = data.len(), "Peer inbox full, dropping datagram"),
            },
            None => warn!(from = %from, bytes = data.len(), "Dropping datagram from unknown peer"),
        }
    }
}

/// Inbox of one peer view; unregisters itself when the last clone goes
#[derive(Debug)]
struct PeerInbox {
    peer: SocketAddr,
    sender: mpsc::Sender<Bytes>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<Bytes>>,
    registry: Arc<PeerRegistry>,
}

impl Drop for PeerInbox {
    fn drop(&mut self) {
        let mut peers = self.registry.lock();
        if peers
            .get(&self.peer)
            .is_some_and(|sender| sender.same_channel(&self.sender))
        {
            peers.remove(&self.peer);
        }
    }
}

/// Shared socket bound to one remote peer
///
/// Creating a second view for the same peer on the same socket takes over
/// its inbox; datagrams from that peer then go to the newest view.
#[derive(Debug, Clone)]
pub struct UdpPeerConn {
    conn: UdpConn,
    peer: SocketAddr,
    inbox: Arc<PeerInbox>,
}

impl UdpPeerConn {
    pub fn new(conn: UdpConn, peer: SocketAddr) -> Self {
        let (sender, receiver) = mpsc::channel(PEER_INBOX_CAPACITY);
        conn.peers.lock().insert(peer, sender.clone());
        let inbox = Arc::new(PeerInbox {
            peer,
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            registry: Arc::clone(&conn.peers),
        });
        Self { conn, peer, inbox }
    }

    pub fn inner(&self) -> &UdpConn {
        &self.conn
    }

    async fn read_datagram(&self, buf: &mut [u8]) -> Result<usize> {
        let mut inbox = self.inbox.receiver.lock().await;
        loop {
            tokio::select! {
                biased;
                _ = self.conn.closed.cancelled() => return Err(TransportError::Closed),
                queued = inbox.recv() => {
                    // The view itself holds a sender, so the channel never closes here
                    let Some(data) = queued else {
                        return Err(TransportError::Closed);
                    };
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    debug!(peer = %self.peer, bytes = n, "Received queued UDP datagram");
                    return Ok(n);
                }
                received = self.conn.socket.recv_from(buf) => {
                    let (n, from) = received.map_err(|e| {
                        TransportError::network_with_source("Failed to receive UDP datagram", e)
                    })?;
                    if from == self.peer {
                        debug!(peer = %from, bytes = n, "Received UDP datagram");
                        return Ok(n);
                    }
                    self.conn.dispatch(from, &buf[..n]);
                }
            }
        }
    }
}

#[async_trait]
impl Connection for UdpPeerConn {
    async fn read_with_context(&self, ctx: &Context, buf: &mut [u8]) -> Result<usize> {
        with_context(ctx, self.read_datagram(buf)).await
    }

    async fn write_with_context(&self, ctx: &Context, data: &[u8]) -> Result<()> {
        self.conn.write_to_with_context(ctx, self.peer, data).await
    }

    async fn close(&self) -> Result<()> {
        if self.conn.is_closed() {
            return Err(TransportError::Closed);
        }
        self.conn.close();
        info!(peer = %self.peer, "Closed UDP connection");
        Ok(())
    }

    fn remote_addr(&self) -> SocketAddr {
        self.peer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn loopback() -> UdpConn {
        UdpConn::bind("127.0.0.1:0".parse().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn test_peer_round_trip() {
        let a = loopback().await;
        let b = loopback().await;
        let a_to_b = UdpPeerConn::new(a.clone(), b.local_addr().unwrap());
        let b_to_a = UdpPeerConn::new(b.clone(), a.local_addr().unwrap());
        let ctx = Context::background();

        a_to_b.write_with_context(&ctx, b"ping").await.unwrap();

        let mut buf = [0u8; 64];
        let n = b_to_a.read_with_context(&ctx, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(b_to_a.remote_addr(), a.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_foreign_datagrams_are_skipped() {
        let receiver = loopback().await;
        let expected = loopback().await;
        let stranger = loopback().await;
        let ctx = Context::background();
        let target = receiver.local_addr().unwrap();

        stranger
            .write_to_with_context(&ctx, target, b"noise")
            .await
            .unwrap();
        expected
            .write_to_with_context(&ctx, target, b"signal")
            .await
            .unwrap();

        let peer = UdpPeerConn::new(receiver, expected.local_addr().unwrap());
        let mut buf = [0u8; 64];
        let n = peer.read_with_context(&ctx, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"signal");
    }

    #[tokio::test]
    async fn test_views_sharing_a_socket_each_get_their_peer() {
        let shared = loopback().await;
        let peer_a = loopback().await;
        let peer_b = loopback().await;
        let view_a = UdpPeerConn::new(shared.clone(), peer_a.local_addr().unwrap());
        let view_b = UdpPeerConn::new(shared.clone(), peer_b.local_addr().unwrap());
        assert_eq!(shared.peer_count(), 2);

        let ctx = Context::background();
        let target = shared.local_addr().unwrap();
        peer_b.write_to_with_context(&ctx, target, b"for-b").await.unwrap();
        peer_a.write_to_with_context(&ctx, target, b"for-a").await.unwrap();

        // view_a receives both datagrams from the socket and queues "for-b"
        let mut buf = [0u8; 64];
        let n = view_a.read_with_context(&ctx, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"for-a");

        let (bounded, _cancel) = ctx.with_timeout(Duration::from_secs(2));
        let n = view_b.read_with_context(&bounded, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"for-b");
    }

    #[tokio::test]
    async fn test_concurrent_views_receive_interleaved_traffic() {
        let shared = loopback().await;
        let peer_a = loopback().await;
        let peer_b = loopback().await;
        let view_a = UdpPeerConn::new(shared.clone(), peer_a.local_addr().unwrap());
        let view_b = UdpPeerConn::new(shared.clone(), peer_b.local_addr().unwrap());

        let reader = |view: UdpPeerConn| {
            tokio::spawn(async move {
                let (ctx, _cancel) = Context::background().with_timeout(Duration::from_secs(2));
                let mut got = Vec::new();
                let mut buf = [0u8; 64];
                for _ in 0..3 {
                    let n = view.read_with_context(&ctx, &mut buf).await.unwrap();
                    got.push(buf[..n].to_vec());
                }
                got
            })
        };
        let reader_a = reader(view_a);
        let reader_b = reader(view_b);

        let ctx = Context::background();
        let target = shared.local_addr().unwrap();
        for i in 0..3u8 {
            peer_b.write_to_with_context(&ctx, target, &[b'b', i]).await.unwrap();
            peer_a.write_to_with_context(&ctx, target, &[b'a', i]).await.unwrap();
        }

        let expected = |tag: u8| (0..3u8).map(|i| vec![tag, i]).collect::<Vec<_>>();
        assert_eq!(reader_a.await.unwrap(), expected(b'a'));
        assert_eq!(reader_b.await.unwrap(), expected(b'b'));
    }

    #[tokio::test]
    async fn test_dropped_view_unregisters() {
        let shared = loopback().await;
        let view = UdpPeerConn::new(shared.clone(), "127.0.0.1:9".parse().unwrap());
        let clone = view.clone();
        drop(view);
        assert_eq!(shared.peer_count(), 1);
        drop(clone);
        assert_eq!(shared.peer_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_unblocks_read() {
        let conn = loopback().await;
        let (ctx, cancel) = Context::background().with_cancel();

        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            conn.read_from_with_context(&ctx, &mut buf).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = reader.await.unwrap();
        assert!(matches!(result, Err(TransportError::Canceled)));
    }

    #[tokio::test]
    async fn test_close_stops_pending_read() {
        let conn = loopback().await;
        let peer = UdpPeerConn::new(conn.clone(), "127.0.0.1:9".parse().unwrap());
        let ctx = Context::background();

        let reader = {
            let peer = peer.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 16];
                peer.read_with_context(&ctx, &mut buf).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        peer.close().await.unwrap();

        assert!(matches!(reader.await.unwrap(), Err(TransportError::Closed)));
        assert!(matches!(peer.close().await, Err(TransportError::Closed)));
    }
}
