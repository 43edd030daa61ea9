//! # Session
//!
//! ## Purpose
//!
//! One session drives one connection: it reads under a cancellable context,
//! hands every read to the upstream [`Processor`], and tears down exactly
//! once when the loop ends.
//!
//! ## Lifecycle
//!
//! ```text
//!   Running ── read error / processor error ──┐
//!      │                                      ▼
//!      └──── close() cancels context ───► Closing ──► Closed
//!                                           │
//!                    hooks (insertion order) ─► connection.close() if owned
//!                                           │
//!                                           └─► done fires last
//! ```
//!
//! Teardown is guarded by a flag, so concurrent `close()` calls and the loop
//! exit converge on a single execution. The done signal is fired by a drop
//! guard, so it fires even if a close hook panics.
//!
//! Dropping the `run` future before it finishes (a timeout, a losing
//! `select!` branch, an aborted task) still tears down: hooks run in place,
//! and closing an owned connection moves to a spawned task that fires done
//! once the close completes.
//!
//! ## Contexts
//!
//! Reads run under the session context. Writes run under the context of the
//! message being written, so a per-exchange deadline bounds a write without
//! depending on how long the session lives. The session context is an
//! atomically swapped pointer: readers never take a lock, and
//! [`Session::set_context_value`] serializes only the derive-and-store step.

use crate::processor::Processor;
use crate::transports::Connection;
use crate::{Result, TransportError};
use arc_swap::ArcSwap;
use coap_codec::{Framing, PooledMessage};
use coap_config::SessionSettings;
use coap_types::Context;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Callback run once during teardown
pub type CloseHook = Box<dyn FnOnce() + Send>;

/// Per-connection driver
pub struct Session<C: Connection + ?Sized + 'static> {
    connection: Arc<C>,
    context: ArcSwap<Context>,
    context_update: Mutex<()>,
    cancel: CancellationToken,
    on_close: Mutex<Vec<CloseHook>>,
    done: CancellationToken,
    torn_down: AtomicBool,
    max_message_size: usize,
    close_socket: bool,
}

/// Tears the session down if `run` is dropped before reaching teardown
struct AbandonGuard<'a, C: Connection + ?Sized + 'static> {
    session: &'a Session<C>,
}

impl<C: Connection + ?Sized + 'static> Drop for AbandonGuard<'_, C> {
    fn drop(&mut self) {
        self.session.teardown_detached();
    }
}

impl<C: Connection + ?Sized + 'static> Session<C> {
    /// Create a session whose context is a cancellable child of `parent`
    ///
    /// `close_socket` decides whether teardown closes `connection`; pass
    /// `false` when the connection is shared with other sessions.
    pub fn new(
        parent: &Context,
        connection: Arc<C>,
        max_message_size: usize,
        close_socket: bool,
    ) -> Self {
        let (context, cancel) = parent.with_cancel();
        Self {
            connection,
            context: ArcSwap::from_pointee(context),
            context_update: Mutex::new(()),
            cancel,
            on_close: Mutex::new(Vec::new()),
            done: CancellationToken::new(),
            torn_down: AtomicBool::new(false),
            max_message_size,
            close_socket,
        }
    }

    pub fn from_settings(parent: &Context, connection: Arc<C>, settings: &SessionSettings) -> Self {
        Self::new(
            parent,
            connection,
            settings.max_message_size,
            settings.close_socket,
        )
    }

    /// Read and dispatch until an error or cancellation, then tear down
    ///
    /// Returns `Ok(())` when the loop ended because the session context was
    /// cancelled. A read or processor error takes precedence over an error
    /// from closing the connection during teardown.
    pub async fn run<P: Processor + ?Sized>(&self, processor: &P) -> Result<()> {
        info!(
            peer = %self.remote_addr(),
            max_message_size = self.max_message_size,
            owns_connection = self.close_socket,
            "Session started"
        );
        let _abandon = AbandonGuard { session: self };

        let mut buf = vec![0u8; self.max_message_size];
        let result = self.read_loop(processor, &mut buf).await;
        if let Err(e) = &result {
            debug!(peer = %self.remote_addr(), error = %e, category = e.category(), "Session loop failed");
        }

        self.cancel.cancel();
        let teardown = self.teardown().await;
        result.and(teardown)
    }

    async fn read_loop<P: Processor + ?Sized>(&self, processor: &P, buf: &mut [u8]) -> Result<()> {
        loop {
            let ctx = self.context();
            let n = match self.connection.read_with_context(&ctx, buf).await {
                Ok(n) => n,
                Err(e) if e.is_context_error() && self.cancel.is_cancelled() => {
                    debug!(peer = %self.remote_addr(), "Session context cancelled");
                    return Ok(());
                }
                Err(e) => {
                    return Err(TransportError::network_with_source(
                        "cannot read from connection",
                        e,
                    ))
                }
            };
            processor.process(&buf[..n]).await?;
        }
    }

    /// Cancel the session context; the run loop exits and tears down
    pub fn close(&self) {
        self.cancel.cancel();
    }

    fn run_hooks(&self) {
        let hooks = std::mem::take(&mut *self.on_close.lock());
        debug!(peer = %self.remote_addr(), hooks = hooks.len(), "Running close hooks");
        for hook in hooks {
            hook();
        }
    }

    async fn teardown(&self) -> Result<()> {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _done = self.done.clone().drop_guard();
        self.run_hooks();

        if self.close_socket {
            if let Err(e) = self.connection.close().await {
                warn!(peer = %self.remote_addr(), error = %e, "Failed to close connection");
                return Err(e);
            }
        }

        info!(peer = %self.remote_addr(), "Session closed");
        Ok(())
    }

    /// Teardown for a dropped `run` future; a no-op once teardown started
    fn teardown_detached(&self) {
        self.cancel.cancel();
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let done = self.done.clone().drop_guard();
        self.run_hooks();

        if !self.close_socket {
            info!(peer = %self.remote_addr(), "Session abandoned");
            return;
        }
        let peer = self.remote_addr();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let connection = Arc::clone(&self.connection);
                handle.spawn(async move {
                    let _done = done;
                    if let Err(e) = connection.close().await {
                        warn!(peer = %peer, error = %e, "Failed to close abandoned connection");
                    }
                    info!(peer = %peer, "Session abandoned");
                });
            }
            Err(_) => warn!(peer = %peer, "No runtime to close abandoned connection on"),
        }
    }

    /// Register a callback for teardown; hooks run in insertion order
    ///
    /// Hooks added after teardown started are never run.
    pub fn add_on_close<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_close.lock().push(Box::new(hook));
    }

    /// Resolves once teardown has finished
    pub async fn done(&self) {
        self.done.cancelled().await
    }

    pub fn is_done(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Snapshot of the current session context
    pub fn context(&self) -> Context {
        Context::clone(&self.context.load_full())
    }

    /// Replace the session context with one that also carries `key`
    pub fn set_context_value<T>(&self, key: &'static str, value: T)
    where
        T: Any + Send + Sync,
    {
        let _update = self.context_update.lock();
        let current = self.context.load_full();
        self.context.store(Arc::new(current.with_value(key, value)));
    }

    /// Marshal `msg` and write it under the message's own context
    pub async fn write_message<F: Framing>(&self, msg: &mut PooledMessage<F>) -> Result<()> {
        let ctx = msg.context().cloned().ok_or(TransportError::InvalidContext)?;
        let data = msg.marshal()?;
        self.connection.write_with_context(&ctx, data).await
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.connection.remote_addr()
    }

    pub fn connection(&self) -> &Arc<C> {
        &self.connection
    }
}

impl<C: Connection + ?Sized + 'static> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("remote_addr", &self.remote_addr())
            .field("max_message_size", &self.max_message_size)
            .field("close_socket", &self.close_socket)
            .field("done", &self.is_done())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transports::with_context;
    use async_trait::async_trait;
    use coap_codec::{DatagramPool, Type};
    use coap_types::{CoapMessage, Code};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Connection that replays scripted reads, then blocks until cancelled
    #[derive(Default)]
    struct ScriptedConn {
        reads: Mutex<VecDeque<Result<Vec<u8>>>>,
        writes: Mutex<Vec<Vec<u8>>>,
        closes: AtomicUsize,
        fail_close: bool,
    }

    impl ScriptedConn {
        fn with_reads(reads: Vec<Result<Vec<u8>>>) -> Self {
            Self {
                reads: Mutex::new(reads.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Connection for ScriptedConn {
        async fn read_with_context(&self, ctx: &Context, buf: &mut [u8]) -> Result<usize> {
            let next = self.reads.lock().pop_front();
            match next {
                Some(Ok(data)) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Some(Err(e)) => Err(e),
                None => with_context(ctx, std::future::pending()).await,
            }
        }

        async fn write_with_context(&self, ctx: &Context, data: &[u8]) -> Result<()> {
            if let Some(err) = ctx.err() {
                return Err(err.into());
            }
            self.writes.lock().push(data.to_vec());
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                return Err(TransportError::network("close failed"));
            }
            Ok(())
        }

        fn remote_addr(&self) -> SocketAddr {
            "192.0.2.1:5683".parse().unwrap()
        }
    }

    #[derive(Default)]
    struct RecordingProcessor {
        received: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl Processor for RecordingProcessor {
        async fn process(&self, data: &[u8]) -> Result<()> {
            if data == b"bad" {
                return Err(TransportError::processor("rejected"));
            }
            self.received.lock().push(data.to_vec());
            Ok(())
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_owned_transport_teardown_after_read_error() {
        let conn = Arc::new(ScriptedConn::with_reads(vec![
            Ok(b"one".to_vec()),
            Err(TransportError::network("connection reset")),
        ]));
        let session = Session::new(&Context::background(), Arc::clone(&conn), 1152, true);

        let order = Arc::new(Mutex::new(Vec::new()));
        for id in [1, 2] {
            let order = Arc::clone(&order);
            session.add_on_close(move || order.lock().push(id));
        }

        let processor = RecordingProcessor::default();
        let err = session.run(&processor).await.unwrap_err();

        assert!(err.to_string().contains("cannot read from connection"));
        assert_eq!(*processor.received.lock(), vec![b"one".to_vec()]);
        assert_eq!(*order.lock(), vec![1, 2]);
        assert_eq!(conn.closes.load(Ordering::SeqCst), 1);
        assert!(session.is_done());
        assert!(session.context().is_done());
    }

    #[test_log::test(tokio::test)]
    async fn test_processor_error_ends_run() {
        let conn = Arc::new(ScriptedConn::with_reads(vec![
            Ok(b"good".to_vec()),
            Ok(b"bad".to_vec()),
            Ok(b"never".to_vec()),
        ]));
        let session = Session::new(&Context::background(), Arc::clone(&conn), 64, true);

        let processor = RecordingProcessor::default();
        let err = session.run(&processor).await.unwrap_err();

        assert!(matches!(err, TransportError::Processor { .. }));
        assert_eq!(processor.received.lock().len(), 1);
        assert_eq!(conn.reads.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_close_is_clean_exit_and_borrowed_connection_stays_open() {
        let conn = Arc::new(ScriptedConn::default());
        let session = Arc::new(Session::new(&Context::background(), Arc::clone(&conn), 64, false));

        let runner = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.run(&RecordingProcessor::default()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        session.close();

        runner.await.unwrap().unwrap();
        assert_eq!(conn.closes.load(Ordering::SeqCst), 0);
        assert!(session.is_done());
    }

    #[tokio::test]
    async fn test_concurrent_close_runs_hooks_once() {
        let conn = Arc::new(ScriptedConn::default());
        let session = Arc::new(Session::new(&Context::background(), Arc::clone(&conn), 64, true));
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = Arc::clone(&calls);
            session.add_on_close(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        let runner = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.run(&RecordingProcessor::default()).await })
        };
        let closers: Vec<_> = (0..16)
            .map(|_| {
                let session = Arc::clone(&session);
                tokio::spawn(async move { session.close() })
            })
            .collect();
        for closer in closers {
            closer.await.unwrap();
        }

        runner.await.unwrap().unwrap();
        session.done().await;
        session.close();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(conn.closes.load(Ordering::SeqCst), 1);
        assert!(session.teardown().await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_done_fires_after_hooks() {
        let conn = Arc::new(ScriptedConn::default());
        let session = Arc::new(Session::new(&Context::background(), conn, 64, true));
        let hook_ran = Arc::new(AtomicBool::new(false));
        {
            let hook_ran = Arc::clone(&hook_ran);
            session.add_on_close(move || hook_ran.store(true, Ordering::SeqCst));
        }

        let waiter = {
            let session = Arc::clone(&session);
            let hook_ran = Arc::clone(&hook_ran);
            tokio::spawn(async move {
                session.done().await;
                hook_ran.load(Ordering::SeqCst)
            })
        };
        let runner = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.run(&RecordingProcessor::default()).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!session.is_done());
        session.close();

        runner.await.unwrap().unwrap();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_parent_cancellation_stops_session() {
        let (parent, cancel_parent) = Context::background().with_cancel();
        let session = Session::new(&parent, Arc::new(ScriptedConn::default()), 64, true);

        cancel_parent.cancel();
        session.run(&RecordingProcessor::default()).await.unwrap();
        assert!(session.is_done());
    }

    #[tokio::test]
    async fn test_teardown_error_reported_only_without_earlier_error() {
        let conn = Arc::new(ScriptedConn {
            fail_close: true,
            ..Default::default()
        });
        let session = Session::new(&Context::background(), conn, 64, true);
        session.close();
        let err = session.run(&RecordingProcessor::default()).await.unwrap_err();
        assert_eq!(err.to_string(), "Network error: close failed");
        assert!(session.is_done());

        let conn = Arc::new(ScriptedConn {
            reads: Mutex::new(vec![Ok(b"bad".to_vec())].into()),
            fail_close: true,
            ..Default::default()
        });
        let session = Session::new(&Context::background(), conn, 64, true);
        let err = session.run(&RecordingProcessor::default()).await.unwrap_err();
        assert!(matches!(err, TransportError::Processor { .. }));
    }

    #[test_log::test(tokio::test)]
    async fn test_dropped_run_still_tears_down() {
        let conn = Arc::new(ScriptedConn::default());
        let session = Session::new(&Context::background(), Arc::clone(&conn), 64, true);
        let hooks = Arc::new(AtomicUsize::new(0));
        {
            let hooks = Arc::clone(&hooks);
            session.add_on_close(move || {
                hooks.fetch_add(1, Ordering::SeqCst);
            });
        }

        let processor = RecordingProcessor::default();
        let outcome = tokio::time::timeout(Duration::from_millis(20), session.run(&processor)).await;
        assert!(outcome.is_err());

        tokio::time::timeout(Duration::from_secs(1), session.done())
            .await
            .unwrap();
        assert_eq!(hooks.load(Ordering::SeqCst), 1);
        assert_eq!(conn.closes.load(Ordering::SeqCst), 1);
        assert!(session.context().is_done());

        // A later run finds the session already torn down
        session.run(&processor).await.unwrap();
        assert_eq!(hooks.load(Ordering::SeqCst), 1);
        assert_eq!(conn.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_aborted_run_with_borrowed_connection_fires_done() {
        let conn = Arc::new(ScriptedConn::default());
        let session = Arc::new(Session::new(&Context::background(), Arc::clone(&conn), 64, false));

        let runner = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.run(&RecordingProcessor::default()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        runner.abort();
        assert!(runner.await.unwrap_err().is_cancelled());

        assert!(session.is_done());
        assert_eq!(conn.closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_context_snapshots_are_stable() {
        let session = Session::new(&Context::background(), Arc::new(ScriptedConn::default()), 64, true);
        let before = session.context();
        session.set_context_value("peer-id", 1u32);
        session.set_context_value("peer-id", 2u32);

        assert_eq!(before.value::<u32>("peer-id"), None);
        assert_eq!(session.context().value::<u32>("peer-id"), Some(&2));
    }

    #[tokio::test]
    async fn test_set_context_value_keeps_cancellation() {
        let session = Arc::new(Session::new(
            &Context::background(),
            Arc::new(ScriptedConn::default()),
            64,
            true,
        ));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let session = Arc::clone(&session);
                tokio::spawn(async move {
                    for _ in 0..100 {
                        let ctx = session.context();
                        if let Some(value) = ctx.value::<u32>("peer-id") {
                            assert_eq!(*value, 7);
                        }
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        session.set_context_value("peer-id", 7u32);
        for reader in readers {
            reader.await.unwrap();
        }

        let ctx = session.context();
        assert_eq!(ctx.value::<u32>("peer-id"), Some(&7));
        session.close();
        assert!(ctx.is_done());
    }

    #[tokio::test]
    async fn test_write_message_uses_message_context() {
        let conn = Arc::new(ScriptedConn::default());
        let session = Session::new(&Context::background(), Arc::clone(&conn), 64, true);
        let pool = DatagramPool::new(2);

        let mut msg = pool.acquire(Context::background());
        msg.set_message_type(Type::NonConfirmable);
        msg.set_code(Code::CONTENT);
        msg.set_message_id(5);
        session.write_message(&mut *msg).await.unwrap();
        assert_eq!(conn.writes.lock()[0], vec![0x50, 0x45, 0x00, 0x05]);

        // Session cancellation does not bound the write, the message context does
        session.close();
        session.write_message(&mut *msg).await.unwrap();
        assert_eq!(conn.writes.lock().len(), 2);

        let (expired, cancel) = Context::background().with_cancel();
        cancel.cancel();
        let mut msg = pool.acquire(expired);
        msg.set_message_id(6);
        let err = session.write_message(&mut *msg).await.unwrap_err();
        assert!(matches!(err, TransportError::Canceled));
    }

    #[tokio::test]
    async fn test_write_message_propagates_codec_errors() {
        let session = Session::new(&Context::background(), Arc::new(ScriptedConn::default()), 64, true);
        let pool = DatagramPool::new(1);
        let mut msg = pool.acquire(Context::background());
        msg.set_message_id(1);
        msg.set_token(Some(bytes::Bytes::from_static(&[0u8; 9])));

        let err = session.write_message(&mut *msg).await.unwrap_err();
        assert!(matches!(err, TransportError::Marshal(_)));
        assert!(err.to_string().starts_with("cannot marshal"));
    }
}
