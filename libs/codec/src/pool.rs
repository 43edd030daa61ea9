//! # Message Pool
//!
//! ## Purpose
//!
//! Bounded free list of [`PooledMessage`]s. Acquire pops an idle message or
//! allocates a fresh one; release resets the message and keeps it only while
//! fewer than `capacity` messages are idle.
//!
//! ## Counting
//!
//! ```text
//! release: fetch_update(n < cap → n + 1) ─► reset ─► push
//! acquire: pop ─► fetch_sub(1)
//! ```
//!
//! The slot is reserved before the push and given back after the pop, so
//! the counter never exceeds the cap and never underflows, and the free list
//! never holds more messages than the counter reports.
//!
//! `release` takes the message by value. Releasing the same message twice
//! does not compile.

use crate::constants::MAX_MESSAGE_POOL;
use crate::datagram::Datagram;
use crate::error::{CodecError, CodecResult};
use crate::framing::Framing;
use crate::message::{BufferLimits, PooledMessage};
use crate::stream::Stream;
use coap_config::PoolSettings;
use coap_types::{CoapMessage, Context, Message};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;

/// Bounded pool of reusable messages for one framing
pub struct MessagePool<F: Framing> {
    sender: Sender<Box<PooledMessage<F>>>,
    receiver: Receiver<Box<PooledMessage<F>>>,
    pooled: AtomicUsize,
    capacity: usize,
    limits: BufferLimits,
    _framing: PhantomData<fn() -> F>,
}

/// Pool of datagram messages
pub type DatagramPool = MessagePool<Datagram>;

/// Pool of stream messages
pub type StreamPool = MessagePool<Stream>;

impl<F: Framing> MessagePool<F> {
    pub fn new(capacity: usize) -> Self {
        Self::with_limits(capacity, BufferLimits::default())
    }

    pub fn with_limits(capacity: usize, limits: BufferLimits) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            pooled: AtomicUsize::new(0),
            capacity,
            limits,
            _framing: PhantomData,
        }
    }

    pub fn from_settings(settings: &PoolSettings) -> Self {
        Self::with_limits(
            settings.capacity,
            BufferLimits {
                baseline: settings.buffer_baseline,
                shrink_threshold: settings.buffer_shrink_threshold,
            },
        )
    }

    /// Idle message or a fresh one, with `ctx` attached
    pub fn acquire(&self, ctx: Context) -> Box<PooledMessage<F>> {
        let mut msg = match self.receiver.try_recv() {
            Ok(msg) => {
                self.pooled.fetch_sub(1, Ordering::AcqRel);
                trace!(framing = F::NAME, "pool hit");
                msg
            }
            Err(_) => {
                trace!(framing = F::NAME, "pool miss, allocating message");
                Box::new(PooledMessage::new(self.limits))
            }
        };
        msg.ctx = Some(ctx);
        msg
    }

    /// Reset `msg` and keep it for reuse, or drop it when the pool is full
    pub fn release(&self, mut msg: Box<PooledMessage<F>>) {
        let reserved = self
            .pooled
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .is_ok();
        if !reserved {
            trace!(framing = F::NAME, capacity = self.capacity, "pool full, dropping message");
            return;
        }

        msg.reset();
        msg.ctx = None;
        if self.sender.try_send(msg).is_err() {
            self.pooled.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Number of idle messages
    pub fn pooled(&self) -> usize {
        self.pooled.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Pooled copy of a generic message, attached to the message's context
    ///
    /// Tokens longer than the wire allows are rejected here rather than at
    /// marshal time; the acquired message goes back to the pool.
    pub fn convert_from(&self, msg: Message) -> CodecResult<Box<PooledMessage<F>>> {
        let ctx = msg.context.ok_or(CodecError::InvalidContext)?;
        let mut pooled = self.acquire(ctx);
        if let Err(e) = pooled.base.try_set_token(msg.token) {
            self.release(pooled);
            return Err(e.into());
        }
        pooled.set_code(msg.code);
        pooled.base.reset_options_to(&msg.options);
        pooled.set_body(msg.body);
        Ok(pooled)
    }
}

impl<F: Framing> Default for MessagePool<F> {
    fn default() -> Self {
        Self::new(MAX_MESSAGE_POOL)
    }
}

impl<F: Framing> std::fmt::Debug for MessagePool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagePool")
            .field("framing", &F::NAME)
            .field("pooled", &self.pooled())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datagram::Type;
    use coap_types::{Body, Code, OptionId, TypesError};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_release_is_bounded() {
        let pool = DatagramPool::new(4);
        let messages: Vec<_> = (0..10).map(|_| pool.acquire(Context::background())).collect();
        for msg in messages {
            pool.release(msg);
        }
        assert_eq!(pool.pooled(), 4);

        let again: Vec<_> = (0..6).map(|_| pool.acquire(Context::background())).collect();
        assert_eq!(pool.pooled(), 0);
        drop(again);
    }

    #[test]
    fn test_released_message_is_reset() {
        let pool = DatagramPool::new(1);
        let mut msg = pool.acquire(Context::background());
        msg.set_message_id(11);
        msg.set_message_type(Type::Confirmable);
        msg.set_code(Code::PUT);
        msg.set_body(Some(Body::from("payload")));
        pool.release(msg);

        let msg = pool.acquire(Context::background());
        assert_eq!(msg.try_message_id(), None);
        assert_eq!(msg.message_type(), Type::NonConfirmable);
        assert_eq!(msg.code(), Code::EMPTY);
        assert!(msg.body().is_none());
        assert!(!msg.is_modified());
        assert!(msg.context().is_some());
    }

    #[test]
    fn test_counter_stays_within_bounds_under_contention() {
        let pool = Arc::new(StreamPool::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let a = pool.acquire(Context::background());
                        let b = pool.acquire(Context::background());
                        pool.release(a);
                        assert!(pool.pooled() <= pool.capacity());
                        pool.release(b);
                        assert!(pool.pooled() <= pool.capacity());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(pool.pooled() <= 8);
    }

    #[test]
    fn test_convert_from_requires_context() {
        let pool = StreamPool::default();
        let err = pool.convert_from(Message::default()).unwrap_err();
        assert_eq!(err, CodecError::InvalidContext);
        assert_eq!(pool.capacity(), MAX_MESSAGE_POOL);
    }

    #[test]
    fn test_convert_from_copies_fields() {
        let pool = DatagramPool::default();
        let mut generic = Message::new(Context::background(), Code::POST);
        generic.token = Some(bytes::Bytes::from_static(&[9, 9]));
        generic.options.add(OptionId::URI_PATH, "x").unwrap();
        generic.body = Some(Body::from("b"));

        let mut msg = pool.convert_from(generic).unwrap();
        assert_eq!(msg.code(), Code::POST);
        assert_eq!(msg.token().unwrap().as_ref(), &[9, 9]);
        assert_eq!(msg.base().path(), "/x");
        assert_eq!(msg.base_mut().read_body().unwrap().as_ref(), b"b");
        assert!(msg.context().is_some());
    }

    #[test]
    fn test_convert_from_rejects_oversized_token() {
        let pool = StreamPool::new(2);
        let mut generic = Message::new(Context::background(), Code::GET);
        generic.token = Some(bytes::Bytes::from_static(&[0u8; 9]));

        let err = pool.convert_from(generic).unwrap_err();
        assert!(matches!(
            err,
            CodecError::Types(TypesError::TokenTooLong { size: 9, limit: 8 })
        ));
        assert_eq!(pool.pooled(), 1);

        let msg = pool.acquire(Context::background());
        assert!(msg.token().is_none());
    }

    #[test]
    fn test_from_settings() {
        let settings = PoolSettings {
            capacity: 2,
            buffer_baseline: 64,
            buffer_shrink_threshold: 128,
        };
        let pool = DatagramPool::from_settings(&settings);
        assert_eq!(pool.capacity(), 2);

        let mut msg = pool.acquire(Context::background());
        msg.set_message_id(1);
        msg.set_body(Some(Body::from(vec![0u8; 512])));
        msg.marshal().unwrap();
        pool.release(msg);

        let msg = pool.acquire(Context::background());
        assert!(msg.encode_capacity() <= 128);
    }
}
