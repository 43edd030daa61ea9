//! # Execution Context
//!
//! ## Purpose
//!
//! Every blocking operation in the core (socket reads, socket writes) runs
//! under a [`Context`]: a cancellation signal, an optional deadline and a
//! chain of request-scoped values. Sessions derive one per connection;
//! messages carry the one of the exchange they belong to, so a write can be
//! bounded by its own exchange instead of the whole connection.
//!
//! ## Derivation Rules
//!
//! - [`Context::with_cancel`] and [`Context::with_deadline`] create a child
//!   token: cancelling the parent cancels the child, never the reverse.
//! - A child deadline never extends its parent's deadline.
//! - [`Context::with_value`] shares the parent's cancellation and deadline.
//!
//! Contexts are cheap to clone: the token and the value chain are reference
//! counted.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a context stopped
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

struct ValueNode {
    key: &'static str,
    value: Arc<dyn Any + Send + Sync>,
    parent: Option<Arc<ValueNode>>,
}

/// Cancellable execution context
#[derive(Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
    values: Option<Arc<ValueNode>>,
}

impl Context {
    /// Root context: never cancelled by anyone else, no deadline, no values
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
            values: None,
        }
    }

    /// Child context plus the token that cancels it
    pub fn with_cancel(&self) -> (Context, CancellationToken) {
        let token = self.token.child_token();
        let ctx = Context {
            token: token.clone(),
            deadline: self.deadline,
            values: self.values.clone(),
        };
        (ctx, token)
    }

    /// Child context that also stops at `deadline` (or the parent's, if earlier)
    pub fn with_deadline(&self, deadline: Instant) -> (Context, CancellationToken) {
        let (mut ctx, token) = self.with_cancel();
        ctx.deadline = Some(match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        });
        (ctx, token)
    }

    pub fn with_timeout(&self, timeout: Duration) -> (Context, CancellationToken) {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Context carrying one more key/value pair; lookups see the newest value per key
    pub fn with_value<T>(&self, key: &'static str, value: T) -> Context
    where
        T: Any + Send + Sync,
    {
        Context {
            token: self.token.clone(),
            deadline: self.deadline,
            values: Some(Arc::new(ValueNode {
                key,
                value: Arc::new(value),
                parent: self.values.clone(),
            })),
        }
    }

    /// Most recent value stored under `key`, if it has type `T`
    pub fn value<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        let mut node = self.values.as_deref();
        while let Some(current) = node {
            if current.key == key {
                return current.value.downcast_ref::<T>();
            }
            node = current.parent.as_deref();
        }
        None
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Reason the context stopped, or `None` while it is live
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves once the context is cancelled or its deadline passes
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => ContextError::Canceled,
                    _ = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                ContextError::Canceled
            }
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys = Vec::new();
        let mut node = self.values.as_deref();
        while let Some(current) = node {
            keys.push(current.key);
            node = current.parent.as_deref();
        }
        f.debug_struct("Context")
            .field("cancelled", &self.token.is_cancelled())
            .field("deadline", &self.deadline)
            .field("keys", &keys)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_propagates_to_children_only() {
        let root = Context::background();
        let (parent, cancel_parent) = root.with_cancel();
        let (child, cancel_child) = parent.with_cancel();

        cancel_child.cancel();
        assert_eq!(child.err(), Some(ContextError::Canceled));
        assert!(parent.err().is_none());

        let (child2, _) = parent.with_cancel();
        cancel_parent.cancel();
        assert!(child2.is_done());
        assert!(root.err().is_none());
    }

    #[test]
    fn test_values_shadow_and_share_cancellation() {
        let (ctx, cancel) = Context::background().with_cancel();
        let ctx = ctx.with_value("peer", 1u32).with_value("peer", 2u32);

        assert_eq!(ctx.value::<u32>("peer"), Some(&2));
        assert_eq!(ctx.value::<String>("peer"), None);
        assert_eq!(ctx.value::<u32>("missing"), None);

        cancel.cancel();
        assert!(ctx.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_never_extends_parent() {
        let (parent, _p) = Context::background().with_timeout(Duration::from_millis(10));
        let (child, _c) = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());

        assert_eq!(child.done().await, ContextError::DeadlineExceeded);
        assert_eq!(child.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_done_resolves_on_cancel() {
        let (ctx, cancel) = Context::background().with_cancel();
        let waiter = tokio::spawn(async move { ctx.done().await });
        cancel.cancel();
        assert_eq!(waiter.await.unwrap(), ContextError::Canceled);
    }
}
